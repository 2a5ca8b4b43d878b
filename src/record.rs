use auto_impl::auto_impl;

use crate::constant::{SYNTAXES, lookup_oid};
use crate::protocol::ber::Oid;
use crate::protocol::pdu::{Asn1Element, External, ExternalEncoding};

/// One retrieved record: its declared syntax and the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    syntax: String,
    syntax_oid: Option<Oid>,
    database: Option<String>,
    data: Vec<u8>,
}

impl Record {
    pub fn new(syntax_oid: Option<Oid>, database: Option<String>, data: Vec<u8>) -> Self {
        let syntax = match &syntax_oid {
            Some(oid) => match lookup_oid(SYNTAXES, oid) {
                Some(entry) => entry.name.to_string(),
                None => oid.to_string(),
            },
            None => "unknown".to_string(),
        };
        Self {
            syntax,
            syntax_oid,
            database,
            data,
        }
    }

    /// Build a record from a retrievalRecord. `requested` stands in when the
    /// server omits the direct reference.
    pub(crate) fn from_external(
        external: External,
        database: Option<String>,
        requested: Option<&Oid>,
    ) -> Self {
        let syntax_oid = external.direct_reference.or_else(|| requested.cloned());
        let data = match external.encoding {
            ExternalEncoding::OctetAligned(bytes) => bytes,
            ExternalEncoding::Arbitrary(bits) => bits,
            ExternalEncoding::SingleAsn1Type(value) => unwrap_primitive(value),
        };
        Self::new(syntax_oid, database, data)
    }

    /// Registry name of the syntax, or the dotted OID if unregistered
    pub fn syntax(&self) -> &str {
        &self.syntax
    }

    pub fn syntax_oid(&self) -> Option<&Oid> {
        self.syntax_oid.as_ref()
    }

    /// Database the server says the record came from
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The payload as text, if it is valid UTF-8
    pub fn as_text(&self) -> Option<&str> {
        simdutf8::basic::from_utf8(&self.data).ok()
    }

    /// Hand the payload to an external decoder
    pub fn decode_with<D: RecordDecoder>(&self, decoder: &D) -> Result<D::Output, D::Error> {
        decoder.decode(&self.syntax, &self.data)
    }
}

/// A primitive string inside single-ASN1-type (SUTRS) is reduced to its
/// contents. Anything else keeps its full encoding.
fn unwrap_primitive(value: Asn1Element) -> Vec<u8> {
    match value.tlv() {
        Ok(tlv) if !tlv.tag.constructed => tlv.content.to_vec(),
        _ => value.into_bytes(),
    }
}

/// Turns record payloads into something structured (MARC, XML, ...).
#[auto_impl(&, Box, Arc)]
pub trait RecordDecoder {
    type Output;
    type Error;

    fn decode(&self, syntax: &str, bytes: &[u8]) -> Result<Self::Output, Self::Error>;
}
