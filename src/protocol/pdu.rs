//! Z39.50 APDUs and their BER encoding.
//!
//! Every PDU is an implicitly tagged SEQUENCE under a context-class tag
//! (`[20]`..`[27]`, `[48]` for Close). Unknown optional fields inside a known
//! PDU are skipped after structural validation.

use std::fmt;

use crate::constant::{
    BIB1_DIAGNOSTIC_SET, InitOptions, PduTag, ProtocolVersion, diagnostic_message,
};
use crate::error::{Error, Result};
use crate::protocol::ber::*;
use crate::protocol::query::{StructuredQuery, read_query, write_query};

// ============================================================================
// Field tags
// ============================================================================

const REFERENCE_ID: Tag = Tag::context(2);

const PROTOCOL_VERSION: Tag = Tag::context(3);
const OPTIONS: Tag = Tag::context(4);
const PREFERRED_MESSAGE_SIZE: Tag = Tag::context(5);
const EXCEPTIONAL_RECORD_SIZE: Tag = Tag::context(6);
const ID_AUTHENTICATION: Tag = Tag::context_constructed(7);
const INIT_RESULT: Tag = Tag::context(12);
const IMPLEMENTATION_ID: Tag = Tag::context(110);
const IMPLEMENTATION_NAME: Tag = Tag::context(111);
const IMPLEMENTATION_VERSION: Tag = Tag::context(112);

const ID_PASS_GROUP: Tag = Tag::context(0);
const ID_PASS_USER: Tag = Tag::context(1);
const ID_PASS_PASSWORD: Tag = Tag::context(2);

const SMALL_SET_UPPER_BOUND: Tag = Tag::context(13);
const LARGE_SET_LOWER_BOUND: Tag = Tag::context(14);
const MEDIUM_SET_PRESENT_NUMBER: Tag = Tag::context(15);
const REPLACE_INDICATOR: Tag = Tag::context(16);
const RESULT_SET_NAME: Tag = Tag::context(17);
const DATABASE_NAMES: Tag = Tag::context_constructed(18);
const DATABASE_NAME: Tag = Tag::context(105);
const SMALL_SET_ELEMENT_SET_NAMES: Tag = Tag::context_constructed(100);
const MEDIUM_SET_ELEMENT_SET_NAMES: Tag = Tag::context_constructed(101);
const GENERIC_ELEMENT_SET_NAME: Tag = Tag::context(0);
const PREFERRED_RECORD_SYNTAX: Tag = Tag::context(104);
const QUERY: Tag = Tag::context_constructed(21);

const RESULT_COUNT: Tag = Tag::context(23);
const NUMBER_OF_RECORDS_RETURNED: Tag = Tag::context(24);
const NEXT_RESULT_SET_POSITION: Tag = Tag::context(25);
const SEARCH_STATUS: Tag = Tag::context(22);
const RESULT_SET_STATUS: Tag = Tag::context(26);
const PRESENT_STATUS: Tag = Tag::context(27);

const RESPONSE_RECORDS: Tag = Tag::context_constructed(28);
const NON_SURROGATE_DIAGNOSTIC: Tag = Tag::context_constructed(130);
const MULTIPLE_DIAGNOSTICS: Tag = Tag::context_constructed(205);
const RECORD_DATABASE: Tag = Tag::context(0);
const RECORD: Tag = Tag::context_constructed(1);
const RETRIEVAL_RECORD: Tag = Tag::context_constructed(1);
const SURROGATE_DIAGNOSTIC: Tag = Tag::context_constructed(2);

const RESULT_SET_ID: Tag = Tag::context(31);
const START_POINT: Tag = Tag::context(30);
const NUMBER_REQUESTED: Tag = Tag::context(29);
const SIMPLE_COMPOSITION: Tag = Tag::context_constructed(19);

const DELETE_FUNCTION: Tag = Tag::context(32);
const DELETE_STATUS: Tag = Tag::context(0);
const NUMBER_NOT_DELETED: Tag = Tag::context(34);
const DELETE_MESSAGE: Tag = Tag::context(36);

const CLOSE_REASON: Tag = Tag::context(211);
const DIAGNOSTIC_INFORMATION: Tag = Tag::context(3);

const EXTERNAL_SINGLE_ASN1: Tag = Tag::context_constructed(0);
const EXTERNAL_OCTET_ALIGNED: Tag = Tag::context(1);
const EXTERNAL_ARBITRARY: Tag = Tag::context(2);
const OBJECT_DESCRIPTOR: Tag = Tag::universal(7);

// ============================================================================
// Enumerated values
// ============================================================================

macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl $name {
            pub fn from_i64(value: i64) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_i64(self) -> i64 {
                self as i64
            }
        }
    };
}

int_enum! {
    /// Why a session was closed
    pub enum CloseReason {
        Finished = 0,
        Shutdown = 1,
        SystemProblem = 2,
        CostLimit = 3,
        Resources = 4,
        SecurityViolation = 5,
        ProtocolError = 6,
        LackOfActivity = 7,
        PeerAbort = 8,
        Unspecified = 9,
    }
}

int_enum! {
    pub enum PresentStatus {
        Success = 0,
        /// Access control
        Partial1 = 1,
        /// Message size
        Partial2 = 2,
        /// Resource control
        Partial3 = 3,
        /// Not all records available
        Partial4 = 4,
        Failure = 5,
    }
}

int_enum! {
    /// State of the result set after a failed search
    pub enum ResultSetStatus {
        Subset = 1,
        Interim = 2,
        Empty = 3,
    }
}

int_enum! {
    pub enum DeleteFunction {
        List = 0,
        All = 1,
    }
}

// ============================================================================
// Shared structures
// ============================================================================

/// A server diagnostic record (`DefaultDiagFormat`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub diagnostic_set: Oid,
    pub code: i64,
    /// Mandatory on the wire; a server with nothing to add sends it empty
    pub add_info: String,
}

impl Diagnostic {
    pub fn bib1(code: i64, add_info: Option<&str>) -> Self {
        Self {
            diagnostic_set: Oid::from_arcs(BIB1_DIAGNOSTIC_SET),
            code,
            add_info: add_info.unwrap_or_default().to_string(),
        }
    }

    /// `add_info`, or `None` when the server sent nothing
    pub fn info(&self) -> Option<&str> {
        Some(self.add_info.as_str()).filter(|info| !info.is_empty())
    }

    /// Human-readable text for a Bib-1 condition
    pub fn describe(code: i64, add_info: Option<&str>) -> String {
        let mut text = match diagnostic_message(code) {
            Some(message) => format!("{message} ({code})"),
            None => format!("condition {code}"),
        };
        if let Some(info) = add_info {
            text.push_str(": ");
            text.push_str(info);
        }
        text
    }

    fn write(&self, out: &mut Vec<u8>, tag: Tag) {
        write_constructed(out, tag, |out| {
            write_oid(out, Tag::OBJECT_IDENTIFIER, &self.diagnostic_set);
            write_integer(out, Tag::INTEGER, self.code);
            write_string(out, Tag::VISIBLE_STRING, &self.add_info);
        });
    }

    /// Read the SEQUENCE content; the tag may be implicit
    fn read(tlv: Tlv<'_>) -> Result<Self> {
        let mut diagnostic_set = None;
        let mut code = None;
        let mut add_info = String::new();
        for child in tlv.children()? {
            match child.tag {
                Tag::OBJECT_IDENTIFIER => diagnostic_set = Some(child.oid()?),
                Tag::INTEGER => code = Some(child.integer()?),
                Tag::VISIBLE_STRING | Tag::GENERAL_STRING => {
                    add_info = child.string()?;
                }
                _ => {}
            }
        }
        Ok(Self {
            diagnostic_set: diagnostic_set.unwrap_or_else(|| Oid::from_arcs(BIB1_DIAGNOSTIC_SET)),
            code: code.ok_or_else(|| Error::malformed("diagnostic without condition"))?,
            add_info,
        })
    }

    /// `DiagRec`: only the default format is understood
    fn read_diag_rec(tlv: Tlv<'_>) -> Result<Self> {
        match tlv.tag {
            Tag::SEQUENCE => Self::read(tlv),
            Tag::EXTERNAL => Err(Error::malformed(
                "externally defined diagnostics are not supported",
            )),
            other => Err(Error::malformed(format!("bad DiagRec {other:?}"))),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.diagnostic_set.arcs() == BIB1_DIAGNOSTIC_SET {
            f.write_str(&Self::describe(self.code, self.info()))
        } else {
            write!(f, "condition {} in set {}", self.code, self.diagnostic_set)?;
            if let Some(info) = self.info() {
                write!(f, ": {info}")?;
            }
            Ok(())
        }
    }
}

/// Exactly one complete BER element, as carried by `single-ASN1-type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asn1Element(Vec<u8>);

impl Asn1Element {
    /// Fails unless `bytes` hold one whole element and nothing after it
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        let (_, rest) = read_tlv(&bytes)?;
        if !rest.is_empty() {
            return Err(Error::malformed("trailing bytes after embedded element"));
        }
        Ok(Self(bytes))
    }

    /// A primitive string element
    pub fn string(tag: Tag, value: &str) -> Self {
        let mut bytes = Vec::new();
        write_string(&mut bytes, tag, value);
        Self(bytes)
    }

    pub fn tlv(&self) -> Result<Tlv<'_>> {
        read_tlv(&self.0).map(|(tlv, _)| tlv)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalEncoding {
    SingleAsn1Type(Asn1Element),
    OctetAligned(Vec<u8>),
    /// BIT STRING content, unused-bits octet first
    Arbitrary(Vec<u8>),
}

/// ASN.1 EXTERNAL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct External {
    pub direct_reference: Option<Oid>,
    pub encoding: ExternalEncoding,
}

impl External {
    pub fn octets(syntax: Oid, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            direct_reference: Some(syntax),
            encoding: ExternalEncoding::OctetAligned(bytes.into()),
        }
    }

    pub fn write(&self, out: &mut Vec<u8>, tag: Tag) {
        write_constructed(out, tag, |out| {
            if let Some(oid) = &self.direct_reference {
                write_oid(out, Tag::OBJECT_IDENTIFIER, oid);
            }
            match &self.encoding {
                ExternalEncoding::SingleAsn1Type(value) => {
                    write_constructed(out, EXTERNAL_SINGLE_ASN1, |out| {
                        out.extend_from_slice(value.as_bytes());
                    });
                }
                ExternalEncoding::OctetAligned(bytes) => {
                    write_primitive(out, EXTERNAL_OCTET_ALIGNED, bytes);
                }
                ExternalEncoding::Arbitrary(bits) => {
                    write_primitive(out, EXTERNAL_ARBITRARY, bits);
                }
            }
        });
    }

    /// Read the EXTERNAL content; the outer tag may be implicit
    pub fn read(tlv: Tlv<'_>) -> Result<Self> {
        let mut direct_reference = None;
        let mut encoding = None;
        for child in tlv.children()? {
            match child.tag {
                Tag::OBJECT_IDENTIFIER => direct_reference = Some(child.oid()?),
                Tag::INTEGER | OBJECT_DESCRIPTOR => {}
                EXTERNAL_SINGLE_ASN1 => {
                    let element = Asn1Element(child.inner()?.raw.to_vec());
                    encoding = Some(ExternalEncoding::SingleAsn1Type(element));
                }
                EXTERNAL_OCTET_ALIGNED => {
                    encoding = Some(ExternalEncoding::OctetAligned(child.octets()?));
                }
                EXTERNAL_ARBITRARY => {
                    encoding = Some(ExternalEncoding::Arbitrary(child.octets()?));
                }
                other => {
                    return Err(Error::malformed(format!("bad EXTERNAL element {other:?}")));
                }
            }
        }
        Ok(Self {
            direct_reference,
            encoding: encoding.ok_or_else(|| Error::malformed("EXTERNAL without encoding"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    Open(String),
    IdPass {
        group: Option<String>,
        user: Option<String>,
        password: Option<String>,
    },
    Anonymous,
}

impl Authentication {
    fn write(&self, out: &mut Vec<u8>) {
        write_constructed(out, ID_AUTHENTICATION, |out| match self {
            Authentication::Open(token) => write_string(out, Tag::VISIBLE_STRING, token),
            Authentication::IdPass {
                group,
                user,
                password,
            } => write_constructed(out, Tag::SEQUENCE, |out| {
                write_opt_string(out, ID_PASS_GROUP, group);
                write_opt_string(out, ID_PASS_USER, user);
                write_opt_string(out, ID_PASS_PASSWORD, password);
            }),
            Authentication::Anonymous => write_null(out, Tag::NULL),
        });
    }

    fn read(tlv: Tlv<'_>) -> Result<Self> {
        let inner = tlv.inner()?;
        match inner.tag {
            Tag::VISIBLE_STRING | Tag::GENERAL_STRING => Ok(Authentication::Open(inner.string()?)),
            Tag::SEQUENCE => {
                let mut group = None;
                let mut user = None;
                let mut password = None;
                for child in inner.children()? {
                    match child.tag {
                        ID_PASS_GROUP => group = Some(child.string()?),
                        ID_PASS_USER => user = Some(child.string()?),
                        ID_PASS_PASSWORD => password = Some(child.string()?),
                        _ => {}
                    }
                }
                Ok(Authentication::IdPass {
                    group,
                    user,
                    password,
                })
            }
            Tag::NULL => inner.null().map(|()| Authentication::Anonymous),
            other => Err(Error::malformed(format!("bad idAuthentication {other:?}"))),
        }
    }
}

/// Records carried by a search or present response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Records {
    ResponseRecords(Vec<NamePlusRecord>),
    NonSurrogateDiagnostic(Diagnostic),
    MultipleDiagnostics(Vec<Diagnostic>),
}

impl Records {
    /// The operation-level diagnostic, if the server sent one
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Records::ResponseRecords(_) => None,
            Records::NonSurrogateDiagnostic(diag) => Some(diag),
            Records::MultipleDiagnostics(diags) => diags.first(),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Records::ResponseRecords(records) => write_constructed(out, RESPONSE_RECORDS, |out| {
                for record in records {
                    record.write(out);
                }
            }),
            Records::NonSurrogateDiagnostic(diag) => diag.write(out, NON_SURROGATE_DIAGNOSTIC),
            Records::MultipleDiagnostics(diags) => {
                write_constructed(out, MULTIPLE_DIAGNOSTICS, |out| {
                    for diag in diags {
                        diag.write(out, Tag::SEQUENCE);
                    }
                });
            }
        }
    }

    fn read(tlv: Tlv<'_>) -> Result<Self> {
        match tlv.tag {
            RESPONSE_RECORDS => Ok(Records::ResponseRecords(
                tlv.children()?
                    .into_iter()
                    .map(NamePlusRecord::read)
                    .collect::<Result<Vec<_>>>()?,
            )),
            NON_SURROGATE_DIAGNOSTIC => Ok(Records::NonSurrogateDiagnostic(Diagnostic::read(tlv)?)),
            MULTIPLE_DIAGNOSTICS => Ok(Records::MultipleDiagnostics(
                tlv.children()?
                    .into_iter()
                    .map(Diagnostic::read_diag_rec)
                    .collect::<Result<Vec<_>>>()?,
            )),
            other => Err(Error::malformed(format!("bad Records {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePlusRecord {
    pub database: Option<String>,
    pub record: RecordPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    Retrieval(External),
    SurrogateDiagnostic(Diagnostic),
}

impl NamePlusRecord {
    fn write(&self, out: &mut Vec<u8>) {
        write_constructed(out, Tag::SEQUENCE, |out| {
            write_opt_string(out, RECORD_DATABASE, &self.database);
            write_constructed(out, RECORD, |out| match &self.record {
                RecordPayload::Retrieval(external) => {
                    write_constructed(out, RETRIEVAL_RECORD, |out| {
                        external.write(out, Tag::EXTERNAL);
                    });
                }
                RecordPayload::SurrogateDiagnostic(diag) => {
                    write_constructed(out, SURROGATE_DIAGNOSTIC, |out| {
                        diag.write(out, Tag::SEQUENCE);
                    });
                }
            });
        });
    }

    fn read(tlv: Tlv<'_>) -> Result<Self> {
        let mut database = None;
        let mut record = None;
        for child in tlv.expect(Tag::SEQUENCE)?.children()? {
            match child.tag {
                RECORD_DATABASE => database = Some(child.string()?),
                RECORD => {
                    let choice = child.inner()?;
                    record = Some(match choice.tag {
                        RETRIEVAL_RECORD => RecordPayload::Retrieval(External::read(
                            choice.inner()?.expect(Tag::EXTERNAL)?,
                        )?),
                        SURROGATE_DIAGNOSTIC => RecordPayload::SurrogateDiagnostic(
                            Diagnostic::read_diag_rec(choice.inner()?)?,
                        ),
                        other => {
                            return Err(Error::malformed(format!(
                                "unsupported record form {other:?}"
                            )));
                        }
                    });
                }
                _ => {}
            }
        }
        Ok(Self {
            database,
            record: record.ok_or_else(|| Error::malformed("NamePlusRecord without record"))?,
        })
    }
}

// ============================================================================
// PDUs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRequest {
    pub reference_id: Option<Vec<u8>>,
    pub protocol_version: ProtocolVersion,
    pub options: InitOptions,
    pub preferred_message_size: i64,
    pub exceptional_record_size: i64,
    pub authentication: Option<Authentication>,
    pub implementation_id: Option<String>,
    pub implementation_name: Option<String>,
    pub implementation_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitResponse {
    pub reference_id: Option<Vec<u8>>,
    pub protocol_version: ProtocolVersion,
    pub options: InitOptions,
    pub preferred_message_size: i64,
    pub exceptional_record_size: i64,
    pub result: bool,
    pub implementation_id: Option<String>,
    pub implementation_name: Option<String>,
    pub implementation_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub reference_id: Option<Vec<u8>>,
    pub small_set_upper_bound: i64,
    pub large_set_lower_bound: i64,
    pub medium_set_present_number: i64,
    pub replace_indicator: bool,
    pub result_set_name: String,
    pub database_names: Vec<String>,
    pub small_set_element_set_name: Option<String>,
    pub medium_set_element_set_name: Option<String>,
    pub preferred_record_syntax: Option<Oid>,
    pub query: StructuredQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    pub reference_id: Option<Vec<u8>>,
    pub result_count: i64,
    pub number_of_records_returned: i64,
    pub next_result_set_position: i64,
    pub search_status: bool,
    pub result_set_status: Option<ResultSetStatus>,
    pub present_status: Option<PresentStatus>,
    pub records: Option<Records>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentRequest {
    pub reference_id: Option<Vec<u8>>,
    pub result_set_id: String,
    /// 1-based
    pub start_point: i64,
    pub number_requested: i64,
    pub element_set_name: Option<String>,
    pub preferred_record_syntax: Option<Oid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentResponse {
    pub reference_id: Option<Vec<u8>>,
    pub number_of_records_returned: i64,
    pub next_result_set_position: i64,
    pub present_status: PresentStatus,
    pub records: Option<Records>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResultSetRequest {
    pub reference_id: Option<Vec<u8>>,
    pub function: DeleteFunction,
    pub result_sets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResultSetResponse {
    pub reference_id: Option<Vec<u8>>,
    /// `DeleteSetStatus`, 0 is success
    pub status: i64,
    pub number_not_deleted: Option<i64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    pub reference_id: Option<Vec<u8>>,
    pub reason: CloseReason,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    InitRequest(InitRequest),
    InitResponse(InitResponse),
    SearchRequest(SearchRequest),
    SearchResponse(SearchResponse),
    PresentRequest(PresentRequest),
    PresentResponse(PresentResponse),
    DeleteResultSetRequest(DeleteResultSetRequest),
    DeleteResultSetResponse(DeleteResultSetResponse),
    Close(Close),
}

impl Pdu {
    pub fn name(&self) -> &'static str {
        match self {
            Pdu::InitRequest(_) => "InitRequest",
            Pdu::InitResponse(_) => "InitResponse",
            Pdu::SearchRequest(_) => "SearchRequest",
            Pdu::SearchResponse(_) => "SearchResponse",
            Pdu::PresentRequest(_) => "PresentRequest",
            Pdu::PresentResponse(_) => "PresentResponse",
            Pdu::DeleteResultSetRequest(_) => "DeleteResultSetRequest",
            Pdu::DeleteResultSetResponse(_) => "DeleteResultSetResponse",
            Pdu::Close(_) => "Close",
        }
    }

    fn tag(&self) -> PduTag {
        match self {
            Pdu::InitRequest(_) => PduTag::InitRequest,
            Pdu::InitResponse(_) => PduTag::InitResponse,
            Pdu::SearchRequest(_) => PduTag::SearchRequest,
            Pdu::SearchResponse(_) => PduTag::SearchResponse,
            Pdu::PresentRequest(_) => PduTag::PresentRequest,
            Pdu::PresentResponse(_) => PduTag::PresentResponse,
            Pdu::DeleteResultSetRequest(_) => PduTag::DeleteResultSetRequest,
            Pdu::DeleteResultSetResponse(_) => PduTag::DeleteResultSetResponse,
            Pdu::Close(_) => PduTag::Close,
        }
    }
}

/// Encode a PDU into a fresh buffer
pub fn encode(pdu: &Pdu) -> Vec<u8> {
    let mut out = Vec::new();
    write_pdu(&mut out, pdu);
    out
}

/// Append the encoding of `pdu` to `out`
pub fn write_pdu(out: &mut Vec<u8>, pdu: &Pdu) {
    write_constructed(out, Tag::context_constructed(pdu.tag() as u32), |out| match pdu {
        Pdu::InitRequest(init) => {
            write_reference_id(out, &init.reference_id);
            write_bits(out, PROTOCOL_VERSION, init.protocol_version.bits());
            write_bits(out, OPTIONS, init.options.bits());
            write_integer(out, PREFERRED_MESSAGE_SIZE, init.preferred_message_size);
            write_integer(out, EXCEPTIONAL_RECORD_SIZE, init.exceptional_record_size);
            if let Some(auth) = &init.authentication {
                auth.write(out);
            }
            write_opt_string(out, IMPLEMENTATION_ID, &init.implementation_id);
            write_opt_string(out, IMPLEMENTATION_NAME, &init.implementation_name);
            write_opt_string(out, IMPLEMENTATION_VERSION, &init.implementation_version);
        }
        Pdu::InitResponse(init) => {
            write_reference_id(out, &init.reference_id);
            write_bits(out, PROTOCOL_VERSION, init.protocol_version.bits());
            write_bits(out, OPTIONS, init.options.bits());
            write_integer(out, PREFERRED_MESSAGE_SIZE, init.preferred_message_size);
            write_integer(out, EXCEPTIONAL_RECORD_SIZE, init.exceptional_record_size);
            write_boolean(out, INIT_RESULT, init.result);
            write_opt_string(out, IMPLEMENTATION_ID, &init.implementation_id);
            write_opt_string(out, IMPLEMENTATION_NAME, &init.implementation_name);
            write_opt_string(out, IMPLEMENTATION_VERSION, &init.implementation_version);
        }
        Pdu::SearchRequest(search) => {
            write_reference_id(out, &search.reference_id);
            write_integer(out, SMALL_SET_UPPER_BOUND, search.small_set_upper_bound);
            write_integer(out, LARGE_SET_LOWER_BOUND, search.large_set_lower_bound);
            write_integer(out, MEDIUM_SET_PRESENT_NUMBER, search.medium_set_present_number);
            write_boolean(out, REPLACE_INDICATOR, search.replace_indicator);
            write_string(out, RESULT_SET_NAME, &search.result_set_name);
            write_constructed(out, DATABASE_NAMES, |out| {
                for name in &search.database_names {
                    write_string(out, DATABASE_NAME, name);
                }
            });
            write_element_set_names(
                out,
                SMALL_SET_ELEMENT_SET_NAMES,
                &search.small_set_element_set_name,
            );
            write_element_set_names(
                out,
                MEDIUM_SET_ELEMENT_SET_NAMES,
                &search.medium_set_element_set_name,
            );
            if let Some(oid) = &search.preferred_record_syntax {
                write_oid(out, PREFERRED_RECORD_SYNTAX, oid);
            }
            write_constructed(out, QUERY, |out| write_query(out, &search.query));
        }
        Pdu::SearchResponse(search) => {
            write_reference_id(out, &search.reference_id);
            write_integer(out, RESULT_COUNT, search.result_count);
            write_integer(out, NUMBER_OF_RECORDS_RETURNED, search.number_of_records_returned);
            write_integer(out, NEXT_RESULT_SET_POSITION, search.next_result_set_position);
            write_boolean(out, SEARCH_STATUS, search.search_status);
            if let Some(status) = search.result_set_status {
                write_integer(out, RESULT_SET_STATUS, status.as_i64());
            }
            if let Some(status) = search.present_status {
                write_integer(out, PRESENT_STATUS, status.as_i64());
            }
            if let Some(records) = &search.records {
                records.write(out);
            }
        }
        Pdu::PresentRequest(present) => {
            write_reference_id(out, &present.reference_id);
            write_string(out, RESULT_SET_ID, &present.result_set_id);
            write_integer(out, START_POINT, present.start_point);
            write_integer(out, NUMBER_REQUESTED, present.number_requested);
            write_element_set_names(out, SIMPLE_COMPOSITION, &present.element_set_name);
            if let Some(oid) = &present.preferred_record_syntax {
                write_oid(out, PREFERRED_RECORD_SYNTAX, oid);
            }
        }
        Pdu::PresentResponse(present) => {
            write_reference_id(out, &present.reference_id);
            write_integer(out, NUMBER_OF_RECORDS_RETURNED, present.number_of_records_returned);
            write_integer(out, NEXT_RESULT_SET_POSITION, present.next_result_set_position);
            write_integer(out, PRESENT_STATUS, present.present_status.as_i64());
            if let Some(records) = &present.records {
                records.write(out);
            }
        }
        Pdu::DeleteResultSetRequest(delete) => {
            write_reference_id(out, &delete.reference_id);
            write_integer(out, DELETE_FUNCTION, delete.function.as_i64());
            if !delete.result_sets.is_empty() {
                write_constructed(out, Tag::SEQUENCE, |out| {
                    for name in &delete.result_sets {
                        write_string(out, RESULT_SET_ID, name);
                    }
                });
            }
        }
        Pdu::DeleteResultSetResponse(delete) => {
            write_reference_id(out, &delete.reference_id);
            write_integer(out, DELETE_STATUS, delete.status);
            if let Some(count) = delete.number_not_deleted {
                write_integer(out, NUMBER_NOT_DELETED, count);
            }
            write_opt_string(out, DELETE_MESSAGE, &delete.message);
        }
        Pdu::Close(close) => {
            write_reference_id(out, &close.reference_id);
            write_integer(out, CLOSE_REASON, close.reason.as_i64());
            write_opt_string(out, DIAGNOSTIC_INFORMATION, &close.message);
        }
    });
}

fn write_reference_id(out: &mut Vec<u8>, reference_id: &Option<Vec<u8>>) {
    if let Some(id) = reference_id {
        write_primitive(out, REFERENCE_ID, id);
    }
}

fn write_opt_string(out: &mut Vec<u8>, tag: Tag, value: &Option<String>) {
    if let Some(value) = value {
        write_string(out, tag, value);
    }
}

fn write_element_set_names(out: &mut Vec<u8>, tag: Tag, name: &Option<String>) {
    if let Some(name) = name {
        write_constructed(out, tag, |out| {
            write_string(out, GENERIC_ELEMENT_SET_NAME, name);
        });
    }
}

/// Decode exactly one PDU.
///
/// A buffer holding less than a full PDU fails with `Error::Incomplete`;
/// bytes after the PDU are an error.
pub fn decode(data: &[u8]) -> Result<Pdu> {
    let (tlv, rest) = read_element(data)?;
    if !rest.is_empty() {
        return Err(Error::malformed(format!(
            "{} trailing bytes after PDU",
            rest.len()
        )));
    }
    read_pdu(tlv)
}

/// Decode a framed PDU element
pub fn read_pdu(tlv: Tlv<'_>) -> Result<Pdu> {
    if tlv.tag.class != Class::Context || !tlv.tag.constructed {
        return Err(Error::malformed(format!("not a PDU: {:?}", tlv.tag)));
    }
    let Some(tag) = PduTag::from_u32(tlv.tag.number) else {
        return Err(Error::malformed(format!("unknown PDU tag {}", tlv.tag.number)));
    };
    let fields = tlv.children()?;

    match tag {
        PduTag::InitRequest => read_init_request(&fields).map(Pdu::InitRequest),
        PduTag::InitResponse => read_init_response(&fields).map(Pdu::InitResponse),
        PduTag::SearchRequest => read_search_request(&fields).map(Pdu::SearchRequest),
        PduTag::SearchResponse => read_search_response(&fields).map(Pdu::SearchResponse),
        PduTag::PresentRequest => read_present_request(&fields).map(Pdu::PresentRequest),
        PduTag::PresentResponse => read_present_response(&fields).map(Pdu::PresentResponse),
        PduTag::DeleteResultSetRequest => {
            read_delete_request(&fields).map(Pdu::DeleteResultSetRequest)
        }
        PduTag::DeleteResultSetResponse => {
            read_delete_response(&fields).map(Pdu::DeleteResultSetResponse)
        }
        PduTag::Close => read_close(&fields).map(Pdu::Close),
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| Error::malformed(format!("missing {field}")))
}

fn is_records(tag: Tag) -> bool {
    tag == RESPONSE_RECORDS || tag == NON_SURROGATE_DIAGNOSTIC || tag == MULTIPLE_DIAGNOSTICS
}

fn read_element_set_names(tlv: Tlv<'_>) -> Result<Option<String>> {
    let choice = tlv.inner()?;
    if choice.tag == GENERIC_ELEMENT_SET_NAME {
        Ok(Some(choice.string()?))
    } else {
        Ok(None)
    }
}

/// Fields shared by InitializeRequest and InitializeResponse
#[derive(Default)]
struct InitFields {
    reference_id: Option<Vec<u8>>,
    protocol_version: Option<u32>,
    options: Option<u32>,
    preferred_message_size: Option<i64>,
    exceptional_record_size: Option<i64>,
    authentication: Option<Authentication>,
    result: Option<bool>,
    implementation_id: Option<String>,
    implementation_name: Option<String>,
    implementation_version: Option<String>,
}

fn read_init_fields(fields: &[Tlv<'_>]) -> Result<InitFields> {
    let mut init = InitFields::default();
    for field in fields {
        match field.tag {
            REFERENCE_ID => init.reference_id = Some(field.octets()?),
            PROTOCOL_VERSION => init.protocol_version = Some(field.bits()?),
            OPTIONS => init.options = Some(field.bits()?),
            PREFERRED_MESSAGE_SIZE => init.preferred_message_size = Some(field.integer()?),
            EXCEPTIONAL_RECORD_SIZE => init.exceptional_record_size = Some(field.integer()?),
            ID_AUTHENTICATION => init.authentication = Some(Authentication::read(*field)?),
            INIT_RESULT => init.result = Some(field.boolean()?),
            IMPLEMENTATION_ID => init.implementation_id = Some(field.string()?),
            IMPLEMENTATION_NAME => init.implementation_name = Some(field.string()?),
            IMPLEMENTATION_VERSION => init.implementation_version = Some(field.string()?),
            _ => {}
        }
    }
    Ok(init)
}

fn read_init_request(fields: &[Tlv<'_>]) -> Result<InitRequest> {
    let init = read_init_fields(fields)?;
    Ok(InitRequest {
        reference_id: init.reference_id,
        protocol_version: ProtocolVersion::from_bits_retain(required(
            init.protocol_version,
            "protocolVersion",
        )?),
        options: InitOptions::from_bits_retain(required(init.options, "options")?),
        preferred_message_size: required(init.preferred_message_size, "preferredMessageSize")?,
        exceptional_record_size: required(init.exceptional_record_size, "exceptionalRecordSize")?,
        authentication: init.authentication,
        implementation_id: init.implementation_id,
        implementation_name: init.implementation_name,
        implementation_version: init.implementation_version,
    })
}

fn read_init_response(fields: &[Tlv<'_>]) -> Result<InitResponse> {
    let init = read_init_fields(fields)?;
    Ok(InitResponse {
        reference_id: init.reference_id,
        protocol_version: ProtocolVersion::from_bits_retain(required(
            init.protocol_version,
            "protocolVersion",
        )?),
        options: InitOptions::from_bits_retain(required(init.options, "options")?),
        preferred_message_size: required(init.preferred_message_size, "preferredMessageSize")?,
        exceptional_record_size: required(init.exceptional_record_size, "exceptionalRecordSize")?,
        result: required(init.result, "result")?,
        implementation_id: init.implementation_id,
        implementation_name: init.implementation_name,
        implementation_version: init.implementation_version,
    })
}

fn read_search_request(fields: &[Tlv<'_>]) -> Result<SearchRequest> {
    let mut reference_id = None;
    let mut small_set_upper_bound = None;
    let mut large_set_lower_bound = None;
    let mut medium_set_present_number = None;
    let mut replace_indicator = None;
    let mut result_set_name = None;
    let mut database_names = None;
    let mut small_set_element_set_name = None;
    let mut medium_set_element_set_name = None;
    let mut preferred_record_syntax = None;
    let mut query = None;

    for field in fields {
        match field.tag {
            REFERENCE_ID => reference_id = Some(field.octets()?),
            SMALL_SET_UPPER_BOUND => small_set_upper_bound = Some(field.integer()?),
            LARGE_SET_LOWER_BOUND => large_set_lower_bound = Some(field.integer()?),
            MEDIUM_SET_PRESENT_NUMBER => medium_set_present_number = Some(field.integer()?),
            REPLACE_INDICATOR => replace_indicator = Some(field.boolean()?),
            RESULT_SET_NAME => result_set_name = Some(field.string()?),
            DATABASE_NAMES => {
                database_names = Some(
                    field
                        .children()?
                        .into_iter()
                        .map(|name| name.expect(DATABASE_NAME)?.string())
                        .collect::<Result<Vec<_>>>()?,
                );
            }
            SMALL_SET_ELEMENT_SET_NAMES => {
                small_set_element_set_name = read_element_set_names(*field)?;
            }
            MEDIUM_SET_ELEMENT_SET_NAMES => {
                medium_set_element_set_name = read_element_set_names(*field)?;
            }
            PREFERRED_RECORD_SYNTAX => preferred_record_syntax = Some(field.oid()?),
            QUERY => query = Some(read_query(field.inner()?)?),
            _ => {}
        }
    }

    Ok(SearchRequest {
        reference_id,
        small_set_upper_bound: required(small_set_upper_bound, "smallSetUpperBound")?,
        large_set_lower_bound: required(large_set_lower_bound, "largeSetLowerBound")?,
        medium_set_present_number: required(
            medium_set_present_number,
            "mediumSetPresentNumber",
        )?,
        replace_indicator: required(replace_indicator, "replaceIndicator")?,
        result_set_name: required(result_set_name, "resultSetName")?,
        database_names: required(database_names, "databaseNames")?,
        small_set_element_set_name,
        medium_set_element_set_name,
        preferred_record_syntax,
        query: required(query, "query")?,
    })
}

fn read_search_response(fields: &[Tlv<'_>]) -> Result<SearchResponse> {
    let mut reference_id = None;
    let mut result_count = None;
    let mut number_of_records_returned = None;
    let mut next_result_set_position = None;
    let mut search_status = None;
    let mut result_set_status = None;
    let mut present_status = None;
    let mut records = None;

    for field in fields {
        match field.tag {
            REFERENCE_ID => reference_id = Some(field.octets()?),
            RESULT_COUNT => result_count = Some(field.integer()?),
            NUMBER_OF_RECORDS_RETURNED => number_of_records_returned = Some(field.integer()?),
            NEXT_RESULT_SET_POSITION => next_result_set_position = Some(field.integer()?),
            SEARCH_STATUS => search_status = Some(field.boolean()?),
            RESULT_SET_STATUS => {
                let value = field.integer()?;
                result_set_status = Some(ResultSetStatus::from_i64(value).ok_or_else(|| {
                    Error::malformed(format!("bad resultSetStatus {value}"))
                })?);
            }
            PRESENT_STATUS => present_status = Some(read_present_status(*field)?),
            tag if is_records(tag) => records = Some(Records::read(*field)?),
            _ => {}
        }
    }

    Ok(SearchResponse {
        reference_id,
        result_count: required(result_count, "resultCount")?,
        number_of_records_returned: required(
            number_of_records_returned,
            "numberOfRecordsReturned",
        )?,
        next_result_set_position: required(next_result_set_position, "nextResultSetPosition")?,
        search_status: required(search_status, "searchStatus")?,
        result_set_status,
        present_status,
        records,
    })
}

fn read_present_status(tlv: Tlv<'_>) -> Result<PresentStatus> {
    let value = tlv.integer()?;
    PresentStatus::from_i64(value)
        .ok_or_else(|| Error::malformed(format!("bad presentStatus {value}")))
}

fn read_present_request(fields: &[Tlv<'_>]) -> Result<PresentRequest> {
    let mut reference_id = None;
    let mut result_set_id = None;
    let mut start_point = None;
    let mut number_requested = None;
    let mut element_set_name = None;
    let mut preferred_record_syntax = None;

    for field in fields {
        match field.tag {
            REFERENCE_ID => reference_id = Some(field.octets()?),
            RESULT_SET_ID => result_set_id = Some(field.string()?),
            START_POINT => start_point = Some(field.integer()?),
            NUMBER_REQUESTED => number_requested = Some(field.integer()?),
            SIMPLE_COMPOSITION => element_set_name = read_element_set_names(*field)?,
            PREFERRED_RECORD_SYNTAX => preferred_record_syntax = Some(field.oid()?),
            _ => {}
        }
    }

    Ok(PresentRequest {
        reference_id,
        result_set_id: required(result_set_id, "resultSetId")?,
        start_point: required(start_point, "resultSetStartPoint")?,
        number_requested: required(number_requested, "numberOfRecordsRequested")?,
        element_set_name,
        preferred_record_syntax,
    })
}

fn read_present_response(fields: &[Tlv<'_>]) -> Result<PresentResponse> {
    let mut reference_id = None;
    let mut number_of_records_returned = None;
    let mut next_result_set_position = None;
    let mut present_status = None;
    let mut records = None;

    for field in fields {
        match field.tag {
            REFERENCE_ID => reference_id = Some(field.octets()?),
            NUMBER_OF_RECORDS_RETURNED => number_of_records_returned = Some(field.integer()?),
            NEXT_RESULT_SET_POSITION => next_result_set_position = Some(field.integer()?),
            PRESENT_STATUS => present_status = Some(read_present_status(*field)?),
            tag if is_records(tag) => records = Some(Records::read(*field)?),
            _ => {}
        }
    }

    Ok(PresentResponse {
        reference_id,
        number_of_records_returned: required(
            number_of_records_returned,
            "numberOfRecordsReturned",
        )?,
        next_result_set_position: required(next_result_set_position, "nextResultSetPosition")?,
        present_status: required(present_status, "presentStatus")?,
        records,
    })
}

fn read_delete_request(fields: &[Tlv<'_>]) -> Result<DeleteResultSetRequest> {
    let mut reference_id = None;
    let mut function = None;
    let mut result_sets = Vec::new();

    for field in fields {
        match field.tag {
            REFERENCE_ID => reference_id = Some(field.octets()?),
            DELETE_FUNCTION => {
                let value = field.integer()?;
                function = Some(DeleteFunction::from_i64(value).ok_or_else(|| {
                    Error::malformed(format!("bad deleteFunction {value}"))
                })?);
            }
            Tag::SEQUENCE => {
                result_sets = field
                    .children()?
                    .into_iter()
                    .map(|name| name.expect(RESULT_SET_ID)?.string())
                    .collect::<Result<Vec<_>>>()?;
            }
            _ => {}
        }
    }

    Ok(DeleteResultSetRequest {
        reference_id,
        function: required(function, "deleteFunction")?,
        result_sets,
    })
}

fn read_delete_response(fields: &[Tlv<'_>]) -> Result<DeleteResultSetResponse> {
    let mut reference_id = None;
    let mut status = None;
    let mut number_not_deleted = None;
    let mut message = None;

    for field in fields {
        match field.tag {
            REFERENCE_ID => reference_id = Some(field.octets()?),
            DELETE_STATUS => status = Some(field.integer()?),
            NUMBER_NOT_DELETED => number_not_deleted = Some(field.integer()?),
            DELETE_MESSAGE => message = Some(field.string()?),
            _ => {}
        }
    }

    Ok(DeleteResultSetResponse {
        reference_id,
        status: required(status, "deleteOperationStatus")?,
        number_not_deleted,
        message,
    })
}

fn read_close(fields: &[Tlv<'_>]) -> Result<Close> {
    let mut reference_id = None;
    let mut reason = None;
    let mut message = None;

    for field in fields {
        match field.tag {
            REFERENCE_ID => reference_id = Some(field.octets()?),
            // Reasons outside the registered range are reported as unspecified
            CLOSE_REASON => {
                reason = Some(
                    CloseReason::from_i64(field.integer()?).unwrap_or(CloseReason::Unspecified),
                );
            }
            DIAGNOSTIC_INFORMATION => message = Some(field.string()?),
            _ => {}
        }
    }

    Ok(Close {
        reference_id,
        reason: required(reason, "closeReason")?,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::{CQL_USERINFO, OPTIONS_ALWAYS_REQUESTED};
    use crate::protocol::query::{QueryType, build};
    use pretty_assertions::assert_eq;

    fn usmarc() -> Oid {
        "1.2.840.10003.5.10".parse().unwrap()
    }

    fn round_trip(pdu: Pdu) {
        let bytes = encode(&pdu);
        assert_eq!(decode(&bytes).unwrap(), pdu);
    }

    fn init_request() -> Pdu {
        Pdu::InitRequest(InitRequest {
            reference_id: Some(b"ref-1".to_vec()),
            protocol_version: ProtocolVersion::V2 | ProtocolVersion::V3,
            options: OPTIONS_ALWAYS_REQUESTED | InitOptions::NAMED_RESULT_SETS,
            preferred_message_size: 1024 * 1024,
            exceptional_record_size: 1024 * 1024,
            authentication: Some(Authentication::IdPass {
                group: None,
                user: Some("alice".to_string()),
                password: Some("secret".to_string()),
            }),
            implementation_id: Some("zero-z3950".to_string()),
            implementation_name: Some("zero-z3950".to_string()),
            implementation_version: Some("0.1.0".to_string()),
        })
    }

    #[test]
    fn close_known_bytes() {
        let pdu = Pdu::Close(Close {
            reference_id: None,
            reason: CloseReason::Finished,
            message: None,
        });
        assert_eq!(encode(&pdu), [0xBF, 0x30, 0x05, 0x9F, 0x81, 0x53, 0x01, 0x00]);
        round_trip(pdu);
    }

    #[test]
    fn init_round_trip() {
        round_trip(init_request());
        round_trip(Pdu::InitResponse(InitResponse {
            reference_id: None,
            protocol_version: ProtocolVersion::V2 | ProtocolVersion::V3,
            options: OPTIONS_ALWAYS_REQUESTED,
            preferred_message_size: 65536,
            exceptional_record_size: 65536,
            result: false,
            implementation_id: Some("81".to_string()),
            implementation_name: None,
            implementation_version: None,
        }));
    }

    #[test]
    fn search_request_round_trip() {
        let query = build(
            "@attrset bib-1 @or @attr 1=4 \"big dig\" @prox 1 2 0 3 p 8 @set rs1 @term numeric 7",
            QueryType::Prefix,
        )
        .unwrap();
        round_trip(Pdu::SearchRequest(SearchRequest {
            reference_id: None,
            small_set_upper_bound: 0,
            large_set_lower_bound: 1,
            medium_set_present_number: 0,
            replace_indicator: true,
            result_set_name: "rs1".to_string(),
            database_names: vec!["voyager".to_string(), "other".to_string()],
            small_set_element_set_name: Some("F".to_string()),
            medium_set_element_set_name: Some("B".to_string()),
            preferred_record_syntax: Some(usmarc()),
            query,
        }));
    }

    #[test]
    fn search_response_with_records() {
        round_trip(Pdu::SearchResponse(SearchResponse {
            reference_id: None,
            result_count: 3,
            number_of_records_returned: 2,
            next_result_set_position: 3,
            search_status: true,
            result_set_status: None,
            present_status: Some(PresentStatus::Partial4),
            records: Some(Records::ResponseRecords(vec![
                NamePlusRecord {
                    database: Some("voyager".to_string()),
                    record: RecordPayload::Retrieval(External::octets(
                        usmarc(),
                        b"00714cam".to_vec(),
                    )),
                },
                NamePlusRecord {
                    database: None,
                    record: RecordPayload::SurrogateDiagnostic(Diagnostic::bib1(
                        14,
                        Some("record 2"),
                    )),
                },
            ])),
        }));
    }

    #[test]
    fn search_failure_round_trip() {
        round_trip(Pdu::SearchResponse(SearchResponse {
            reference_id: None,
            result_count: 0,
            number_of_records_returned: 0,
            next_result_set_position: 0,
            search_status: false,
            result_set_status: Some(ResultSetStatus::Empty),
            present_status: None,
            records: Some(Records::NonSurrogateDiagnostic(Diagnostic::bib1(109, None))),
        }));
    }

    #[test]
    fn empty_addinfo_round_trip() {
        let diag = Diagnostic::bib1(109, Some(""));
        assert_eq!(diag, Diagnostic::bib1(109, None));
        assert_eq!(diag.info(), None);
        round_trip(Pdu::SearchResponse(SearchResponse {
            reference_id: None,
            result_count: 0,
            number_of_records_returned: 0,
            next_result_set_position: 0,
            search_status: false,
            result_set_status: None,
            present_status: None,
            records: Some(Records::NonSurrogateDiagnostic(diag)),
        }));
    }

    #[test]
    fn single_asn1_needs_one_element() {
        assert!(matches!(Asn1Element::new(b"abc".to_vec()), Err(Error::MalformedPdu(_))));
        assert!(matches!(Asn1Element::new(Vec::new()), Err(Error::MalformedPdu(_))));
        let mut two = Vec::new();
        write_string(&mut two, Tag::GENERAL_STRING, "a");
        write_string(&mut two, Tag::GENERAL_STRING, "b");
        assert!(matches!(Asn1Element::new(two), Err(Error::MalformedPdu(_))));

        let mut one = Vec::new();
        write_integer(&mut one, Tag::INTEGER, 42);
        let element = Asn1Element::new(one.clone()).unwrap();
        assert_eq!(element.tlv().unwrap().integer().unwrap(), 42);
        assert_eq!(element.as_bytes(), one.as_slice());
        round_trip(Pdu::PresentResponse(PresentResponse {
            reference_id: None,
            number_of_records_returned: 1,
            next_result_set_position: 2,
            present_status: PresentStatus::Success,
            records: Some(Records::ResponseRecords(vec![NamePlusRecord {
                database: Some("Default".to_string()),
                record: RecordPayload::Retrieval(External {
                    direct_reference: None,
                    encoding: ExternalEncoding::SingleAsn1Type(element),
                }),
            }])),
        }));
    }

    #[test]
    fn present_and_delete_round_trip() {
        round_trip(Pdu::PresentRequest(PresentRequest {
            reference_id: None,
            result_set_id: "default".to_string(),
            start_point: 1,
            number_requested: 3,
            element_set_name: Some("F".to_string()),
            preferred_record_syntax: Some(usmarc()),
        }));
        round_trip(Pdu::PresentResponse(PresentResponse {
            reference_id: None,
            number_of_records_returned: 0,
            next_result_set_position: 1,
            present_status: PresentStatus::Failure,
            records: Some(Records::MultipleDiagnostics(vec![
                Diagnostic::bib1(13, Some("4")),
                Diagnostic::bib1(14, None),
            ])),
        }));
        round_trip(Pdu::DeleteResultSetRequest(DeleteResultSetRequest {
            reference_id: None,
            function: DeleteFunction::List,
            result_sets: vec!["rs1".to_string()],
        }));
        round_trip(Pdu::DeleteResultSetResponse(DeleteResultSetResponse {
            reference_id: None,
            status: 0,
            number_not_deleted: Some(0),
            message: Some("ok".to_string()),
        }));
    }

    #[test]
    fn single_asn1_record_round_trip() {
        let sutrs = Asn1Element::string(Tag::GENERAL_STRING, "Title: dinosaurs");
        round_trip(Pdu::PresentResponse(PresentResponse {
            reference_id: None,
            number_of_records_returned: 1,
            next_result_set_position: 2,
            present_status: PresentStatus::Success,
            records: Some(Records::ResponseRecords(vec![NamePlusRecord {
                database: None,
                record: RecordPayload::Retrieval(External {
                    direct_reference: Some("1.2.840.10003.5.101".parse().unwrap()),
                    encoding: ExternalEncoding::SingleAsn1Type(sutrs),
                }),
            }])),
        }));
    }

    #[test]
    fn cql_query_uses_type_104() {
        let pdu = Pdu::SearchRequest(SearchRequest {
            reference_id: None,
            small_set_upper_bound: 0,
            large_set_lower_bound: 1,
            medium_set_present_number: 0,
            replace_indicator: true,
            result_set_name: "default".to_string(),
            database_names: vec!["Default".to_string()],
            small_set_element_set_name: None,
            medium_set_element_set_name: None,
            preferred_record_syntax: None,
            query: build("title=dinosaur", QueryType::Cql).unwrap(),
        });
        let bytes = encode(&pdu);
        let mut oid = Vec::new();
        write_oid(&mut oid, Tag::OBJECT_IDENTIFIER, &Oid::from_arcs(CQL_USERINFO));
        assert!(bytes.windows(oid.len()).any(|w| w == oid.as_slice()));
        assert_eq!(decode(&bytes).unwrap(), pdu);
    }

    #[test]
    fn every_prefix_is_incomplete() {
        let bytes = encode(&init_request());
        for len in 0..bytes.len() {
            assert!(
                matches!(decode(&bytes[..len]), Err(Error::Incomplete { .. })),
                "prefix of {len} bytes"
            );
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode(&init_request());
        bytes.push(0x00);
        assert!(matches!(decode(&bytes), Err(Error::MalformedPdu(_))));
    }

    #[test]
    fn unknown_pdu_tag_rejected() {
        // [49] resourceControlRequest is not supported
        let bytes = [0xBF, 0x31, 0x00];
        assert!(matches!(decode(&bytes), Err(Error::MalformedPdu(_))));
    }

    #[test]
    fn missing_mandatory_field_rejected() {
        let bytes = [0xBF, 0x30, 0x00];
        assert!(matches!(decode(&bytes), Err(Error::MalformedPdu(_))));
    }

    #[test]
    fn unknown_optional_fields_are_skipped() {
        let close = Close {
            reference_id: None,
            reason: CloseReason::Shutdown,
            message: Some("bye".to_string()),
        };
        let mut bytes = Vec::new();
        write_constructed(&mut bytes, Tag::context_constructed(48), |out| {
            write_integer(out, CLOSE_REASON, 1);
            write_string(out, DIAGNOSTIC_INFORMATION, "bye");
            // otherInfo [201]
            write_constructed(out, Tag::context_constructed(201), |out| {
                write_null(out, Tag::NULL);
            });
        });
        assert_eq!(decode(&bytes).unwrap(), Pdu::Close(close));
    }

    #[test]
    fn diagnostic_text() {
        let diag = Diagnostic::bib1(109, Some("voyager"));
        assert_eq!(diag.to_string(), "Database unavailable (109): voyager");
        assert_eq!(Diagnostic::describe(9999, None), "condition 9999");
    }
}
