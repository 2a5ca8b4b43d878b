//! BER primitives: identifiers, definite lengths and the universal types the
//! Z39.50 APDUs are built from.
//!
//! Readers follow the `read_x(data) -> Result<(value, rest)>` shape. Writers
//! append a complete TLV to `out`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub class: Class,
    pub constructed: bool,
    pub number: u32,
}

impl Tag {
    pub const BOOLEAN: Tag = Tag::universal(1);
    pub const INTEGER: Tag = Tag::universal(2);
    pub const BIT_STRING: Tag = Tag::universal(3);
    pub const OCTET_STRING: Tag = Tag::universal(4);
    pub const NULL: Tag = Tag::universal(5);
    pub const OBJECT_IDENTIFIER: Tag = Tag::universal(6);
    pub const EXTERNAL: Tag = Tag::universal_constructed(8);
    pub const SEQUENCE: Tag = Tag::universal_constructed(16);
    pub const VISIBLE_STRING: Tag = Tag::universal(26);
    pub const GENERAL_STRING: Tag = Tag::universal(27);

    pub const fn universal(number: u32) -> Self {
        Self {
            class: Class::Universal,
            constructed: false,
            number,
        }
    }

    pub const fn universal_constructed(number: u32) -> Self {
        Self {
            class: Class::Universal,
            constructed: true,
            number,
        }
    }

    pub const fn context(number: u32) -> Self {
        Self {
            class: Class::Context,
            constructed: false,
            number,
        }
    }

    pub const fn context_constructed(number: u32) -> Self {
        Self {
            class: Class::Context,
            constructed: true,
            number,
        }
    }
}

/// One element borrowed from a buffer. `raw` is the full encoding, header
/// included.
#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub tag: Tag,
    pub content: &'a [u8],
    pub raw: &'a [u8],
}

/// Parse identifier and length octets.
///
/// Returns `(tag, header_len, content_len)`. A buffer that ends inside the
/// header yields `Error::Incomplete`.
pub fn read_header(data: &[u8]) -> Result<(Tag, usize, usize)> {
    let Some(&first) = data.first() else {
        return Err(Error::Incomplete { needed: 1 });
    };

    let class = match first >> 6 {
        0 => Class::Universal,
        1 => Class::Application,
        2 => Class::Context,
        _ => Class::Private,
    };
    let constructed = first & 0x20 != 0;
    let mut pos = 1;

    let number = if first & 0x1F == 0x1F {
        let mut number: u32 = 0;
        loop {
            let Some(&byte) = data.get(pos) else {
                return Err(Error::Incomplete { needed: 1 });
            };
            pos += 1;
            if number > (u32::MAX >> 7) {
                return Err(Error::malformed("tag number overflow"));
            }
            number = (number << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                break;
            }
        }
        number
    } else {
        u32::from(first & 0x1F)
    };

    let Some(&len_byte) = data.get(pos) else {
        return Err(Error::Incomplete { needed: 1 });
    };
    pos += 1;

    let length = if len_byte < 0x80 {
        usize::from(len_byte)
    } else if len_byte == 0x80 {
        return Err(Error::malformed("indefinite length is not supported"));
    } else {
        let count = usize::from(len_byte & 0x7F);
        if count > 4 {
            return Err(Error::malformed("length field too long"));
        }
        let available = data.len().saturating_sub(pos);
        if available < count {
            return Err(Error::Incomplete {
                needed: count - available,
            });
        }
        let mut length: usize = 0;
        for &byte in &data[pos..pos + count] {
            length = (length << 8) | usize::from(byte);
        }
        pos += count;
        length
    };

    Ok((
        Tag {
            class,
            constructed,
            number,
        },
        pos,
        length,
    ))
}

/// Total encoded length of the element at the start of `data`, without
/// requiring the content to be present yet.
pub fn frame_length(data: &[u8], max_size: usize) -> Result<usize> {
    let (_, header_len, content_len) = read_header(data)?;
    let total = header_len
        .checked_add(content_len)
        .ok_or_else(|| Error::malformed("length overflow"))?;
    if total > max_size {
        return Err(Error::malformed(format!(
            "PDU of {total} bytes exceeds limit of {max_size}"
        )));
    }
    Ok(total)
}

/// Read one top-level element. A short buffer is `Incomplete`.
pub fn read_element(data: &[u8]) -> Result<(Tlv<'_>, &[u8])> {
    let (tag, header_len, content_len) = read_header(data)?;
    let total = header_len
        .checked_add(content_len)
        .ok_or_else(|| Error::malformed("length overflow"))?;
    if data.len() < total {
        return Err(Error::Incomplete {
            needed: total - data.len(),
        });
    }
    let tlv = Tlv {
        tag,
        content: &data[header_len..total],
        raw: &data[..total],
    };
    Ok((tlv, &data[total..]))
}

/// Read one nested element. Running out of bytes inside a container is a
/// structural error, not a request for more input.
pub fn read_tlv(data: &[u8]) -> Result<(Tlv<'_>, &[u8])> {
    read_element(data).map_err(|err| match err {
        Error::Incomplete { .. } => Error::malformed("element overruns its container"),
        other => other,
    })
}

impl<'a> Tlv<'a> {
    pub fn expect(self, tag: Tag) -> Result<Self> {
        if self.tag == tag {
            Ok(self)
        } else {
            Err(Error::malformed(format!(
                "expected {tag:?}, found {:?}",
                self.tag
            )))
        }
    }

    fn primitive(&self) -> Result<&'a [u8]> {
        if self.tag.constructed {
            return Err(Error::malformed(format!(
                "{:?} must be primitive",
                self.tag
            )));
        }
        Ok(self.content)
    }

    /// Child elements of a constructed element
    pub fn children(&self) -> Result<Vec<Tlv<'a>>> {
        if !self.tag.constructed {
            return Err(Error::malformed(format!(
                "{:?} must be constructed",
                self.tag
            )));
        }
        let mut children = Vec::new();
        let mut rest = self.content;
        while !rest.is_empty() {
            let (child, next) = read_tlv(rest)?;
            children.push(child);
            rest = next;
        }
        Ok(children)
    }

    /// The single element inside an explicit tag
    pub fn inner(&self) -> Result<Tlv<'a>> {
        let children = self.children()?;
        match children.as_slice() {
            [only] => Ok(*only),
            _ => Err(Error::malformed(format!(
                "{:?} must wrap exactly one element",
                self.tag
            ))),
        }
    }

    pub fn integer(&self) -> Result<i64> {
        let content = self.primitive()?;
        if content.is_empty() {
            return Err(Error::malformed("empty INTEGER"));
        }
        if content.len() > 8 {
            return Err(Error::malformed("INTEGER wider than 64 bits"));
        }
        let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
        for &byte in content {
            value = (value << 8) | i64::from(byte);
        }
        Ok(value)
    }

    pub fn boolean(&self) -> Result<bool> {
        match self.primitive()? {
            [byte] => Ok(*byte != 0),
            _ => Err(Error::malformed("BOOLEAN must be one octet")),
        }
    }

    pub fn null(&self) -> Result<()> {
        if self.primitive()?.is_empty() {
            Ok(())
        } else {
            Err(Error::malformed("NULL must be empty"))
        }
    }

    pub fn octets(&self) -> Result<Vec<u8>> {
        Ok(self.primitive()?.to_vec())
    }

    pub fn string(&self) -> Result<String> {
        Ok(bytes_to_string(self.primitive()?))
    }

    pub fn oid(&self) -> Result<Oid> {
        Oid::from_content(self.primitive()?)
    }

    /// BIT STRING as a mask where ASN.1 bit `n` is `1 << n`. A set bit past
    /// 31 is malformed; zero padding beyond that is accepted.
    pub fn bits(&self) -> Result<u32> {
        let content = self.primitive()?;
        let Some((&unused, data)) = content.split_first() else {
            return Err(Error::malformed("empty BIT STRING"));
        };
        if unused > 7 || (data.is_empty() && unused != 0) {
            return Err(Error::malformed("bad BIT STRING padding"));
        }
        if data.iter().skip(4).any(|&byte| byte != 0) {
            return Err(Error::malformed("BIT STRING sets a bit past 31"));
        }
        let mut mask = 0u32;
        for (index, &byte) in data.iter().take(4).enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    mask |= 1 << (index * 8 + bit);
                }
            }
        }
        Ok(mask)
    }
}

/// Decode string content. Z39.50 strings are nominally GeneralString; real
/// servers send Latin-1 or MARC-8 too, which is kept lossily.
pub fn bytes_to_string(bytes: &[u8]) -> String {
    match simdutf8::basic::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Write identifier octets
pub fn write_tag(out: &mut Vec<u8>, tag: Tag) {
    let class_bits = match tag.class {
        Class::Universal => 0x00,
        Class::Application => 0x40,
        Class::Context => 0x80,
        Class::Private => 0xC0,
    };
    let constructed_bit = if tag.constructed { 0x20 } else { 0x00 };

    if tag.number < 0x1F {
        out.push(class_bits | constructed_bit | tag.number as u8);
        return;
    }

    out.push(class_bits | constructed_bit | 0x1F);
    let mut groups = [0u8; 5];
    let mut count = 0;
    let mut number = tag.number;
    loop {
        groups[count] = (number & 0x7F) as u8;
        count += 1;
        number >>= 7;
        if number == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i == 0 { 0x00 } else { 0x80 };
        out.push(groups[i] | continuation);
    }
}

/// Write definite-form length octets
pub fn write_length(out: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = (length as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn length_bytes(length: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    write_length(&mut out, length);
    out
}

/// Write a primitive element
pub fn write_primitive(out: &mut Vec<u8>, tag: Tag, content: &[u8]) {
    write_tag(out, tag);
    write_length(out, content.len());
    out.extend_from_slice(content);
}

/// Write a constructed element whose content is produced by `f`
pub fn write_constructed<F>(out: &mut Vec<u8>, tag: Tag, f: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    write_tag(out, tag);
    let start = out.len();
    f(out);
    let length = out.len() - start;
    out.splice(start..start, length_bytes(length));
}

pub fn write_integer(out: &mut Vec<u8>, tag: Tag, value: i64) {
    let bytes = value.to_be_bytes();
    let mut skip = 0;
    while skip < 7 {
        let redundant = (bytes[skip] == 0x00 && bytes[skip + 1] & 0x80 == 0)
            || (bytes[skip] == 0xFF && bytes[skip + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        skip += 1;
    }
    write_primitive(out, tag, &bytes[skip..]);
}

pub fn write_boolean(out: &mut Vec<u8>, tag: Tag, value: bool) {
    write_primitive(out, tag, &[if value { 0xFF } else { 0x00 }]);
}

pub fn write_null(out: &mut Vec<u8>, tag: Tag) {
    write_primitive(out, tag, &[]);
}

pub fn write_string(out: &mut Vec<u8>, tag: Tag, value: &str) {
    write_primitive(out, tag, value.as_bytes());
}

pub fn write_oid(out: &mut Vec<u8>, tag: Tag, oid: &Oid) {
    write_primitive(out, tag, &oid.to_content());
}

pub fn write_bits(out: &mut Vec<u8>, tag: Tag, mask: u32) {
    if mask == 0 {
        write_primitive(out, tag, &[0x00]);
        return;
    }
    let bit_count = 32 - mask.leading_zeros() as usize;
    let byte_count = bit_count.div_ceil(8);
    let mut content = vec![0u8; byte_count + 1];
    content[0] = (byte_count * 8 - bit_count) as u8;
    for bit in 0..bit_count {
        if mask & (1 << bit) != 0 {
            content[1 + bit / 8] |= 0x80 >> (bit % 8);
        }
    }
    write_primitive(out, tag, &content);
}

/// OBJECT IDENTIFIER as its arcs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn from_arcs(arcs: &[u32]) -> Self {
        Self(arcs.to_vec())
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    fn to_content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut subidentifiers = Vec::with_capacity(self.0.len());
        match self.0.as_slice() {
            [first, second, rest @ ..] => {
                subidentifiers.push(u64::from(*first) * 40 + u64::from(*second));
                subidentifiers.extend(rest.iter().map(|&arc| u64::from(arc)));
            }
            [first] => subidentifiers.push(u64::from(*first) * 40),
            [] => {}
        }
        for value in subidentifiers {
            let mut groups = Vec::new();
            let mut v = value;
            loop {
                groups.push((v & 0x7F) as u8);
                v >>= 7;
                if v == 0 {
                    break;
                }
            }
            for (i, group) in groups.iter().enumerate().rev() {
                out.push(if i == 0 { *group } else { group | 0x80 });
            }
        }
        out
    }

    fn from_content(content: &[u8]) -> Result<Self> {
        if content.is_empty() {
            return Err(Error::malformed("empty OBJECT IDENTIFIER"));
        }
        if content.last().is_some_and(|b| b & 0x80 != 0) {
            return Err(Error::malformed("truncated OBJECT IDENTIFIER"));
        }
        let mut arcs = Vec::new();
        let mut value: u64 = 0;
        for &byte in content {
            value = (value << 7) | u64::from(byte & 0x7F);
            if value > u64::from(u32::MAX) + 80 {
                return Err(Error::malformed("OBJECT IDENTIFIER arc overflow"));
            }
            if byte & 0x80 == 0 {
                if arcs.is_empty() {
                    let (first, second) = match value {
                        0..40 => (0, value),
                        40..80 => (1, value - 40),
                        _ => (2, value - 80),
                    };
                    arcs.push(first);
                    arcs.push(
                        u32::try_from(second)
                            .map_err(|_err| Error::malformed("OBJECT IDENTIFIER arc overflow"))?,
                    );
                } else {
                    arcs.push(
                        u32::try_from(value)
                            .map_err(|_err| Error::malformed("OBJECT IDENTIFIER arc overflow"))?,
                    );
                }
                value = 0;
            }
        }
        Ok(Self(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let arcs = s
            .split('.')
            .map(|arc| arc.parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::BadConfigError(format!("invalid OID '{s}': {e}")))?;
        match arcs.as_slice() {
            [first, second, ..] if *first <= 2 && (*first == 2 || *second < 40) => Ok(Self(arcs)),
            _ => Err(Error::BadConfigError(format!("invalid OID '{s}'"))),
        }
    }
}
