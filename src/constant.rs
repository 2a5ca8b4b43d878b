use crate::protocol::ber::Oid;

/// Default Z39.50 port (IANA `z39.50`)
pub const DEFAULT_PORT: u16 = 210;

/// Database searched when the target descriptor names none
pub const DEFAULT_DATABASE: &str = "Default";

/// Result-set name used when the server does not grant named result sets
pub const DEFAULT_RESULT_SET_NAME: &str = "default";

pub const DEFAULT_PREFERRED_MESSAGE_SIZE: i64 = 1024 * 1024;
pub const DEFAULT_EXCEPTIONAL_RECORD_SIZE: i64 = 1024 * 1024;

/// Upper bound on a single incoming PDU
pub const DEFAULT_MAX_PDU_SIZE: usize = 64 * 1024 * 1024;

pub const IMPLEMENTATION_ID: &str = "zero-z3950";
pub const IMPLEMENTATION_NAME: &str = "zero-z3950";

/// Z39.50 APDU tags (context class, constructed)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduTag {
    InitRequest = 20,
    InitResponse = 21,
    SearchRequest = 22,
    SearchResponse = 23,
    PresentRequest = 24,
    PresentResponse = 25,
    DeleteResultSetRequest = 26,
    DeleteResultSetResponse = 27,
    Close = 48,
}

impl PduTag {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            20 => Some(Self::InitRequest),
            21 => Some(Self::InitResponse),
            22 => Some(Self::SearchRequest),
            23 => Some(Self::SearchResponse),
            24 => Some(Self::PresentRequest),
            25 => Some(Self::PresentResponse),
            26 => Some(Self::DeleteResultSetRequest),
            27 => Some(Self::DeleteResultSetResponse),
            48 => Some(Self::Close),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// InitializeRequest/Response `options` bit string. Bit `n` of the
    /// ASN.1 BIT STRING is `1 << n` here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InitOptions: u32 {
        const SEARCH = 1 << 0;
        const PRESENT = 1 << 1;
        const DEL_SET = 1 << 2;
        const RESOURCE_REPORT = 1 << 3;
        const TRIGGER_RESOURCE_CTRL = 1 << 4;
        const RESOURCE_CTRL = 1 << 5;
        const ACCESS_CTRL = 1 << 6;
        const SCAN = 1 << 7;
        const SORT = 1 << 8;
        const EXTENDED_SERVICES = 1 << 10;
        const LEVEL_1_SEGMENTATION = 1 << 11;
        const LEVEL_2_SEGMENTATION = 1 << 12;
        const CONCURRENT_OPERATIONS = 1 << 13;
        const NAMED_RESULT_SETS = 1 << 14;
    }
}

/// Options always requested by the client
pub const OPTIONS_ALWAYS_REQUESTED: InitOptions = InitOptions::SEARCH
    .union(InitOptions::PRESENT)
    .union(InitOptions::DEL_SET);

bitflags::bitflags! {
    /// `protocolVersion` bit string
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProtocolVersion: u32 {
        const V1 = 1 << 0;
        const V2 = 1 << 1;
        const V3 = 1 << 2;
    }
}

impl ProtocolVersion {
    /// Highest single version in the set, as its number (1..=3)
    pub fn highest(self) -> Option<u8> {
        if self.contains(Self::V3) {
            Some(3)
        } else if self.contains(Self::V2) {
            Some(2)
        } else if self.contains(Self::V1) {
            Some(1)
        } else {
            None
        }
    }
}

/// A registered object identifier with its symbolic name
#[derive(Debug, Clone, Copy)]
pub struct OidEntry {
    pub name: &'static str,
    pub arcs: &'static [u32],
}

impl OidEntry {
    pub fn oid(&self) -> Oid {
        Oid::from_arcs(self.arcs)
    }
}

/// Record syntaxes. The first entry for an OID is its canonical name.
pub static SYNTAXES: &[OidEntry] = &[
    OidEntry { name: "unimarc", arcs: &[1, 2, 840, 10003, 5, 1] },
    OidEntry { name: "intermarc", arcs: &[1, 2, 840, 10003, 5, 2] },
    OidEntry { name: "ccf", arcs: &[1, 2, 840, 10003, 5, 3] },
    OidEntry { name: "usmarc", arcs: &[1, 2, 840, 10003, 5, 10] },
    OidEntry { name: "marc21", arcs: &[1, 2, 840, 10003, 5, 10] },
    OidEntry { name: "ukmarc", arcs: &[1, 2, 840, 10003, 5, 11] },
    OidEntry { name: "normarc", arcs: &[1, 2, 840, 10003, 5, 12] },
    OidEntry { name: "librismarc", arcs: &[1, 2, 840, 10003, 5, 13] },
    OidEntry { name: "danmarc", arcs: &[1, 2, 840, 10003, 5, 14] },
    OidEntry { name: "finmarc", arcs: &[1, 2, 840, 10003, 5, 15] },
    OidEntry { name: "mab", arcs: &[1, 2, 840, 10003, 5, 16] },
    OidEntry { name: "canmarc", arcs: &[1, 2, 840, 10003, 5, 17] },
    OidEntry { name: "picamarc", arcs: &[1, 2, 840, 10003, 5, 19] },
    OidEntry { name: "ausmarc", arcs: &[1, 2, 840, 10003, 5, 20] },
    OidEntry { name: "ibermarc", arcs: &[1, 2, 840, 10003, 5, 21] },
    OidEntry { name: "explain", arcs: &[1, 2, 840, 10003, 5, 100] },
    OidEntry { name: "sutrs", arcs: &[1, 2, 840, 10003, 5, 101] },
    OidEntry { name: "opac", arcs: &[1, 2, 840, 10003, 5, 102] },
    OidEntry { name: "summary", arcs: &[1, 2, 840, 10003, 5, 103] },
    OidEntry { name: "grs-0", arcs: &[1, 2, 840, 10003, 5, 104] },
    OidEntry { name: "grs-1", arcs: &[1, 2, 840, 10003, 5, 105] },
    OidEntry { name: "es", arcs: &[1, 2, 840, 10003, 5, 106] },
    OidEntry { name: "fragment", arcs: &[1, 2, 840, 10003, 5, 107] },
    OidEntry { name: "xml", arcs: &[1, 2, 840, 10003, 5, 109, 10] },
    OidEntry { name: "text-xml", arcs: &[1, 2, 840, 10003, 5, 109, 10] },
    OidEntry { name: "application-xml", arcs: &[1, 2, 840, 10003, 5, 109, 11] },
];

/// RPN attribute sets
pub static ATTRIBUTE_SETS: &[OidEntry] = &[
    OidEntry { name: "bib-1", arcs: &[1, 2, 840, 10003, 3, 1] },
    OidEntry { name: "exp-1", arcs: &[1, 2, 840, 10003, 3, 2] },
    OidEntry { name: "ext-1", arcs: &[1, 2, 840, 10003, 3, 3] },
    OidEntry { name: "ccl-1", arcs: &[1, 2, 840, 10003, 3, 4] },
    OidEntry { name: "gils", arcs: &[1, 2, 840, 10003, 3, 5] },
];

pub const BIB1_ATTRIBUTE_SET: &[u32] = &[1, 2, 840, 10003, 3, 1];
pub const BIB1_DIAGNOSTIC_SET: &[u32] = &[1, 2, 840, 10003, 4, 1];
pub const CQL_USERINFO: &[u32] = &[1, 2, 840, 10003, 16, 2];

/// Case-insensitive lookup by symbolic name
pub fn lookup_name(table: &'static [OidEntry], name: &str) -> Option<&'static OidEntry> {
    table.iter().find(|entry| entry.name.eq_ignore_ascii_case(name))
}

/// Canonical name for an OID
pub fn lookup_oid(table: &'static [OidEntry], oid: &Oid) -> Option<&'static OidEntry> {
    table.iter().find(|entry| oid.arcs() == entry.arcs)
}

/// Resolve a name or a dotted OID against a registry
pub fn resolve(table: &'static [OidEntry], name: &str) -> Option<Oid> {
    if let Some(entry) = lookup_name(table, name) {
        return Some(entry.oid());
    }
    name.parse::<Oid>().ok()
}

/// Human-readable text for common Bib-1 diagnostic conditions
pub fn diagnostic_message(code: i64) -> Option<&'static str> {
    let message = match code {
        1 => "Permanent system error",
        2 => "Temporary system error",
        3 => "Unsupported search",
        4 => "Terms only exclusion (stop) words",
        5 => "Too many argument words",
        6 => "Too many boolean operators",
        7 => "Too many truncated words",
        8 => "Too many incomplete subfields",
        9 => "Truncated words too short",
        10 => "Invalid format for record number (search term)",
        11 => "Too many characters in search statement",
        12 => "Too many records retrieved",
        13 => "Present request out-of-range",
        14 => "System error in presenting records",
        15 => "Record not authorized to be sent intersystem",
        16 => "Record exceeds Preferred-message-size",
        17 => "Record exceeds Exceptional-record-size",
        18 => "Result set not supported as a search term",
        19 => "Only single result set as search term supported",
        20 => "Only ANDing of a single result set as search term",
        21 => "Result set exists and replace indicator off",
        22 => "Result set naming not supported",
        23 => "Specified combination of databases not supported",
        24 => "Element set names not supported",
        25 => "Specified element set name not valid for specified database",
        26 => "Only generic form of element set name supported",
        27 => "Result set no longer exists - unilaterally deleted by target",
        28 => "Result set is in use",
        29 => "One of the specified databases is locked",
        30 => "Specified result set does not exist",
        31 => "Resources exhausted - no results available",
        100 => "(unspecified) error",
        101 => "Access-control failure",
        102 => "Challenge required, could not be issued - operation terminated",
        106 => "No abstract syntaxes agreed to for this record",
        107 => "Query type not supported",
        108 => "Malformed query",
        109 => "Database unavailable",
        110 => "Operator unsupported",
        111 => "Too many databases specified",
        112 => "Too many result sets created",
        113 => "Unsupported attribute type",
        114 => "Unsupported Use attribute",
        115 => "Unsupported term value for Use attribute",
        116 => "Use attribute required but not supplied",
        117 => "Unsupported Relation attribute",
        118 => "Unsupported Structure attribute",
        119 => "Unsupported Position attribute",
        120 => "Unsupported Truncation attribute",
        121 => "Unsupported Attribute Set",
        122 => "Unsupported Completeness attribute",
        123 => "Unsupported attribute combination",
        124 => "Unsupported coded value for term",
        125 => "Malformed search term",
        126 => "Illegal term value for attribute",
        128 => "Illegal result set name",
        227 => "No data available in requested record syntax",
        235 => "Database does not exist",
        236 => "Access to specified database denied",
        238 => "Record not available in requested syntax",
        239 => "Record syntax not supported",
        _ => return None,
    };
    Some(message)
}
