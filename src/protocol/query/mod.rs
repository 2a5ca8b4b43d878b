//! Structured queries and the surface syntaxes that build them.
//!
//! [`Query::new`] dispatches on [`QueryType`]: PQF is parsed into an RPN tree
//! (query type-1), CQL travels as a type-104 EXTERNAL, CCL as type-2 octets.

mod pqf;

use std::fmt;
use std::str::FromStr;

use crate::constant::{BIB1_ATTRIBUTE_SET, CQL_USERINFO};
use crate::error::{Error, ParseError, Result};
use crate::protocol::ber::*;
use crate::protocol::pdu::{Asn1Element, External, ExternalEncoding};

pub use pqf::parse_pqf;

/// Surface syntax of a query string
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// Prefix query format (`@attr 1=4 dinosaur`)
    Prefix,
    /// Common Query Language, sent to the server untouched
    Cql,
    /// CCL, parsed by the server
    Ccl,
}

impl FromStr for QueryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pqf" | "prefix" | "rpn" => Ok(Self::Prefix),
            "cql" => Ok(Self::Cql),
            "ccl" => Ok(Self::Ccl),
            _ => Err(Error::UnsupportedQueryType(s.to_string())),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prefix => "pqf",
            Self::Cql => "cql",
            Self::Ccl => "ccl",
        })
    }
}

/// A built query: the surface text and its wire form. Immutable and
/// reusable across searches and sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    query_type: QueryType,
    text: String,
    structured: StructuredQuery,
}

impl Query {
    /// Build a query. Fails without side effects on invalid input.
    pub fn new(text: &str, query_type: QueryType) -> Result<Self> {
        let structured = build(text, query_type)?;
        Ok(Self {
            query_type,
            text: text.to_string(),
            structured,
        })
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn structured(&self) -> &StructuredQuery {
        &self.structured
    }
}

/// Translate a surface query into its structured form
pub fn build(text: &str, query_type: QueryType) -> Result<StructuredQuery> {
    match query_type {
        QueryType::Prefix => Ok(StructuredQuery::Rpn(parse_pqf(text)?)),
        QueryType::Cql => Ok(StructuredQuery::Cql(non_empty(text)?.to_string())),
        QueryType::Ccl => Ok(StructuredQuery::Ccl(non_empty(text)?.to_string())),
    }
}

fn non_empty(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::new(0, "empty query").into());
    }
    Ok(trimmed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredQuery {
    Rpn(RpnQuery),
    Cql(String),
    Ccl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpnQuery {
    pub attribute_set: Oid,
    pub structure: RpnStructure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpnStructure {
    Operand(Operand),
    Op(Box<RpnStructure>, Box<RpnStructure>, Operator),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Term(AttributesPlusTerm),
    ResultSet(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributesPlusTerm {
    pub attributes: Vec<AttributeElement>,
    pub term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeElement {
    pub attribute_set: Option<Oid>,
    pub attribute_type: i64,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Numeric(i64),
    Complex(Vec<StringOrNumeric>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringOrNumeric {
    String(String),
    Numeric(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    General(Vec<u8>),
    Numeric(i64),
    CharacterString(String),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    AndNot,
    Prox(Proximity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proximity {
    pub exclusion: Option<bool>,
    pub distance: i64,
    pub ordered: bool,
    pub relation_type: i64,
    pub unit: ProximityUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityUnit {
    Known(i64),
    Private(i64),
}

impl RpnQuery {
    /// Single-term bib-1 query with no attributes
    pub fn term(term: impl Into<Vec<u8>>) -> Self {
        Self {
            attribute_set: Oid::from_arcs(BIB1_ATTRIBUTE_SET),
            structure: RpnStructure::Operand(Operand::Term(AttributesPlusTerm {
                attributes: Vec::new(),
                term: Term::General(term.into()),
            })),
        }
    }
}

// ============================================================================
// Wire form
// ============================================================================

const QUERY_TYPE_1: Tag = Tag::context_constructed(1);
const QUERY_TYPE_2: Tag = Tag::context_constructed(2);
const QUERY_TYPE_104: Tag = Tag::context_constructed(104);

const RPN_OP: Tag = Tag::context_constructed(0);
const RPN_RPN_OP: Tag = Tag::context_constructed(1);
const ATTRIBUTES_PLUS_TERM: Tag = Tag::context_constructed(102);
const RESULT_SET_ID: Tag = Tag::context(31);
const ATTRIBUTE_LIST: Tag = Tag::context_constructed(44);
const OPERATOR: Tag = Tag::context_constructed(46);

const ATTRIBUTE_SET_ID: Tag = Tag::context(1);
const ATTRIBUTE_TYPE: Tag = Tag::context(120);
const ATTRIBUTE_NUMERIC: Tag = Tag::context(121);
const ATTRIBUTE_COMPLEX: Tag = Tag::context_constructed(224);
const COMPLEX_LIST: Tag = Tag::context_constructed(1);
const SON_STRING: Tag = Tag::context(1);
const SON_NUMERIC: Tag = Tag::context(2);

const TERM_GENERAL: Tag = Tag::context(45);
const TERM_NUMERIC: Tag = Tag::context(215);
const TERM_CHARACTER_STRING: Tag = Tag::context(216);
const TERM_NULL: Tag = Tag::context(221);

const OP_AND: Tag = Tag::context(0);
const OP_OR: Tag = Tag::context(1);
const OP_AND_NOT: Tag = Tag::context(2);
const OP_PROX: Tag = Tag::context_constructed(3);

const PROX_EXCLUSION: Tag = Tag::context(1);
const PROX_DISTANCE: Tag = Tag::context(2);
const PROX_ORDERED: Tag = Tag::context(3);
const PROX_RELATION: Tag = Tag::context(4);
const PROX_UNIT: Tag = Tag::context_constructed(5);
const PROX_UNIT_KNOWN: Tag = Tag::context(1);
const PROX_UNIT_PRIVATE: Tag = Tag::context(2);

const MAX_RPN_DEPTH: usize = 256;

/// Write the `Query` CHOICE (the caller supplies the outer `[21]`)
pub fn write_query(out: &mut Vec<u8>, query: &StructuredQuery) {
    match query {
        StructuredQuery::Rpn(rpn) => write_constructed(out, QUERY_TYPE_1, |out| {
            write_oid(out, Tag::OBJECT_IDENTIFIER, &rpn.attribute_set);
            write_rpn_structure(out, &rpn.structure);
        }),
        StructuredQuery::Ccl(ccl) => write_constructed(out, QUERY_TYPE_2, |out| {
            write_string(out, Tag::OCTET_STRING, ccl);
        }),
        StructuredQuery::Cql(cql) => {
            let external = External {
                direct_reference: Some(Oid::from_arcs(CQL_USERINFO)),
                encoding: ExternalEncoding::SingleAsn1Type(Asn1Element::string(
                    Tag::GENERAL_STRING,
                    cql,
                )),
            };
            external.write(out, QUERY_TYPE_104);
        }
    }
}

fn write_rpn_structure(out: &mut Vec<u8>, structure: &RpnStructure) {
    match structure {
        RpnStructure::Operand(operand) => write_constructed(out, RPN_OP, |out| match operand {
            Operand::Term(apt) => write_constructed(out, ATTRIBUTES_PLUS_TERM, |out| {
                write_constructed(out, ATTRIBUTE_LIST, |out| {
                    for attribute in &apt.attributes {
                        write_attribute(out, attribute);
                    }
                });
                write_term(out, &apt.term);
            }),
            Operand::ResultSet(name) => write_string(out, RESULT_SET_ID, name),
        }),
        RpnStructure::Op(left, right, operator) => write_constructed(out, RPN_RPN_OP, |out| {
            write_rpn_structure(out, left);
            write_rpn_structure(out, right);
            write_constructed(out, OPERATOR, |out| write_operator(out, operator));
        }),
    }
}

fn write_attribute(out: &mut Vec<u8>, attribute: &AttributeElement) {
    write_constructed(out, Tag::SEQUENCE, |out| {
        if let Some(set) = &attribute.attribute_set {
            write_oid(out, ATTRIBUTE_SET_ID, set);
        }
        write_integer(out, ATTRIBUTE_TYPE, attribute.attribute_type);
        match &attribute.value {
            AttributeValue::Numeric(value) => write_integer(out, ATTRIBUTE_NUMERIC, *value),
            AttributeValue::Complex(list) => write_constructed(out, ATTRIBUTE_COMPLEX, |out| {
                write_constructed(out, COMPLEX_LIST, |out| {
                    for item in list {
                        match item {
                            StringOrNumeric::String(s) => write_string(out, SON_STRING, s),
                            StringOrNumeric::Numeric(n) => write_integer(out, SON_NUMERIC, *n),
                        }
                    }
                });
            }),
        }
    });
}

fn write_term(out: &mut Vec<u8>, term: &Term) {
    match term {
        Term::General(bytes) => write_primitive(out, TERM_GENERAL, bytes),
        Term::Numeric(n) => write_integer(out, TERM_NUMERIC, *n),
        Term::CharacterString(s) => write_string(out, TERM_CHARACTER_STRING, s),
        Term::Null => write_null(out, TERM_NULL),
    }
}

fn write_operator(out: &mut Vec<u8>, operator: &Operator) {
    match operator {
        Operator::And => write_null(out, OP_AND),
        Operator::Or => write_null(out, OP_OR),
        Operator::AndNot => write_null(out, OP_AND_NOT),
        Operator::Prox(prox) => write_constructed(out, OP_PROX, |out| {
            if let Some(exclusion) = prox.exclusion {
                write_boolean(out, PROX_EXCLUSION, exclusion);
            }
            write_integer(out, PROX_DISTANCE, prox.distance);
            write_boolean(out, PROX_ORDERED, prox.ordered);
            write_integer(out, PROX_RELATION, prox.relation_type);
            write_constructed(out, PROX_UNIT, |out| match prox.unit {
                ProximityUnit::Known(unit) => write_integer(out, PROX_UNIT_KNOWN, unit),
                ProximityUnit::Private(unit) => write_integer(out, PROX_UNIT_PRIVATE, unit),
            });
        }),
    }
}

/// Read the `Query` CHOICE from inside the `[21]` wrapper
pub fn read_query(tlv: Tlv<'_>) -> Result<StructuredQuery> {
    match tlv.tag {
        QUERY_TYPE_1 => {
            let children = tlv.children()?;
            let [set, structure] = children.as_slice() else {
                return Err(Error::malformed("RPNQuery must have two elements"));
            };
            Ok(StructuredQuery::Rpn(RpnQuery {
                attribute_set: set.expect(Tag::OBJECT_IDENTIFIER)?.oid()?,
                structure: read_rpn_structure(*structure, 0)?,
            }))
        }
        QUERY_TYPE_2 => Ok(StructuredQuery::Ccl(
            tlv.inner()?.expect(Tag::OCTET_STRING)?.string()?,
        )),
        QUERY_TYPE_104 => {
            let external = External::read(tlv)?;
            let is_cql = external
                .direct_reference
                .as_ref()
                .is_some_and(|oid| oid.arcs() == CQL_USERINFO);
            match (is_cql, external.encoding) {
                (true, ExternalEncoding::SingleAsn1Type(value)) => Ok(StructuredQuery::Cql(
                    value.tlv()?.expect(Tag::GENERAL_STRING)?.string()?,
                )),
                _ => Err(Error::malformed("type-104 query is not CQL")),
            }
        }
        other => Err(Error::malformed(format!("unsupported query type {other:?}"))),
    }
}

fn read_rpn_structure(tlv: Tlv<'_>, depth: usize) -> Result<RpnStructure> {
    if depth > MAX_RPN_DEPTH {
        return Err(Error::malformed("RPN query nested too deeply"));
    }
    match tlv.tag {
        RPN_OP => {
            let operand = tlv.inner()?;
            match operand.tag {
                ATTRIBUTES_PLUS_TERM => {
                    let children = operand.children()?;
                    let [list, term] = children.as_slice() else {
                        return Err(Error::malformed("AttributesPlusTerm must have two elements"));
                    };
                    let attributes = list
                        .expect(ATTRIBUTE_LIST)?
                        .children()?
                        .into_iter()
                        .map(read_attribute)
                        .collect::<Result<Vec<_>>>()?;
                    Ok(RpnStructure::Operand(Operand::Term(AttributesPlusTerm {
                        attributes,
                        term: read_term(*term)?,
                    })))
                }
                RESULT_SET_ID => Ok(RpnStructure::Operand(Operand::ResultSet(operand.string()?))),
                other => Err(Error::malformed(format!("unsupported operand {other:?}"))),
            }
        }
        RPN_RPN_OP => {
            let children = tlv.children()?;
            let [left, right, operator] = children.as_slice() else {
                return Err(Error::malformed("rpnRpnOp must have three elements"));
            };
            Ok(RpnStructure::Op(
                Box::new(read_rpn_structure(*left, depth + 1)?),
                Box::new(read_rpn_structure(*right, depth + 1)?),
                read_operator(operator.expect(OPERATOR)?.inner()?)?,
            ))
        }
        other => Err(Error::malformed(format!("bad RPNStructure {other:?}"))),
    }
}

fn read_attribute(tlv: Tlv<'_>) -> Result<AttributeElement> {
    let mut attribute_set = None;
    let mut attribute_type = None;
    let mut value = None;

    for child in tlv.expect(Tag::SEQUENCE)?.children()? {
        match child.tag {
            ATTRIBUTE_SET_ID => attribute_set = Some(child.oid()?),
            ATTRIBUTE_TYPE => attribute_type = Some(child.integer()?),
            ATTRIBUTE_NUMERIC => value = Some(AttributeValue::Numeric(child.integer()?)),
            ATTRIBUTE_COMPLEX => {
                let mut list = Vec::new();
                for part in child.children()? {
                    if part.tag != COMPLEX_LIST {
                        continue;
                    }
                    for item in part.children()? {
                        list.push(match item.tag {
                            SON_STRING => StringOrNumeric::String(item.string()?),
                            SON_NUMERIC => StringOrNumeric::Numeric(item.integer()?),
                            other => {
                                return Err(Error::malformed(format!(
                                    "bad StringOrNumeric {other:?}"
                                )));
                            }
                        });
                    }
                }
                value = Some(AttributeValue::Complex(list));
            }
            other => return Err(Error::malformed(format!("bad AttributeElement {other:?}"))),
        }
    }

    Ok(AttributeElement {
        attribute_set,
        attribute_type: attribute_type.ok_or_else(|| Error::malformed("missing attributeType"))?,
        value: value.ok_or_else(|| Error::malformed("missing attributeValue"))?,
    })
}

fn read_term(tlv: Tlv<'_>) -> Result<Term> {
    match tlv.tag {
        TERM_GENERAL => Ok(Term::General(tlv.octets()?)),
        TERM_NUMERIC => Ok(Term::Numeric(tlv.integer()?)),
        TERM_CHARACTER_STRING => Ok(Term::CharacterString(tlv.string()?)),
        TERM_NULL => tlv.null().map(|()| Term::Null),
        other => Err(Error::malformed(format!("unsupported term {other:?}"))),
    }
}

fn read_operator(tlv: Tlv<'_>) -> Result<Operator> {
    match tlv.tag {
        OP_AND => tlv.null().map(|()| Operator::And),
        OP_OR => tlv.null().map(|()| Operator::Or),
        OP_AND_NOT => tlv.null().map(|()| Operator::AndNot),
        OP_PROX => {
            let mut exclusion = None;
            let mut distance = None;
            let mut ordered = None;
            let mut relation_type = None;
            let mut unit = None;
            for child in tlv.children()? {
                match child.tag {
                    PROX_EXCLUSION => exclusion = Some(child.boolean()?),
                    PROX_DISTANCE => distance = Some(child.integer()?),
                    PROX_ORDERED => ordered = Some(child.boolean()?),
                    PROX_RELATION => relation_type = Some(child.integer()?),
                    PROX_UNIT => {
                        let code = child.inner()?;
                        unit = Some(match code.tag {
                            PROX_UNIT_KNOWN => ProximityUnit::Known(code.integer()?),
                            PROX_UNIT_PRIVATE => ProximityUnit::Private(code.integer()?),
                            other => {
                                return Err(Error::malformed(format!(
                                    "bad proximityUnitCode {other:?}"
                                )));
                            }
                        });
                    }
                    _ => {}
                }
            }
            let missing = || Error::malformed("incomplete ProximityOperator");
            Ok(Operator::Prox(Proximity {
                exclusion,
                distance: distance.ok_or_else(missing)?,
                ordered: ordered.ok_or_else(missing)?,
                relation_type: relation_type.ok_or_else(missing)?,
                unit: unit.ok_or_else(missing)?,
            }))
        }
        other => Err(Error::malformed(format!("unsupported operator {other:?}"))),
    }
}
