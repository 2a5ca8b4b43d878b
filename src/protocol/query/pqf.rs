//! Prefix Query Format parser.
//!
//! ```text
//! query     ::= ['@attrset' set] structure
//! structure ::= '@attr' [set] type '=' value structure
//!             | ('@and' | '@or' | '@not') structure structure
//!             | '@prox' excl dist ordered relation which unit structure structure
//!             | '@set' name
//!             | '@term' ('general' | 'numeric' | 'string' | 'null') term
//!             | term
//! ```
//!
//! Attributes given before an operator apply to every operand beneath it.

use crate::constant::{ATTRIBUTE_SETS, BIB1_ATTRIBUTE_SET, resolve};
use crate::error::ParseError;
use crate::protocol::ber::Oid;

use super::{
    AttributeElement, AttributeValue, AttributesPlusTerm, Operand, Operator, Proximity,
    ProximityUnit, RpnQuery, RpnStructure, StringOrNumeric, Term,
};

const MAX_DEPTH: usize = 256;

type ParseResult<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Clone)]
struct Token {
    text: String,
    offset: usize,
    quoted: bool,
}

impl Token {
    fn operator(&self) -> Option<&str> {
        if self.quoted || !self.text.starts_with('@') {
            None
        } else {
            Some(&self.text)
        }
    }
}

fn tokenize(input: &str) -> ParseResult<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos].is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let offset = pos;
        if bytes[pos] == b'"' {
            pos += 1;
            let mut text = Vec::new();
            loop {
                match bytes.get(pos) {
                    None => return Err(ParseError::new(offset, "unterminated quoted term")),
                    Some(b'"') => {
                        pos += 1;
                        break;
                    }
                    Some(b'\\') => {
                        let Some(&escaped) = bytes.get(pos + 1) else {
                            return Err(ParseError::new(offset, "unterminated quoted term"));
                        };
                        text.push(escaped);
                        pos += 2;
                    }
                    Some(&byte) => {
                        text.push(byte);
                        pos += 1;
                    }
                }
            }
            tokens.push(Token {
                text: String::from_utf8_lossy(&text).into_owned(),
                offset,
                quoted: true,
            });
        } else {
            while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            tokens.push(Token {
                text: input[offset..pos].to_string(),
                offset,
                quoted: false,
            });
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    index: usize,
}

/// Parse a PQF string into an RPN query
pub fn parse_pqf(input: &str) -> ParseResult<RpnQuery> {
    let mut parser = Parser {
        input,
        tokens: tokenize(input)?,
        index: 0,
    };

    let mut attribute_set = Oid::from_arcs(BIB1_ATTRIBUTE_SET);
    if parser.peek().and_then(Token::operator) == Some("@attrset") {
        parser.index += 1;
        let token = parser.next("attribute set name")?;
        attribute_set = resolve_set(&token)?;
    }

    let structure = parser.structure(Vec::new(), 0)?;

    if let Some(extra) = parser.peek() {
        return Err(ParseError::new(extra.offset, "unexpected token after query"));
    }

    Ok(RpnQuery {
        attribute_set,
        structure,
    })
}

fn resolve_set(token: &Token) -> ParseResult<Oid> {
    resolve(ATTRIBUTE_SETS, &token.text).ok_or_else(|| {
        ParseError::new(
            token.offset,
            format!("unknown attribute set '{}'", token.text),
        )
    })
}

fn parse_int(token: &Token, what: &str) -> ParseResult<i64> {
    token
        .text
        .parse::<i64>()
        .map_err(|_err| ParseError::new(token.offset, format!("expected integer {what}")))
}

fn parse_flag(token: &Token, what: &str) -> ParseResult<bool> {
    match token.text.as_str() {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(ParseError::new(token.offset, format!("expected 0 or 1 for {what}"))),
    }
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn next(&mut self, expected: &str) -> ParseResult<Token> {
        match self.tokens.get(self.index) {
            Some(token) => {
                self.index += 1;
                Ok(token.clone())
            }
            None => Err(ParseError::new(
                self.input.len(),
                format!("unexpected end of query, expected {expected}"),
            )),
        }
    }

    fn structure(
        &mut self,
        mut attributes: Vec<AttributeElement>,
        depth: usize,
    ) -> ParseResult<RpnStructure> {
        let token = self.next("term or operator")?;
        if depth > MAX_DEPTH {
            return Err(ParseError::new(token.offset, "query nested too deeply"));
        }

        let Some(operator) = token.operator() else {
            return Ok(term_operand(attributes, Term::General(token.text.into_bytes())));
        };

        match operator {
            "@attr" => {
                attributes.push(self.attribute()?);
                self.structure(attributes, depth + 1)
            }
            "@and" | "@or" | "@not" => {
                let op = match operator {
                    "@and" => Operator::And,
                    "@or" => Operator::Or,
                    _ => Operator::AndNot,
                };
                self.binary(attributes, op, depth)
            }
            "@prox" => {
                let prox = self.proximity()?;
                self.binary(attributes, Operator::Prox(prox), depth)
            }
            "@set" => {
                let name = self.next("result set name")?;
                Ok(RpnStructure::Operand(Operand::ResultSet(name.text)))
            }
            "@term" => {
                let kind = self.next("term type")?;
                let value = self.next("term")?;
                let term = match kind.text.as_str() {
                    "general" => Term::General(value.text.into_bytes()),
                    "numeric" => Term::Numeric(parse_int(&value, "term")?),
                    "string" => Term::CharacterString(value.text),
                    "null" => Term::Null,
                    _ => {
                        return Err(ParseError::new(
                            kind.offset,
                            format!("unknown term type '{}'", kind.text),
                        ));
                    }
                };
                Ok(term_operand(attributes, term))
            }
            _ => Err(ParseError::new(
                token.offset,
                format!("unknown operator '{operator}'"),
            )),
        }
    }

    fn binary(
        &mut self,
        attributes: Vec<AttributeElement>,
        operator: Operator,
        depth: usize,
    ) -> ParseResult<RpnStructure> {
        let left = self.structure(attributes.clone(), depth + 1)?;
        let right = self.structure(attributes, depth + 1)?;
        Ok(RpnStructure::Op(Box::new(left), Box::new(right), operator))
    }

    fn attribute(&mut self) -> ParseResult<AttributeElement> {
        let mut token = self.next("attribute")?;
        let mut attribute_set = None;
        if !token.text.contains('=') && !token.quoted {
            attribute_set = Some(resolve_set(&token)?);
            token = self.next("attribute")?;
        }

        let Some((kind, value)) = token.text.split_once('=') else {
            return Err(ParseError::new(token.offset, "expected attribute type=value"));
        };
        let attribute_type = kind
            .parse::<i64>()
            .map_err(|_err| ParseError::new(token.offset, "invalid attribute type"))?;
        if value.is_empty() {
            return Err(ParseError::new(
                token.offset + kind.len() + 1,
                "missing attribute value",
            ));
        }
        let value = match value.parse::<i64>() {
            Ok(n) => AttributeValue::Numeric(n),
            Err(_) => AttributeValue::Complex(vec![StringOrNumeric::String(value.to_string())]),
        };

        Ok(AttributeElement {
            attribute_set,
            attribute_type,
            value,
        })
    }

    fn proximity(&mut self) -> ParseResult<Proximity> {
        let exclusion = parse_flag(&self.next("proximity exclusion")?, "exclusion")?;
        let distance = parse_int(&self.next("proximity distance")?, "distance")?;
        let ordered = parse_flag(&self.next("proximity ordered flag")?, "ordered")?;
        let relation_type = parse_int(&self.next("proximity relation")?, "relation")?;
        let which = self.next("proximity unit kind")?;
        let unit = parse_int(&self.next("proximity unit")?, "unit")?;
        let unit = match which.text.as_str() {
            "k" | "known" => ProximityUnit::Known(unit),
            "p" | "private" => ProximityUnit::Private(unit),
            _ => {
                return Err(ParseError::new(
                    which.offset,
                    "expected k or p for proximity unit kind",
                ));
            }
        };
        Ok(Proximity {
            exclusion: Some(exclusion),
            distance,
            ordered,
            relation_type,
            unit,
        })
    }
}

fn term_operand(attributes: Vec<AttributeElement>, term: Term) -> RpnStructure {
    RpnStructure::Operand(Operand::Term(AttributesPlusTerm { attributes, term }))
}
