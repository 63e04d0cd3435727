//! RDF terms and their persisted byte form.
//!
//! ## Binary encoding
//!
//! | Kind | Layout |
//! |------|--------|
//! | IRI | `0x2`, UTF-8 IRI |
//! | Blank node | `0x3`, UTF-8 label |
//! | Literal | `0x4`, u32 BE datatype len, datatype, u32 BE language len, language, UTF-8 label |
//!
//! A zero datatype length means "no datatype"; a zero language length means
//! "no language". The encoding is deterministic, so equal terms always
//! produce equal bytes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const KIND_IRI: u8 = 0x2;
pub const KIND_BNODE: u8 = 0x3;
pub const KIND_LITERAL: u8 = 0x4;

/// An RDF value. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Term {
    Iri(String),
    BlankNode(String),
    Literal {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::BlankNode(label.into())
    }

    /// Plain literal with no datatype or language.
    pub fn literal(label: impl Into<String>) -> Self {
        Term::Literal {
            label: label.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed(label: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            label: label.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    /// Language-tagged literal. The tag is stored lower-cased.
    pub fn lang(label: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal {
            label: label.into(),
            datatype: None,
            language: Some(language.into().to_ascii_lowercase()),
        }
    }

    #[inline]
    pub fn kind(&self) -> u8 {
        match self {
            Term::Iri(_) => KIND_IRI,
            Term::BlankNode(_) => KIND_BNODE,
            Term::Literal { .. } => KIND_LITERAL,
        }
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// Serialize to the persisted byte form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Term::Iri(s) | Term::BlankNode(s) => {
                let mut out = Vec::with_capacity(1 + s.len());
                out.push(self.kind());
                out.extend_from_slice(s.as_bytes());
                out
            }
            Term::Literal {
                label,
                datatype,
                language,
            } => {
                let dt = datatype.as_deref().unwrap_or("");
                let lang = language.as_deref().unwrap_or("");
                let mut out = Vec::with_capacity(1 + 4 + dt.len() + 4 + lang.len() + label.len());
                out.push(KIND_LITERAL);
                out.extend_from_slice(&(dt.len() as u32).to_be_bytes());
                out.extend_from_slice(dt.as_bytes());
                out.extend_from_slice(&(lang.len() as u32).to_be_bytes());
                out.extend_from_slice(lang.as_bytes());
                out.extend_from_slice(label.as_bytes());
                out
            }
        }
    }

    /// Parse the persisted byte form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&kind, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::invalid_term("empty term encoding"))?;
        match kind {
            KIND_IRI => Ok(Term::Iri(utf8(rest)?)),
            KIND_BNODE => Ok(Term::BlankNode(utf8(rest)?)),
            KIND_LITERAL => {
                let (dt_len, rest) = split_len::<4>(rest)?;
                let (dt, rest) = split_at(rest, dt_len)?;
                let (lang_len, rest) = split_len::<4>(rest)?;
                let (lang, label) = split_at(rest, lang_len)?;
                Ok(Term::Literal {
                    label: utf8(label)?,
                    datatype: (!dt.is_empty()).then(|| utf8(dt)).transpose()?,
                    language: (!lang.is_empty()).then(|| utf8(lang)).transpose()?,
                })
            }
            other => Err(Error::invalid_term(format!("unknown term kind 0x{other:x}"))),
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::invalid_term(e.to_string()))
}

fn split_len<const N: usize>(bytes: &[u8]) -> Result<(usize, &[u8])> {
    if bytes.len() < N {
        return Err(Error::invalid_term("truncated literal header"));
    }
    let (head, rest) = bytes.split_at(N);
    let len = head.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((len, rest))
}

fn split_at(bytes: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if bytes.len() < len {
        return Err(Error::invalid_term("truncated literal field"));
    }
    Ok(bytes.split_at(len))
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::BlankNode(label) => write!(f, "_:{label}"),
            Term::Literal {
                label,
                datatype,
                language,
            } => {
                write!(f, "\"")?;
                for c in label.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")?;
                if let Some(lang) = language {
                    write!(f, "@{lang}")
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_fixed_tags() {
        assert_eq!(Term::iri("http://x").encode()[0], 0x2);
        assert_eq!(Term::blank("b0").encode()[0], 0x3);
        assert_eq!(Term::literal("v").encode()[0], 0x4);
    }

    #[test]
    fn decode_restores_every_kind() {
        let terms = [
            Term::iri("http://example.org/a"),
            Term::blank("node1"),
            Term::literal(""),
            Term::literal("plain \u{e9}"),
            Term::typed("42", "http://www.w3.org/2001/XMLSchema#integer"),
            Term::lang("chat", "FR"),
        ];
        for term in terms {
            assert_eq!(Term::decode(&term.encode()).unwrap(), term);
        }
    }

    #[test]
    fn oversized_language_tag_survives() {
        let tag = "a".repeat(usize::from(u16::MAX) + 3);
        let term = Term::lang("label", tag.as_str());
        let back = Term::decode(&term.encode()).unwrap();
        assert_eq!(back, term);
        assert!(matches!(back, Term::Literal { language: Some(l), label, .. } if l.len() == 65538 && label == "label"));
    }

    #[test]
    fn lang_is_lowercased() {
        assert_eq!(
            Term::lang("x", "EN-gb"),
            Term::Literal {
                label: "x".into(),
                datatype: None,
                language: Some("en-gb".into()),
            }
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(Term::decode(&[]), Err(Error::InvalidTerm(_))));
        assert!(matches!(Term::decode(&[0x9, b'a']), Err(Error::InvalidTerm(_))));
        assert!(matches!(Term::decode(&[0x4, 0, 0, 0, 9, b'a']), Err(Error::InvalidTerm(_))));
        assert!(matches!(Term::decode(&[0x2, 0xff, 0xfe]), Err(Error::InvalidTerm(_))));
    }

    #[test]
    fn display_is_ntriples_like() {
        assert_eq!(Term::iri("http://x/y").to_string(), "<http://x/y>");
        assert_eq!(Term::blank("b").to_string(), "_:b");
        assert_eq!(Term::lang("a\"b", "en").to_string(), "\"a\\\"b\"@en");
        assert_eq!(Term::typed("1", "http://t").to_string(), "\"1\"^^<http://t>");
    }

    #[test]
    fn serde_tags_kind() {
        let json = serde_json::to_value(Term::iri("http://x")).unwrap();
        assert_eq!(json["type"], "iri");
        let back: Term = serde_json::from_value(json).unwrap();
        assert_eq!(back, Term::iri("http://x"));
    }
}
