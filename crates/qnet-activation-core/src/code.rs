//! Activation credential grammar.
//!
//! `QNET-TAAAAA-BBBBBB-CCCCKK`: four dash-separated `[A-Z0-9]` groups of 4/6/6/6
//! characters. `T` binds the node class, `KK` is a base-36 redundancy check over the
//! twenty preceding characters. The issuing authority's signature is not checked here.

use crate::types::NodeClass;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CODE_PREFIX: &str = "QNET";
pub const GROUP_LENGTHS: [usize; 4] = [4, 6, 6, 6];
pub const CODE_LENGTH: usize = 25;
pub const NODE_ID_LENGTH: usize = 15;
const CHECKSUM_LENGTH: usize = 2;
const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const CHECKSUM_MODULUS: u32 = 36 * 36;
// Coprime with the modulus, so every single-character substitution changes the checksum.
const CHECKSUM_WEIGHT: u32 = 37;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrammarViolation {
    #[error("expected {expected} characters, found {found}")]
    Length { expected: usize, found: usize },

    #[error("expected 4 groups, found {0}")]
    GroupCount(usize),

    #[error("group {group} must have {expected} characters, found {found}")]
    GroupLength { group: usize, expected: usize, found: usize },

    #[error("invalid character '{found}' at position {position}")]
    Character { position: usize, found: char },

    #[error("namespace must be '{prefix}', found '{0}'", prefix = CODE_PREFIX)]
    Namespace(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed credential grammar: {0}")]
    MalformedGrammar(GrammarViolation),

    #[error("unknown node class tag '{0}'")]
    UnknownClassTag(char),

    #[error("credential checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch { expected: String, found: String },
}

/// Structural components of a well-formed credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCode {
    pub prefix: String,
    pub class_tag: NodeClass,
    pub node_id: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodeValidator;

impl CodeValidator {
    pub fn validate(code: &str) -> bool {
        Self::parse(code).is_ok()
    }

    pub fn parse(code: &str) -> Result<ParsedCode, ParseError> {
        let found = code.chars().count();
        if found != CODE_LENGTH {
            return Err(ParseError::MalformedGrammar(GrammarViolation::Length {
                expected: CODE_LENGTH,
                found,
            }));
        }

        let groups: Vec<&str> = code.split('-').collect();
        if groups.len() != GROUP_LENGTHS.len() {
            return Err(ParseError::MalformedGrammar(GrammarViolation::GroupCount(
                groups.len(),
            )));
        }

        for (index, (group, expected)) in groups.iter().zip(GROUP_LENGTHS).enumerate() {
            if group.len() != expected {
                return Err(ParseError::MalformedGrammar(GrammarViolation::GroupLength {
                    group: index + 1,
                    expected,
                    found: group.chars().count(),
                }));
            }
        }

        if let Some((position, found)) = code
            .chars()
            .enumerate()
            .find(|(_, ch)| *ch != '-' && !is_code_char(*ch))
        {
            return Err(ParseError::MalformedGrammar(GrammarViolation::Character {
                position,
                found,
            }));
        }

        if groups[0] != CODE_PREFIX {
            return Err(ParseError::MalformedGrammar(GrammarViolation::Namespace(
                groups[0].to_string(),
            )));
        }

        let tag = groups[1].chars().next().unwrap_or('-');
        let class_tag = NodeClass::from_class_tag(tag).ok_or(ParseError::UnknownClassTag(tag))?;

        let tail_split = GROUP_LENGTHS[3] - CHECKSUM_LENGTH;
        let (id_tail, checksum) = groups[3].split_at(tail_split);
        let node_id = format!("{}{}{}", &groups[1][1..], groups[2], id_tail);

        let body = format!("{}{}{}{}", groups[0], groups[1], groups[2], id_tail);
        let expected = checksum_for(&body);
        if expected != checksum {
            return Err(ParseError::ChecksumMismatch {
                expected,
                found: checksum.to_string(),
            });
        }

        Ok(ParsedCode {
            prefix: groups[0].to_string(),
            class_tag,
            node_id,
            checksum: checksum.to_string(),
        })
    }

    /// Compose a well-formed credential for `node_class` from a 15-character node id.
    pub fn encode(node_class: NodeClass, node_id: &str) -> Result<String, ParseError> {
        let found = node_id.chars().count();
        if found != NODE_ID_LENGTH {
            return Err(ParseError::MalformedGrammar(GrammarViolation::Length {
                expected: NODE_ID_LENGTH,
                found,
            }));
        }
        if let Some((position, found)) = node_id
            .chars()
            .enumerate()
            .find(|(_, ch)| !is_code_char(*ch))
        {
            return Err(ParseError::MalformedGrammar(GrammarViolation::Character {
                position,
                found,
            }));
        }

        let body = format!("{CODE_PREFIX}{}{node_id}", node_class.class_tag());
        let checksum = checksum_for(&body);
        Ok(format!(
            "{CODE_PREFIX}-{}{}-{}-{}{}",
            node_class.class_tag(),
            &node_id[..5],
            &node_id[5..11],
            &node_id[11..],
            checksum
        ))
    }
}

fn is_code_char(ch: char) -> bool {
    ch.is_ascii_uppercase() || ch.is_ascii_digit()
}

fn code_value(ch: char) -> u32 {
    ch.to_digit(36).unwrap_or(0)
}

fn checksum_for(body: &str) -> String {
    let acc = body.chars().fold(0u32, |acc, ch| {
        (acc * CHECKSUM_WEIGHT + code_value(ch)) % CHECKSUM_MODULUS
    });
    let high = ALPHABET[(acc / 36) as usize] as char;
    let low = ALPHABET[(acc % 36) as usize] as char;
    format!("{high}{low}")
}
