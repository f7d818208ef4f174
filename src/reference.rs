//! Reference tokens: the wire format by which one capability names another.
//!
//! A token has the shape `<prefix><id>`. The prefix tells which kind of record
//! the id designates; an unrecognised prefix means a plain field reference with
//! an empty prefix. A token may additionally be wrapped in the `@value.` marker
//! used by the authoring UI. The marker is kept as part of the prefix so that a
//! parsed token re-serialises byte for byte.
//!
//! | Kind      | Prefix(es)                               |
//! |-----------|------------------------------------------|
//! | field     | *(empty)*                                |
//! | formula   | `node-formula:`                          |
//! | condition | `condition:`, `node-condition:`          |
//! | table     | `@table.`, `node-table:`, `table:`       |
//! | variable  | `node-variable:`                         |
//!
//! Tokens are parsed once, at the store boundary, into [`ParsedReference`].
//! Nothing deeper in the engine matches on raw strings.
//!
//! # Examples
//!
//! ```rust
//! use tbl_engine::reference::{ReferenceKind, apply_suffix, extract_id, parse};
//!
//! let parsed = parse("@value.node-formula:area").unwrap();
//! assert_eq!(parsed.kind, ReferenceKind::Formula);
//! assert_eq!(parsed.id, "area");
//!
//! let once = apply_suffix("node-formula:area", 1);
//! let twice = apply_suffix(&once, 2);
//! assert_eq!(twice, "node-formula:area-1-2");
//! assert_eq!(extract_id(&twice).as_deref(), Some("area-1-2"));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::EngineError;

/// What a reference token points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// A plain node (its live value or cached computed value)
    Field,
    /// A formula capability
    Formula,
    /// A condition capability
    Condition,
    /// A table capability
    Table,
    /// A variable capability, addressed by id or exposed key
    Variable,
}

/// Marker the authoring UI wraps around value reads.
pub const VALUE_MARKER: &str = "@value.";

/// The closed prefix set. The first entry for a kind is its canonical prefix.
/// Field references have no entry: they are what remains when nothing matches.
const PREFIXES: &[(&str, ReferenceKind)] = &[
    ("node-formula:", ReferenceKind::Formula),
    ("condition:", ReferenceKind::Condition),
    ("node-condition:", ReferenceKind::Condition),
    ("@table.", ReferenceKind::Table),
    ("node-table:", ReferenceKind::Table),
    ("table:", ReferenceKind::Table),
    ("node-variable:", ReferenceKind::Variable),
];

impl ReferenceKind {
    /// The prefix used when a reference of this kind is created from scratch.
    #[must_use]
    pub fn canonical_prefix(self) -> &'static str {
        PREFIXES.iter().find(|(_, kind)| *kind == self).map_or("", |(prefix, _)| prefix)
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field => write!(f, "field"),
            Self::Formula => write!(f, "formula"),
            Self::Condition => write!(f, "condition"),
            Self::Table => write!(f, "table"),
            Self::Variable => write!(f, "variable"),
        }
    }
}

/// A reference token parsed into its parts.
///
/// `prefix` is the exact text that preceded the id in the wire token,
/// including any `@value.` marker, so `prefix + id` reproduces the input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedReference {
    pub kind: ReferenceKind,
    pub id: String,
    pub prefix: String,
}

impl ParsedReference {
    /// Build a reference with the canonical prefix for `kind`.
    pub fn new(kind: ReferenceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            prefix: kind.canonical_prefix().to_string(),
        }
    }

    /// A plain field reference wrapped in the value marker, as the UI writes them.
    pub fn field(id: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Field,
            id: id.into(),
            prefix: VALUE_MARKER.to_string(),
        }
    }

    /// Same kind and prefix, different target id.
    #[must_use]
    pub fn retarget(&self, id: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            id: id.into(),
            prefix: self.prefix.clone(),
        }
    }

    /// Append `-<suffix>` to the id. A suffix of `0` is a no-op.
    #[must_use]
    pub fn with_suffix(&self, suffix: u32) -> Self {
        if suffix == 0 {
            return self.clone();
        }
        self.retarget(format!("{}-{suffix}", self.id))
    }

    /// The wire form of this reference.
    #[must_use]
    pub fn to_token(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ParsedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.id)
    }
}

impl FromStr for ParsedReference {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s).ok_or_else(|| EngineError::InvalidReference {
            token: s.to_string(),
        })
    }
}

impl TryFrom<String> for ParsedReference {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ParsedReference> for String {
    fn from(value: ParsedReference) -> Self {
        value.to_string()
    }
}

impl Serialize for ParsedReference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ParsedReference {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Classify a token by its prefix.
///
/// Never panics. Returns `None` for an empty token, a prefix with nothing
/// after it, or an id containing whitespace.
#[must_use]
pub fn parse(token: &str) -> Option<ParsedReference> {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return None;
    }

    let (marker, rest) = match token.strip_prefix(VALUE_MARKER) {
        Some(rest) => (VALUE_MARKER, rest),
        None => ("", token),
    };

    let (kind, kind_prefix) = PREFIXES
        .iter()
        .find(|(prefix, _)| rest.starts_with(prefix))
        .map_or((ReferenceKind::Field, ""), |(prefix, kind)| (*kind, *prefix));

    let id = &rest[kind_prefix.len()..];
    if id.is_empty() {
        return None;
    }

    Some(ParsedReference {
        kind,
        id: id.to_string(),
        prefix: format!("{marker}{kind_prefix}"),
    })
}

/// Append `-<suffix>` to the id embedded in `token`, keeping its prefix.
///
/// Suffixes compose: applying `1` then `2` yields `<id>-1-2`. A suffix of `0`
/// and unparsable tokens leave the token unchanged.
#[must_use]
pub fn apply_suffix(token: &str, suffix: u32) -> String {
    match parse(token) {
        Some(parsed) => parsed.with_suffix(suffix).to_string(),
        None => token.to_string(),
    }
}

/// The id embedded in `token`, if it parses.
#[must_use]
pub fn extract_id(token: &str) -> Option<String> {
    parse(token).map(|parsed| parsed.id)
}

/// The trailing `-<n>` of an id, if any.
#[must_use]
pub fn trailing_suffix(id: &str) -> Option<u32> {
    let (head, tail) = id.rsplit_once('-')?;
    if head.is_empty() || tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok()
}

/// Remove every trailing `-<n>` group from an id.
#[must_use]
pub fn strip_suffixes(id: &str) -> &str {
    let mut current = id;
    while trailing_suffix(current).is_some() {
        match current.rsplit_once('-') {
            Some((head, _)) => current = head,
            None => break,
        }
    }
    current
}
