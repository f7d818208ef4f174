use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::{format_number, parse_number};
use crate::core::EngineError;
use crate::reference::{self, ParsedReference};

/// A formula capability: an ordered token sequence owned by one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formula {
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub name: String,
    pub tokens: TokenSequence,
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl Operator {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
        }
    }

    /// Binding power; higher binds tighter.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
            Self::Pow => 3,
        }
    }

    #[must_use]
    pub const fn is_right_associative(self) -> bool {
        matches!(self, Self::Pow)
    }
}

/// Built-in functions callable from formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    Round,
    Abs,
    Ceil,
    Floor,
}

impl Function {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Round => "round",
            Self::Abs => "abs",
            Self::Ceil => "ceil",
            Self::Floor => "floor",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "round" => Some(Self::Round),
            "abs" => Some(Self::Abs),
            "ceil" => Some(Self::Ceil),
            "floor" => Some(Self::Floor),
            _ => None,
        }
    }
}

/// One token of a formula after boundary parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaToken {
    Number(f64),
    Text(String),
    Operator(Operator),
    LeftParen,
    RightParen,
    Comma,
    Function(Function),
    Reference(ParsedReference),
}

impl FormulaToken {
    /// Parse one wire token.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidReference`] when the token is none of the
    /// literal forms and does not parse as a reference either.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let token = match raw {
            "+" => Self::Operator(Operator::Add),
            "-" => Self::Operator(Operator::Sub),
            "*" | "×" => Self::Operator(Operator::Mul),
            "/" | "÷" => Self::Operator(Operator::Div),
            "^" => Self::Operator(Operator::Pow),
            "(" => Self::LeftParen,
            ")" => Self::RightParen,
            "," => Self::Comma,
            _ => {
                if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
                    Self::Text(raw[1..raw.len() - 1].to_string())
                } else if let Some(n) = parse_number(raw).filter(|_| !raw.contains(',')) {
                    Self::Number(n)
                } else if let Some(function) = Function::from_name(raw) {
                    Self::Function(function)
                } else {
                    Self::Reference(reference::parse(raw).ok_or_else(|| {
                        EngineError::InvalidReference {
                            token: raw.to_string(),
                        }
                    })?)
                }
            }
        };
        Ok(token)
    }

    #[must_use]
    pub const fn as_reference(&self) -> Option<&ParsedReference> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for FormulaToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::Text(s) => write!(f, "\"{s}\""),
            Self::Operator(op) => write!(f, "{}", op.symbol()),
            Self::LeftParen => write!(f, "("),
            Self::RightParen => write!(f, ")"),
            Self::Comma => write!(f, ","),
            Self::Function(func) => write!(f, "{}", func.name()),
            Self::Reference(r) => write!(f, "{r}"),
        }
    }
}

/// A formula's tokens. On the wire this is a plain list of strings; it is
/// parsed into [`FormulaToken`]s once, when the store document is read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct TokenSequence(pub Vec<FormulaToken>);

impl TokenSequence {
    /// Parse a list of wire tokens.
    ///
    /// # Errors
    ///
    /// Fails on the first token that cannot be parsed.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, EngineError> {
        tokens.iter().map(|t| FormulaToken::parse(t.as_ref())).collect::<Result<Vec<_>, _>>().map(Self)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FormulaToken> {
        self.0.iter()
    }

    pub fn references(&self) -> impl Iterator<Item = &ParsedReference> {
        self.0.iter().filter_map(FormulaToken::as_reference)
    }

    pub fn references_mut(&mut self) -> impl Iterator<Item = &mut ParsedReference> {
        self.0.iter_mut().filter_map(|token| match token {
            FormulaToken::Reference(r) => Some(r),
            _ => None,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for TokenSequence {
    type Error = EngineError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TokenSequence> for Vec<String> {
    fn from(value: TokenSequence) -> Self {
        value.0.iter().map(ToString::to_string).collect()
    }
}
