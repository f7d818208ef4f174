//! Error handling for the engine
//!
//! Two families of failure exist and they are deliberately kept apart:
//!
//! - [`EngineError`] covers operations that fail as a whole: store IO, missing
//!   repeaters, integrity violations during duplication, rejected deletions.
//!   These are returned as `Err` and usually travel through [`anyhow::Error`].
//! - Evaluation failures (division by zero, missing input, cycles) are *values*,
//!   see [`crate::eval::EvalFailure`]. They never abort more than the single
//!   capability being evaluated.
//!
//! For the command-line front end, [`user_friendly_error`] converts any
//! [`anyhow::Error`] into an [`ErrorContext`] carrying a suggestion and details
//! that are printed with colors.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tbl_engine::core::{EngineError, user_friendly_error};
//!
//! let err = EngineError::NodeNotFound {
//!     id: "roof-area".to_string(),
//! };
//! user_friendly_error(anyhow::Error::from(err)).display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::models::CapabilityKind;

/// Operational errors raised by the store, the duplication orchestrator and
/// the command-line front end.
///
/// # Duplication integrity
///
/// [`IdCollision`], [`ScopeViolation`] and [`DuplicationIntegrity`] are the
/// integrity class: the duplication transaction that raised them is rolled back
/// in full. They indicate a bug in suffix allocation or a corrupted store rather
/// than a condition the caller can recover from by retrying.
///
/// [`IdCollision`]: EngineError::IdCollision
/// [`ScopeViolation`]: EngineError::ScopeViolation
/// [`DuplicationIntegrity`]: EngineError::DuplicationIntegrity
#[derive(Error, Debug)]
pub enum EngineError {
    /// A node id was not present in the store
    #[error("Node '{id}' not found")]
    NodeNotFound {
        /// The id that was looked up
        id: String,
    },

    /// A capability id was not present in the store
    #[error("{kind} '{id}' not found")]
    CapabilityNotFound {
        /// Kind of capability that was requested
        kind: CapabilityKind,
        /// The id that was looked up
        id: String,
    },

    /// Duplication was requested on a node that is not a repeater
    #[error("Node '{id}' is a {node_type}, not a repeater")]
    NotARepeater {
        /// The node id
        id: String,
        /// The actual type of the node
        node_type: String,
    },

    /// None of a repeater's configured templates exist any more
    #[error("Repeater '{repeater_id}' has no usable template nodes")]
    NoTemplates {
        /// The repeater node id
        repeater_id: String,
    },

    /// A repeater instance scope was not registered on the repeater
    #[error("Repeater '{repeater_id}' has no instance with scope '{scope_id}'")]
    InstanceNotFound {
        /// The repeater node id
        repeater_id: String,
        /// The scope id that was requested
        scope_id: String,
    },

    /// A clone id already exists in the store
    #[error("Duplication integrity violation: id '{id}' already exists")]
    IdCollision {
        /// The colliding id
        id: String,
    },

    /// A rewritten reference would point into another clone scope
    #[error(
        "Duplication integrity violation: '{capability_id}' would reference '{target}' from scope '{target_scope}'"
    )]
    ScopeViolation {
        /// The cloned capability holding the reference
        capability_id: String,
        /// The referenced id
        target: String,
        /// The scope the target belongs to
        target_scope: String,
    },

    /// Any other integrity failure detected before commit
    #[error("Duplication integrity violation: {reason}")]
    DuplicationIntegrity {
        /// Description of the violation
        reason: String,
    },

    /// A node cannot be deleted while capabilities still reference it
    #[error("Node '{id}' is still referenced by {referrers}")]
    NodeStillReferenced {
        /// The node that was to be deleted
        id: String,
        /// Comma separated list of referring capability ids
        referrers: String,
    },

    /// A reference token could not be parsed
    #[error("Invalid reference token: '{token}'")]
    InvalidReference {
        /// The raw token
        token: String,
    },

    /// The capability reference graph contains a cycle
    #[error("Circular reference detected: {chain}")]
    CircularReference {
        /// The ids forming the cycle, joined with arrows
        chain: String,
    },

    /// The store document violates a structural invariant
    #[error("Store is corrupted: {reason}")]
    StoreCorrupted {
        /// Description of the violation
        reason: String,
    },

    /// The store file does not exist
    #[error("Store file not found: {path}")]
    StoreNotFound {
        /// The path that was tried
        path: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Catch-all with a free-form message
    #[error("{message}")]
    Other {
        /// The message
        message: String,
    },
}

impl EngineError {
    /// Returns `true` for the errors that abort a duplication transaction.
    #[must_use]
    pub const fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::IdCollision { .. }
                | Self::ScopeViolation { .. }
                | Self::DuplicationIntegrity { .. }
        )
    }
}

impl Clone for EngineError {
    fn clone(&self) -> Self {
        match self {
            Self::NodeNotFound {
                id,
            } => Self::NodeNotFound {
                id: id.clone(),
            },
            Self::CapabilityNotFound {
                kind,
                id,
            } => Self::CapabilityNotFound {
                kind: *kind,
                id: id.clone(),
            },
            Self::NotARepeater {
                id,
                node_type,
            } => Self::NotARepeater {
                id: id.clone(),
                node_type: node_type.clone(),
            },
            Self::NoTemplates {
                repeater_id,
            } => Self::NoTemplates {
                repeater_id: repeater_id.clone(),
            },
            Self::InstanceNotFound {
                repeater_id,
                scope_id,
            } => Self::InstanceNotFound {
                repeater_id: repeater_id.clone(),
                scope_id: scope_id.clone(),
            },
            Self::IdCollision {
                id,
            } => Self::IdCollision {
                id: id.clone(),
            },
            Self::ScopeViolation {
                capability_id,
                target,
                target_scope,
            } => Self::ScopeViolation {
                capability_id: capability_id.clone(),
                target: target.clone(),
                target_scope: target_scope.clone(),
            },
            Self::DuplicationIntegrity {
                reason,
            } => Self::DuplicationIntegrity {
                reason: reason.clone(),
            },
            Self::NodeStillReferenced {
                id,
                referrers,
            } => Self::NodeStillReferenced {
                id: id.clone(),
                referrers: referrers.clone(),
            },
            Self::InvalidReference {
                token,
            } => Self::InvalidReference {
                token: token.clone(),
            },
            Self::CircularReference {
                chain,
            } => Self::CircularReference {
                chain: chain.clone(),
            },
            Self::StoreCorrupted {
                reason,
            } => Self::StoreCorrupted {
                reason: reason.clone(),
            },
            Self::StoreNotFound {
                path,
            } => Self::StoreNotFound {
                path: path.clone(),
            },
            Self::ConfigError {
                message,
            } => Self::ConfigError {
                message: message.clone(),
            },
            Self::IoError(e) => Self::Other {
                message: format!("IO error: {e}"),
            },
            Self::JsonError(e) => Self::Other {
                message: format!("JSON error: {e}"),
            },
            Self::TomlError(e) => Self::Other {
                message: format!("TOML parsing error: {e}"),
            },
            Self::TomlSerError(e) => Self::Other {
                message: format!("TOML serialization error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// An [`EngineError`] enriched with a suggestion and details for display.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: EngineError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error without suggestion or details.
    #[must_use]
    pub const fn new(error: EngineError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Attach a suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] suitable for terminal output.
///
/// Known [`EngineError`] variants get tailored suggestions. IO and parse errors
/// found anywhere in the chain are recognised too; everything else is wrapped
/// as [`EngineError::Other`] with the full cause chain in the details.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(ctx) = error.downcast_ref::<ErrorContext>() {
        return ErrorContext {
            error: ctx.error.clone(),
            suggestion: ctx.suggestion.clone(),
            details: ctx.details.clone(),
        };
    }

    if let Some(engine_error) = error.downcast_ref::<EngineError>() {
        return create_error_context(engine_error.clone());
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(EngineError::Other {
                    message: error.to_string(),
                })
                .with_suggestion("Check that the file exists and the path is correct");
            }
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(EngineError::Other {
                    message: error.to_string(),
                })
                .with_suggestion("Check the file permissions of the store and config files");
            }
            _ => {}
        }
    }

    if let Some(json_error) = error.downcast_ref::<serde_json::Error>() {
        return ErrorContext::new(EngineError::Other {
            message: format!("Invalid JSON: {json_error}"),
        })
        .with_suggestion("Check the JSON syntax of the store or value context file")
        .with_details(format!(
            "Parsing stopped at line {}, column {}",
            json_error.line(),
            json_error.column()
        ));
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(EngineError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax of your config.toml");
    }

    let chain: Vec<String> = error.chain().skip(1).map(std::string::ToString::to_string).collect();
    let mut ctx = ErrorContext::new(EngineError::Other {
        message: error.to_string(),
    });
    if !chain.is_empty() {
        ctx = ctx.with_details(format!("Caused by: {}", chain.join(": ")));
    }
    ctx
}

fn create_error_context(error: EngineError) -> ErrorContext {
    match &error {
        EngineError::NodeNotFound {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Run 'tbl validate' to list the nodes and check the id for typos"),

        EngineError::CapabilityNotFound {
            kind,
            ..
        } => {
            let suggestion = format!("Check that the {kind} id is spelled exactly as stored, including any copy suffix");
            ErrorContext::new(error).with_suggestion(suggestion)
        }

        EngineError::NotARepeater {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Only nodes of type 'repeater' can be duplicated; pass the repeater id, not a template id"),

        EngineError::NoTemplates {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Configure at least one existing template node on the repeater")
            .with_details("Template nodes that were deleted after the repeater was configured are skipped"),

        EngineError::IdCollision {
            ..
        }
        | EngineError::ScopeViolation {
            ..
        }
        | EngineError::DuplicationIntegrity {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Run 'tbl validate' on the store; no changes were written")
            .with_details("The duplication transaction was rolled back in full"),

        EngineError::NodeStillReferenced {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Remove or rewrite the referring capabilities before deleting the node"),

        EngineError::CircularReference {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Break the cycle by removing one of the references in the chain"),

        EngineError::StoreNotFound {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Pass --store <file> or set store_path in config.toml"),

        EngineError::StoreCorrupted {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Restore the store from a backup or fix the reported entries by hand"),

        EngineError::ConfigError {
            ..
        }
        | EngineError::TomlError(_)
        | EngineError::TomlSerError(_) => ErrorContext::new(error)
            .with_suggestion("Check config.toml or run 'tbl config init' to write a fresh one"),

        _ => ErrorContext::new(error),
    }
}

/// Attach a prepared [`ErrorContext`] to an error while converting it to [`anyhow::Error`].
pub trait IntoAnyhowWithContext {
    /// Convert into an [`anyhow::Error`] carrying the given context.
    fn into_anyhow_with_context(self, context: ErrorContext) -> anyhow::Error;
}

impl IntoAnyhowWithContext for EngineError {
    fn into_anyhow_with_context(self, context: ErrorContext) -> anyhow::Error {
        anyhow::Error::new(ErrorContext {
            error: self,
            suggestion: context.suggestion,
            details: context.details,
        })
    }
}
