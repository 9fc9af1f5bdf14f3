//! Error taxonomy for document sources.
//!
//! Failures are contained at the smallest scope that keeps the index
//! correct:
//!
//! | Variant | Scope | Engine reaction |
//! |---------|-------|-----------------|
//! | `Credential` | one source | source skipped this run |
//! | `Unavailable` | one listing | no deletions for that source this pass |
//! | `NotFound` | one item | item deleted from the index |
//! | `Fetch` | one item | retried, then counted as failed |
//! | `Normalization` | one item | skipped, retried next pass |
//! | `UnknownSourceType` / `Config` | startup | fatal |

use std::fmt;

use thiserror::Error;

use omnidex_core::normalize::NormalizeError;

pub type Result<T> = std::result::Result<T, SourceError>;

#[derive(Error, Debug)]
pub enum SourceError {
    /// The remote system rejected the configured credential.
    #[error("credentials rejected for {name}: {message}")]
    Credential { name: String, message: String },

    /// The listing could not be completed.
    #[error("{name} unavailable: {message}")]
    Unavailable { name: String, message: String },

    /// The item no longer exists remotely.
    #[error("{remote_id} not found")]
    NotFound { remote_id: String },

    /// Any other per-item failure, after retries.
    #[error("fetch failed for {remote_id}: {message}")]
    Fetch { remote_id: String, message: String },

    /// The payload could not be turned into indexable content.
    #[error("could not normalize {remote_id}: {message}")]
    Normalization { remote_id: String, message: String },

    #[error("unknown source type '{0}'")]
    UnknownSourceType(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SourceError {
    pub fn credential(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Credential {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn unavailable(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Unavailable {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(remote_id: impl Into<String>) -> Self {
        Self::NotFound {
            remote_id: remote_id.into(),
        }
    }

    pub fn fetch(remote_id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            remote_id: remote_id.into(),
            message: message.to_string(),
        }
    }

    pub fn normalization(remote_id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Normalization {
            remote_id: remote_id.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short label used in logs and pass records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Credential { .. } => "credential",
            Self::Unavailable { .. } => "unavailable",
            Self::NotFound { .. } => "not_found",
            Self::Fetch { .. } => "fetch",
            Self::Normalization { .. } => "normalization",
            Self::UnknownSourceType(_) => "unknown_source_type",
            Self::Config(_) => "config",
        }
    }

    pub fn from_normalize(remote_id: &str, err: NormalizeError) -> Self {
        Self::normalization(remote_id, err)
    }
}
