//! Error taxonomy for the monitor.
//!
//! - [`SourceError`]: one volatility adapter failed; recovered by the next adapter.
//! - [`ConfigError`]: unknown or malformed instrument/config; fatal at startup.
//! - [`PersistenceError`]: the position store could not be read or written.
//!
//! Data unavailability is not an error here: it is carried as
//! [`IvQuality::Unavailable`](crate::market::IvQuality) on a snapshot.

use std::path::PathBuf;
use thiserror::Error;

/// A single volatility source could not produce a value.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The adapter has nothing to offer for this instrument/side.
    #[error("{adapter} unavailable: {reason}")]
    Unavailable {
        adapter: &'static str,
        reason: String,
    },

    /// The adapter did not answer within its time budget.
    #[error("{adapter} timed out after {timeout_ms}ms")]
    Timeout { adapter: &'static str, timeout_ms: u64 },

    /// Transport-level failure.
    #[error("{adapter} request failed: {error}")]
    Http {
        adapter: &'static str,
        #[source]
        error: reqwest::Error,
    },

    /// The response arrived but could not be understood.
    #[error("{adapter} returned unparseable data: {reason}")]
    Parse {
        adapter: &'static str,
        reason: String,
    },
}

impl SourceError {
    pub fn unavailable(adapter: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            adapter,
            reason: reason.into(),
        }
    }

    pub fn parse(adapter: &'static str, reason: impl Into<String>) -> Self {
        Self::Parse {
            adapter,
            reason: reason.into(),
        }
    }

    pub fn http(adapter: &'static str, error: reqwest::Error) -> Self {
        Self::Http { adapter, error }
    }
}

/// Configuration problems. Always fatal before the loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("duplicate instrument id: {0}")]
    Duplicate(String),

    #[error("invalid configuration for {scope}: {reason}")]
    Invalid { scope: String, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn invalid(scope: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            scope: scope.into(),
            reason: reason.into(),
        }
    }
}

/// The position store is unreadable or unwritable.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("position store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("position store at {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
