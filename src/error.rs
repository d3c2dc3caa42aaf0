//! Error taxonomy for the manager core, following §7 of the design spec.
//!
//! Four buckets match the spec's propagation policy: [`VistleError::Fatal`] aborts the rank,
//! [`VistleError::ModuleCrash`] and [`VistleError::Transfer`] are locally recovered, and
//! [`VistleError::UserLevel`] is surfaced to the UI via `SEND_TEXT` without aborting the execute.

use std::io;

use crate::id::Id;

#[derive(thiserror::Error, Debug)]
pub enum VistleError {
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("module {module} crashed: {reason}")]
    ModuleCrash { module: Id, reason: String },

    #[error("object transfer failed for {object}: {reason}")]
    Transfer { object: String, reason: String },

    #[error("{0}")]
    UserLevel(String),

    #[error("message exceeds the {limit}-byte wire ceiling ({actual} bytes)")]
    MessageTooLarge { actual: usize, limit: usize },

    #[error("unsupported compression backend: {0:?}")]
    UnsupportedCompression(crate::data_manager::compression::CompressionMode),

    #[error("io error")]
    Io(#[from] io::Error),

    #[error("encode error")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("config error at `{path}`: {source}")]
    ConfigAt { path: String, #[source] source: serde_yaml::Error },
}

pub type Result<T> = std::result::Result<T, VistleError>;

impl VistleError {
    /// Whether the run loop is permitted to turn this error into a rank abort (§7).
    pub fn is_fatal(&self) -> bool {
        matches!(self, VistleError::Fatal(_) | VistleError::Io(_))
    }
}
