//! Errors surfaced by password-manager adapters.

use std::io;
use std::process::ExitStatus;
use thiserror::Error;

/// Failure while talking to the password manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The reference string does not follow `op://<vault>/<item>/<field>`.
    #[error("invalid secret reference {reference:?}: {reason}")]
    InvalidReference {
        reference: String,
        reason: &'static str,
    },

    /// No value exists for the reference.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// The provider CLI could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        source: io::Error,
    },

    /// The provider CLI ran but reported failure.
    #[error("{command} exited with {status}: {stderr}")]
    Command {
        command: &'static str,
        status: ExitStatus,
        stderr: String,
    },

    /// The named field does not exist on the item.
    #[error("field {field:?} not found in item {item:?}")]
    FieldNotFound { field: String, item: String },

    /// The provider CLI produced output we could not parse.
    #[error("unexpected provider output: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Local I/O failure (e.g. staging a document backup).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
