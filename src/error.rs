//! Error types for dcrflow.
//!
//! Every fallible operation returns a `DcrError`. The first four variants are
//! expected outcomes of an execution attempt that callers routinely branch on;
//! the rest describe transport, storage, and configuration failures.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all dcrflow operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum DcrError {
    /// The addressed event or workflow does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// None of the caller's roles are configured on the event.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The event is held by an in-flight execution.
    #[error("event {key} is locked by {owner}")]
    Locked {
        key: String,
        owner: String,
    },

    /// The event is excluded or one of its conditions is unmet.
    #[error("not executable: {0}")]
    NotExecutable(String),

    /// Transport-level failure talking to another node (timeout, refused connection).
    #[error("peer {uri} unreachable: {message}")]
    PeerUnreachable {
        uri: String,
        message: String,
    },

    /// The peer answered with a status the protocol does not recognise.
    #[error("peer {uri} rejected the request with status {status}: {message}")]
    PeerRejected {
        uri: String,
        status: u16,
        message: String,
    },

    /// The entity already exists or conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed event definition or request.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage operation errors.
    #[error("store: {0}")]
    Store(String),

    /// Configuration parsing or validation errors.
    #[error("config: {0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML).
    #[error("convert: {0}")]
    Convert(String),

    /// Workflow directory errors.
    #[error("directory: {0}")]
    Directory(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl DcrError {
    /// Whether the same request may succeed when retried later unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DcrError::Locked { .. } | DcrError::PeerUnreachable { .. })
    }

    /// Whether the failure happened in transport rather than at the peer.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DcrError::PeerUnreachable { .. })
    }
}

impl From<DcrError> for String {
    fn from(val: DcrError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for DcrError {
    fn from(error: std::io::Error) -> Self {
        DcrError::IoError(error.to_string())
    }
}

impl From<DcrError> for std::io::Error {
    fn from(val: DcrError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for DcrError {
    fn from(_: FromUtf8Error) -> Self {
        DcrError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for DcrError {
    fn from(error: serde_json::Error) -> Self {
        DcrError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for DcrError {
    fn from(error: toml::de::Error) -> Self {
        DcrError::Config(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for DcrError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        DcrError::Validation(error.to_string())
    }
}
