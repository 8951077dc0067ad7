use thiserror::Error;

use crate::version::ServerVersion;

/// Contract violations in calling code.
///
/// These are raised synchronously, before any I/O, and are never retried
/// or folded into a [`CallResult`](crate::CallResult): the caller itself
/// is wrong, not the network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("{method} requires a body, even an empty one")]
    MissingBody { method: &'static str },

    #[error("no connections available for this call")]
    NoConnections,

    #[error("connection '{name}' is already registered")]
    DuplicateConnection { name: String },

    #[error("connection '{name}' is not registered")]
    UnknownConnection { name: String },

    #[error("'skip' and 'page' express the same offset and cannot be combined")]
    ConflictingPageOptions,

    #[error("paging state was exported with a custom {role}; resupply it on import")]
    MissingPageFunction { role: &'static str },

    #[error("result is still {phase}; only delayed results can be completed")]
    NotDelayed { phase: &'static str },

    #[error("result carries no pagination state to continue from")]
    NotPaged,

    #[error("the 'page' option requires a bounded page size")]
    PageWithoutSize,
}

/// Errors raised by a dispatch before any transport work happens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("api was removed in {removed}, but the client expects {expectation}")]
    VersionIncompatible {
        removed: ServerVersion,
        expectation: ServerVersion,
    },
}

/// Payload access on a result whose response has not arrived yet.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("result is not ready; the response has not been attached")]
pub struct NotReadyError;

/// Transport-level failure: connect, timeout, malformed payload.
///
/// Never raised out of a dispatch; it is captured inside the result's
/// status and message so callers inspect a failed result instead of
/// catching errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Value-shape failures from the converter table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("no converter registered under '{name}'")]
    UnknownConverter { name: String },

    #[error("converter '{name}' expected {expected}")]
    BadShape {
        name: &'static str,
        expected: &'static str,
    },
}
