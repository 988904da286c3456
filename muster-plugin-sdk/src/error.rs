//! # Error Handling Module
//!
//! Standardized error types shared by the core and every plugin.
//!
//! Two layers exist:
//! - [`ApiError`]: request-level failures that abort the whole request
//!   (invalid input, unresolved paths, lost quorum, transport faults).
//! - [`WireError`]: a serializable mirror of `ApiError` used when an
//!   error has to cross the collective wire inside a framed response.
//!
//! Per-node failures are deliberately NOT errors: they travel as
//! ordinary [`crate::messages::ResponseItem`]s (`NodeError`,
//! `ResourceUnavailable`) so that a fan-out over many nodes keeps
//! streaming even when some nodes misbehave.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request-level errors surfaced to the API caller.
///
/// These abort the request; they never describe a single node's failure.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed input; surfaced to the caller immediately, not retried
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Path does not resolve, or node/group/user unknown
    #[error("Not found: {0}")]
    NotFound(String),

    /// Service-wide precondition failed (filesystem full, quorum lost)
    #[error("Target resource unavailable: {0}")]
    TargetResourceUnavailable(String),

    /// Route exists but the operation is unsupported
    #[error("Not implemented")]
    NotImplemented,

    /// A peer presented a certificate that does not match its pinned
    /// fingerprint; fatal to the current request
    #[error("Invalid certificate on collective peer {0}")]
    PeerCertificateMismatch(String),

    /// Socket-level failures talking to a peer or listener
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON payload serialization and deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Envelope or frame encoding errors on the collective wire
    #[error("Wire encoding error: {0}")]
    Wire(String),

    /// A handler failed in a way it could not attribute to one node
    #[error("Plugin failure: {0}")]
    Plugin(String),
}

/// Broad classification for errors crossing the collective wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
    InvalidArgument,
    NotFound,
    TargetResourceUnavailable,
    NotImplemented,
    Internal,
}

/// Serializable mirror of [`ApiError`] for peer transport.
///
/// The concrete source error (an `io::Error`, a serde failure) cannot
/// cross the wire, so it collapses into a kind plus its display string.
/// Round-tripping an `ApiError` through `WireError` preserves the kind
/// for the variants the protocol distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
}

impl From<&ApiError> for WireError {
    fn from(err: &ApiError) -> Self {
        let kind = match err {
            ApiError::InvalidArgument(_) => WireErrorKind::InvalidArgument,
            ApiError::NotFound(_) => WireErrorKind::NotFound,
            ApiError::TargetResourceUnavailable(_) => WireErrorKind::TargetResourceUnavailable,
            ApiError::NotImplemented => WireErrorKind::NotImplemented,
            _ => WireErrorKind::Internal,
        };
        WireError {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<WireError> for ApiError {
    fn from(err: WireError) -> Self {
        match err.kind {
            WireErrorKind::InvalidArgument => ApiError::InvalidArgument(err.message),
            WireErrorKind::NotFound => ApiError::NotFound(err.message),
            WireErrorKind::TargetResourceUnavailable => {
                ApiError::TargetResourceUnavailable(err.message)
            }
            WireErrorKind::NotImplemented => ApiError::NotImplemented,
            WireErrorKind::Internal => ApiError::Plugin(err.message),
        }
    }
}
