//! Error taxonomy for the tracking engine
//!
//! Lifecycle and anchor operations surface failures to the caller. Transient
//! tracking loss is deliberately absent from these types: it is reported as
//! `None` poses and invisible nodes.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use thiserror::Error;

/// Errors raised by engine operations
#[derive(Debug, Error)]
pub enum XrError {
    /// No session is live
    #[error("session unavailable")]
    SessionUnavailable,

    /// The operation needs the current tracking frame
    #[error("frame unavailable")]
    FrameUnavailable,

    /// The renderer has no reference space yet
    #[error("reference space unavailable")]
    ReferenceSpaceUnavailable,

    /// An optional host feature is missing
    #[error("{capability} not available")]
    CapabilityAbsent { capability: &'static str },

    /// The host accepted the request but produced no anchor
    #[error("create anchor failed: {0}")]
    AnchorCreationFailed(String),

    /// An image was used for tracking without being requested at session start
    #[error("unknown image; tracked images must be requested when the session starts")]
    UnknownImage,

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for engine operations
pub type XrResult<T> = Result<T, XrError>;

/// Errors reported by the device runtime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// The session already ended
    #[error("session ended")]
    Ended,
}

/// Errors from persistent key-value storage
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file is not a flat string map: {0}")]
    Serde(#[from] serde_json::Error),
}

impl XrError {
    pub(crate) fn capability(capability: &'static str) -> Self {
        XrError::CapabilityAbsent { capability }
    }
}
