//! Error types for the docbridge library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SetupError`] — **Fatal**: the service cannot start at all (backend
//!   binary missing, bad configuration, port already bound). The binary maps
//!   these to a non-zero exit code.
//!
//! * [`ConvertError`] — **Per-job**: one document failed to convert. It is
//!   rendered as a structured HTTP error and never takes the process down.
//!
//! Every [`ConvertError`] carries a stable [`ErrorKind`] so clients can branch
//! on the kind rather than on the human-readable message.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Stable classification of a per-job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    MalformedMathml,
    ConversionFailed,
    ConversionTimeout,
    Cancelled,
    InternalError,
}

impl ErrorKind {
    /// The wire name used in JSON error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::MalformedMathml => "malformed_mathml",
            ErrorKind::ConversionFailed => "conversion_failed",
            ErrorKind::ConversionTimeout => "conversion_timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

/// All per-job errors returned by [`crate::convert::Converter`].
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Request body was empty.
    #[error("Request body is empty")]
    EmptyBody,

    /// Request body exceeds the configured limit. `size` is the declared or
    /// observed length, whichever was known first.
    #[error("Request body of {size} bytes exceeds the {limit}-byte limit")]
    BodyTooLarge { size: usize, limit: usize },

    /// A format name did not match any supported format.
    #[error("Unknown document format '{0}'")]
    UnknownFormat(String),

    /// Both formats are known but no backend converts between them.
    #[error("Conversion from {from} to {to} is not supported")]
    UnsupportedPair { from: String, to: String },

    /// Request was syntactically invalid for some other reason.
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// Fetching a remote source document failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Math errors ───────────────────────────────────────────────────────
    /// A MathML fragment could not be translated to Office Math.
    #[error("Formula {index} is not valid MathML: {source}")]
    MalformedMathml {
        /// 1-based position of the fragment in the document.
        index: usize,
        #[source]
        source: MathError,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// Backend process exited non-zero, or exited cleanly without output.
    #[error("{backend} conversion failed (exit code {code:?}): {stderr}")]
    ConversionFailed {
        backend: &'static str,
        code: Option<i32>,
        /// Captured standard error, truncated and path-sanitised.
        stderr: String,
    },

    /// Backend exceeded its allotted time and was killed.
    #[error("{backend} conversion timed out after {secs}s")]
    ConversionTimeout { backend: &'static str, secs: u64 },

    /// The job was cancelled before it finished (client went away).
    #[error("Conversion was cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error. The detail is logged, never sent to clients.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::EmptyBody
            | ConvertError::BodyTooLarge { .. }
            | ConvertError::UnknownFormat(_)
            | ConvertError::UnsupportedPair { .. }
            | ConvertError::InvalidInput(_)
            | ConvertError::DownloadFailed { .. } => ErrorKind::InvalidInput,
            ConvertError::MalformedMathml { .. } => ErrorKind::MalformedMathml,
            ConvertError::ConversionFailed { .. } => ErrorKind::ConversionFailed,
            ConvertError::ConversionTimeout { .. } => ErrorKind::ConversionTimeout,
            ConvertError::Cancelled => ErrorKind::Cancelled,
            ConvertError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Message safe to show to a caller.
    ///
    /// Internal errors collapse to a generic sentence so that file-system
    /// paths and other host details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ConvertError::Internal(_) => "The server failed to process the document".to_string(),
            other => other.to_string(),
        }
    }
}

/// Failure to translate a single MathML fragment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MathError {
    /// The fragment is not well-formed XML.
    #[error("not well-formed XML: {0}")]
    NotWellFormed(String),

    /// The fragment parsed, but its root element is not `<math>`.
    #[error("expected <math> root element, found <{0}>")]
    WrongRoot(String),

    /// The fragment contains no elements at all.
    #[error("fragment contains no MathML element")]
    Empty,

    /// A layout element has the wrong number of children.
    #[error("<{element}> expects {expected} children, found {found}")]
    Arity {
        element: String,
        expected: &'static str,
        found: usize,
    },

    /// A `<math>` start tag was never closed inside the document.
    #[error("unterminated <math> element")]
    Unterminated,
}

/// Fatal errors raised while starting the service.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A backend binary could not be found or did not answer `--version`.
    #[error("Backend '{name}' is unavailable at '{path}': {reason}")]
    BackendUnavailable {
        name: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// A configured resource file is missing or unreadable.
    #[error("Resource '{path}' is unavailable: {source}")]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Workspace root could not be created.
    #[error("Workspace root '{path}' could not be prepared: {source}")]
    WorkspaceRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Listening socket could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The server loop stopped with an I/O error.
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
