use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the `rpdb-api` crate.
///
/// Splits failures into the server-side rejection kinds the API
/// documents and the local transport/decode failures below them.
/// `rpdb-core` surfaces the same type to its callers.
#[derive(Debug, Error)]
pub enum Error {
    /// The server rejected the request with a recognized error body
    /// (HTTP 3xx/4xx).
    #[error("{message} ({id}, HTTP {code})")]
    Remote {
        /// Unique id of the error, e.g. `INVALID_DATE`.
        id: String,
        /// HTTP status code of the response.
        code: u16,
        /// Humanized message in the client language.
        message: String,
        /// Method and path of the failed request.
        path: String,
        /// Additional details present when the server runs in debug mode.
        debug: Option<RemoteErrorDebug>,
    },

    /// The server failed with HTTP 500 or above; the body is not
    /// interpreted in that case.
    #[error("Unknown error (HTTP {code})")]
    Server { code: u16, path: String },

    /// Transport, decode or I/O failure below HTTP semantics.
    #[error("request failed: {cause}")]
    Local { cause: String, path: String },

    /// A lookup in the local cache found nothing.
    #[error("{entity} {id} was not found")]
    NotFound { entity: &'static str, id: String },
}

impl Error {
    /// Wrap a transport-level failure for the given request path.
    pub fn local(path: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Error::Local {
            cause: cause.to_string(),
            path: path.into(),
        }
    }

    /// Cache miss for an entry id.
    pub fn entry_not_found(id: i64) -> Self {
        Error::NotFound {
            entity: "entry",
            id: id.to_string(),
        }
    }

    /// Cache miss for an attribute id or name.
    pub fn attribute_not_found(id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            entity: "attribute",
            id: id.to_string(),
        }
    }

    /// The HTTP status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Remote { code, .. } | Error::Server { code, .. } => Some(*code),
            Error::NotFound { .. } => Some(404),
            Error::Local { .. } => None,
        }
    }

    /// Whether this error represents a missing object (locally or on
    /// the server side).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
            || matches!(self, Error::Remote { code: 404, .. })
    }
}

/// The `{"error": {...}}` body the server sends for controlled
/// rejections. Also attached to failed bulk rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteErrorBody {
    /// Unique id of the error.
    pub id: String,

    /// Humanized message in the client language.
    pub message: String,

    /// Optional technical description.
    #[serde(rename = "detailedErrorDescription")]
    pub detailed_error_description: String,

    #[serde(flatten)]
    pub debug: RemoteErrorDebug,
}

/// Debug-mode fields of a server error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteErrorDebug {
    /// Source file the error was raised in.
    pub file: String,

    /// Source line the error was raised at.
    pub line: i64,

    /// Stack trace of the thrown exception.
    pub backtrace: Vec<String>,
}

impl RemoteErrorBody {
    /// Whether the body carries an actual error.
    pub fn is_zero(&self) -> bool {
        self.id.is_empty() && self.message.is_empty()
    }

    /// Convert the wire body into an [`Error::Remote`].
    pub fn into_error(self, code: u16, path: String) -> Error {
        let debug = if self.debug.file.is_empty() && self.debug.backtrace.is_empty() {
            None
        } else {
            Some(self.debug)
        };
        Error::Remote {
            id: self.id,
            code,
            message: self.message,
            path,
            debug,
        }
    }
}

/// Wrapper matching the `{"error": {...}}` envelope.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RemoteErrorEnvelope {
    pub error: RemoteErrorBody,
}

// ── Tests ────────────────────────────────────────────────────────────
