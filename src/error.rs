//! Unified error type.
//!
//! Every failure kumo can report is one variant of [`Error`]. Mapping a
//! middleware failure to an HTTP status is a total `match` over the enum,
//! see [`Error::middleware_status`].

use http::StatusCode;
use tokio_tungstenite::tungstenite;

/// A boxed, thread-safe error, used where kumo wraps a foreign error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `Result` specialised to kumo's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by kumo's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A route pattern or group prefix was rejected at registration time.
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A route was registered without a handler.
    #[error("no handler supplied for `{0}`")]
    NullHandler(String),

    /// Nothing to encode or decode: a JSON `null` payload or an empty body.
    #[error("Invalid data")]
    InvalidData,

    /// The `Authorization` header is missing, has no scheme, or carries
    /// claims that are not a JSON object.
    #[error("Invalid Token")]
    InvalidToken,

    /// The bearer token failed to parse, verify, or is past its expiry.
    #[error("Expired Token")]
    ExpiredToken,

    /// A server-side failure with a message meant for the response body.
    #[error("{0}")]
    Internal(String),

    /// The message-stream backend could not be reached or prepared.
    #[error("stream connect: {0}")]
    StreamConnect(#[source] BoxError),

    #[error("stream write: {0}")]
    StreamWrite(#[source] BoxError),

    #[error("stream read: {0}")]
    StreamRead(#[source] BoxError),

    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The inbound request body could not be read.
    #[error("request body: {0}")]
    Body(#[source] BoxError),

    /// Any application error a handler wants to bubble up.
    #[error("{0}")]
    Other(#[source] BoxError),
}

impl Error {
    /// Wraps an arbitrary application error.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// A server-side failure whose message becomes the response body.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.to_owned(), reason: reason.into() }
    }

    /// The status a request is answered with when a middleware fails with
    /// this error. Authentication failures are `401`; everything else `400`.
    pub fn middleware_status(&self) -> StatusCode {
        match self {
            Self::InvalidToken | Self::ExpiredToken => StatusCode::UNAUTHORIZED,
            Self::InvalidPath { .. }
            | Self::NullHandler(_)
            | Self::InvalidData
            | Self::Internal(_)
            | Self::StreamConnect(_)
            | Self::StreamWrite(_)
            | Self::StreamRead(_)
            | Self::NotFound
            | Self::MethodNotAllowed
            | Self::Io(_)
            | Self::Json(_)
            | Self::WebSocket(_)
            | Self::Body(_)
            | Self::Other(_) => StatusCode::BAD_REQUEST,
        }
    }
}
