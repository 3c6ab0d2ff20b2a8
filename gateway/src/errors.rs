use hyper::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::config::ValidationError;
use crate::request::Operation;

/// Result type alias for gateway operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors that terminate a request before or while it is handled.
///
/// Apart from [`GatewayError::Denied`], every variant is reported to the caller
/// as a structured JSON body, see [`ErrorBody`].
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Denied(String),

    #[error("permission service unavailable: {0}")]
    AuthUnavailable(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no operation served at {0}")]
    UnknownOperation(String),

    #[error("method {0} not allowed, use POST")]
    MethodNotAllowed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("failed to start: {0}")]
    Startup(String),

    #[error("request task failed: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Decode(DecodeError::BodyTooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Denied(_) => StatusCode::FORBIDDEN,
            Self::AuthUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::BAD_GATEWAY,
            Self::UnknownOperation(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Io(_) | Self::Config(_) | Self::Startup(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable identifier reported in the `Error` field of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode_error",
            Self::Denied(_) => "authorization_denied",
            Self::AuthUnavailable(_) => "auth_unavailable",
            Self::Store(_) => "store_error",
            Self::UnknownOperation(_) => "unknown_operation",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::Io(_) | Self::Config(_) | Self::Startup(_) | Self::Internal(_) => {
                "internal_error"
            }
        }
    }
}

/// JSON body written for every failure except authorization denials.
#[derive(Serialize, Debug)]
pub struct ErrorBody<'a> {
    #[serde(rename = "Status")]
    pub status: &'static str,
    #[serde(rename = "Error")]
    pub error: &'static str,
    #[serde(rename = "Message")]
    pub message: &'a str,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("wrong JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("collection must not be empty")]
    EmptyCollection,

    #[error("{0} requires a data document")]
    MissingData(Operation),

    #[error("{0} requires a non-empty select")]
    MissingSelect(Operation),

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("unsupported filter operator {0}")]
    UnsupportedOperator(String),

    #[error("invalid sort specification for field {0}")]
    InvalidSort(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("{0}")]
    Denied(String),

    #[error("{0}")]
    Unavailable(String),
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Denied(reason) => GatewayError::Denied(reason),
            AuthError::Unavailable(reason) => GatewayError::AuthUnavailable(reason),
        }
    }
}

/// Failures on the duplication side channel. These are only ever logged.
#[derive(Error, Debug)]
pub enum DuplicationError {
    #[error("failed to serialize duplicated request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("duplication queue is full")]
    QueueFull,

    #[error("duplication queue is closed")]
    QueueClosed,

    #[error("invalid duplication target: {0}")]
    InvalidTarget(String),

    #[error("forwarding to {target} failed: {reason}")]
    ForwardFailed { target: String, reason: String },

    #[error("forwarding to {0} timed out")]
    ForwardTimeout(String),
}

impl DuplicationError {
    /// Short label used to tag drop metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Serialize(_) => "serialize",
            Self::QueueFull => "queue_full",
            Self::QueueClosed => "queue_closed",
            Self::InvalidTarget(_) => "invalid_target",
            Self::ForwardFailed { .. } => "forward_failed",
            Self::ForwardTimeout(_) => "forward_timeout",
        }
    }
}
