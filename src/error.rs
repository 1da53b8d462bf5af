//! Error handling.

use axum::{
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use regex::Regex;
use std::error::Error;
use thiserror::Error;
use tracing::{event, Level};

use crate::models::DType;

/// DAP error code for a request naming a dataset or response that does not exist.
pub const ERROR_CODE_NO_SUCH_FILE: i32 = 1001;
/// DAP error code for a malformed constraint expression or metadata document.
pub const ERROR_CODE_MALFORMED_EXPR: i32 = 1003;
/// DAP error code for a constraint expression naming an unknown variable.
pub const ERROR_CODE_NO_SUCH_VARIABLE: i32 = 1004;
/// DAP error code for any other failure while building a response.
pub const ERROR_CODE_INTERNAL: i32 = 1005;

/// DAP error type
///
/// This type encapsulates the various errors that may occur while parsing metadata, evaluating
/// constraint expressions, encoding or decoding data and talking to remote servers.
/// Each variant may result in a different DAP error response.
#[derive(Debug, Error)]
pub enum DapError {
    /// Malformed DDS, DAS, DMR or constraint text
    #[error("unable to parse {what}: {message} at \"{fragment}\"")]
    Parse {
        what: &'static str,
        message: String,
        fragment: String,
    },

    /// A bare variable name matched more than one variable
    #[error("ambiguous shorthand notation request: {0}")]
    AmbiguousShorthand(String),

    /// Reference to a variable that does not exist
    #[error("unknown variable {0}")]
    UnknownVariable(String),

    /// The protocol has no logical OR
    #[error("logical OR is not supported in constraint expressions: {0}")]
    DisallowedOr(String),

    /// A selection clause that cannot be evaluated
    #[error("invalid selection {0}")]
    InvalidSelection(String),

    /// A hyperslab clause with invalid bounds
    #[error("invalid hyperslab {0}")]
    InvalidHyperslab(String),

    /// Comparison between incompatible operands
    #[error("cannot compare {left} with {right}")]
    TypeMismatch { left: String, right: String },

    /// Operation not defined for a kind of variable, e.g. slicing a Structure
    #[error("cannot perform {operation} on {kind} {id}")]
    UnsupportedOperation {
        operation: &'static str,
        kind: &'static str,
        id: String,
    },

    /// Function call naming a function that was never registered
    #[error("unknown function {0}")]
    UnknownFunction(String),

    /// Unexpected bytes in a data stream
    #[error("framing error: {0}")]
    Framing(String),

    /// The data stream ended while more structure was expected
    #[error("unexpected end of stream: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// Decoded element count disagrees with the declared shape
    #[error("shape mismatch for {id}: expected {expected} elements, found {found}")]
    ShapeMismatch {
        id: String,
        expected: usize,
        found: usize,
    },

    /// Declared shape has more elements than can be addressed
    #[error("array {0} has too many elements")]
    TooManyElements(String),

    /// Data type disagrees with the declared type
    #[error("type mismatch for {id}: declared {declared}, found {found}")]
    DTypeMismatch {
        id: String,
        declared: DType,
        found: String,
    },

    /// A value that cannot be represented in its declared type
    #[error("value {value} is not representable as {dtype}")]
    IncompatibleValue { value: String, dtype: &'static str },

    /// A variable without data was asked for its values
    #[error("variable {0} has no data")]
    MissingData(String),

    /// No handler is registered under the requested name
    #[error("dataset {0} not found")]
    DatasetNotFound(String),

    /// Unknown response suffix
    #[error("unsupported response {0}")]
    UnsupportedResponse(String),

    /// A remote server answered with a DAP error payload
    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },

    /// A remote server answered with an unexpected HTTP status
    #[error("request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    /// A remote request exceeded its deadline
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Error from the HTTP client
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// Error reading a local file or response body
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Error parsing DMR XML
    #[error("failed to parse DMR document")]
    Xml(#[from] roxmltree::Error),

    /// Error creating ndarray array from shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ndarray::ShapeError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Error parsing a URL
    #[error("invalid URL")]
    Url(#[from] url::ParseError),

    /// Error compiling a regular expression from a `=~` selection
    #[error("invalid regular expression")]
    Regex(#[from] regex::Error),

    /// Text payload that is not UTF-8
    #[error("response text is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Error serializing a JSON response
    #[error("failed to serialize JSON response")]
    Json(#[from] serde_json::Error),

    /// A blocking task panicked or was cancelled
    #[error("background task failed")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl DapError {
    /// Build a [DapError::Parse] from the unconsumed input of a parser.
    ///
    /// Only the first ten characters of `remainder` are kept for diagnostics.
    pub fn parse(what: &'static str, message: impl Into<String>, remainder: &str) -> Self {
        DapError::Parse {
            what,
            message: message.into(),
            fragment: remainder.chars().take(10).collect(),
        }
    }

    /// DAP error code reported in the `Error { code = ...; }` payload.
    pub fn code(&self) -> i32 {
        match self {
            DapError::DatasetNotFound(_) | DapError::UnsupportedResponse(_) => {
                ERROR_CODE_NO_SUCH_FILE
            }
            DapError::UnknownVariable(_) => ERROR_CODE_NO_SUCH_VARIABLE,
            DapError::Parse { .. }
            | DapError::AmbiguousShorthand(_)
            | DapError::DisallowedOr(_)
            | DapError::InvalidSelection(_)
            | DapError::InvalidHyperslab(_)
            | DapError::TypeMismatch { .. }
            | DapError::UnsupportedOperation { .. }
            | DapError::UnknownFunction(_)
            | DapError::IncompatibleValue { .. }
            | DapError::Regex(_) => ERROR_CODE_MALFORMED_EXPR,
            DapError::Server { code, .. } => *code,
            _ => ERROR_CODE_INTERNAL,
        }
    }

    /// HTTP status used when this error is returned by the server.
    fn status(&self) -> StatusCode {
        match self {
            DapError::DatasetNotFound(_) | DapError::UnsupportedResponse(_) => {
                StatusCode::NOT_FOUND
            }
            DapError::Parse { .. }
            | DapError::AmbiguousShorthand(_)
            | DapError::UnknownVariable(_)
            | DapError::DisallowedOr(_)
            | DapError::InvalidSelection(_)
            | DapError::InvalidHyperslab(_)
            | DapError::TypeMismatch { .. }
            | DapError::UnsupportedOperation { .. }
            | DapError::UnknownFunction(_)
            | DapError::IncompatibleValue { .. }
            | DapError::Regex(_) => StatusCode::BAD_REQUEST,
            DapError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DapError::Server { .. } | DapError::HttpStatus { .. } | DapError::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body of a DAP error response
///
/// Renders as the DAP2 `Error { code = <n>; message = "<diagnostic>"; };` object.
#[derive(Debug, PartialEq)]
pub struct ErrorPayload {
    /// DAP error code
    pub code: i32,

    /// Main error message followed by its causes
    pub message: String,
}

impl ErrorPayload {
    /// Return a new ErrorPayload
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred. Its chain of sources is appended to the message.
    pub fn new(error: &DapError) -> Self {
        let mut causes: Vec<String> = vec![error.to_string()];
        let mut current = error.source();
        while let Some(source) = current {
            causes.push(source.to_string());
            current = source.source();
        }
        // Remove duplicate entries.
        causes.dedup();
        ErrorPayload {
            code: error.code(),
            message: causes.join(": "),
        }
    }

    /// Render the payload in DAP2 syntax.
    pub fn render(&self) -> String {
        format!(
            "Error {{\n    code = {};\n    message = \"{}\";\n}};\n",
            self.code,
            self.message.replace('\\', "\\\\").replace('"', "\\\"")
        )
    }

    /// Parse a DAP2 error payload, as returned by a remote server.
    ///
    /// Returns `None` if `text` is not an error object.
    pub fn parse(text: &str) -> Option<Self> {
        lazy_static! {
            static ref ERROR_OBJECT: Regex =
                Regex::new(r"(?is)^\s*Error\s*\{(.*)\}\s*;?\s*$").unwrap();
            static ref CODE: Regex = Regex::new(r"(?i)code\s*=\s*(-?\d+)\s*;").unwrap();
            static ref MESSAGE: Regex =
                Regex::new(r#"(?is)message\s*=\s*"((?:[^"\\]|\\.)*)"\s*;"#).unwrap();
        }
        let body = ERROR_OBJECT.captures(text)?.get(1)?.as_str();
        let code = CODE
            .captures(body)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(ERROR_CODE_INTERNAL);
        let message = MESSAGE
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().replace("\\\"", "\"").replace("\\\\", "\\"))
            .unwrap_or_default();
        Some(ErrorPayload { code, message })
    }
}

impl From<ErrorPayload> for DapError {
    fn from(payload: ErrorPayload) -> Self {
        DapError::Server {
            code: payload.code,
            message: payload.message,
        }
    }
}

impl IntoResponse for DapError {
    /// Convert from a `DapError` into an [axum::response::Response].
    ///
    /// DAP clients expect a parseable error object rather than a broken stream, so every error
    /// is rendered as a DAP2 `Error` payload.
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server errors.
        if status.is_server_error() {
            event!(Level::ERROR, "{}", self.to_string());
            let mut current = self.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        (
            status,
            [
                (header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.to_string()),
                (
                    header::HeaderName::from_static("content-description"),
                    "dods_error".to_string(),
                ),
                (
                    header::HeaderName::from_static("xdods-server"),
                    crate::XDODS_SERVER.to_string(),
                ),
            ],
            ErrorPayload::new(&self).render(),
        )
            .into_response()
    }
}
