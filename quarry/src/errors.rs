use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

use crate::collection::Document;
use crate::common::Value;

/// Error kinds for Quarry operations.
///
/// Every kind maps to a stable numeric code (see [ErrorKind::code]) so that
/// failures can cross a transport boundary as a reply document and be
/// reconstructed on the other side.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Registry and compilation errors
    /// No operator of the requested kind is registered under the name
    UnknownOperator,
    /// An operator with the same name and kind is already registered
    DuplicateOperator,
    /// The operator registry is sealed and no longer accepts registrations
    RegistrySealed,
    /// The storage format or layout is not known to any resolver
    UnsupportedFormat,

    // Namespace errors
    /// The namespace does not exist or was dropped
    NamespaceNotFound,
    /// The collection already exists with incompatible options
    CollectionExists,
    /// No store is mounted for the namespace's database
    NoStoreForNamespace,

    // Write errors
    /// A candidate document failed the collection validator
    ValidationError,
    /// A document with the same `_id` already exists
    DuplicateKey,

    // Command errors
    /// The command name is not understood by the store
    CommandNotFound,
    /// The cursor does not exist or is already exhausted
    CursorNotFound,
    /// A command, stage, or expression argument is malformed
    InvalidArgument,
    /// The operation is not valid in the current context
    InvalidOperation,

    // IO and encoding errors
    /// Remote endpoint failure, distinct from command failures
    TransportError,
    /// Filesystem read or write failure
    IOFailure,
    /// Error parsing or serializing json, yaml or utf-8 text
    EncodingError,

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl ErrorKind {
    /// Returns the machine-readable code for this kind.
    pub fn code(&self) -> i64 {
        match self {
            ErrorKind::InternalError => 1,
            ErrorKind::InvalidArgument => 2,
            ErrorKind::InvalidOperation => 20,
            ErrorKind::NamespaceNotFound => 26,
            ErrorKind::CursorNotFound => 43,
            ErrorKind::CollectionExists => 48,
            ErrorKind::CommandNotFound => 59,
            ErrorKind::TransportError => 89,
            ErrorKind::ValidationError => 121,
            ErrorKind::UnknownOperator => 168,
            ErrorKind::IOFailure => 1001,
            ErrorKind::EncodingError => 1002,
            ErrorKind::UnsupportedFormat => 1003,
            ErrorKind::DuplicateOperator => 1004,
            ErrorKind::RegistrySealed => 1005,
            ErrorKind::NoStoreForNamespace => 1006,
            ErrorKind::DuplicateKey => 11000,
        }
    }

    /// Returns the symbolic name paired with [ErrorKind::code].
    pub fn code_name(&self) -> &'static str {
        match self {
            ErrorKind::UnknownOperator => "UnknownOperator",
            ErrorKind::DuplicateOperator => "DuplicateOperator",
            ErrorKind::RegistrySealed => "RegistrySealed",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::NamespaceNotFound => "NamespaceNotFound",
            ErrorKind::CollectionExists => "NamespaceExists",
            ErrorKind::NoStoreForNamespace => "NoStoreForNamespace",
            ErrorKind::ValidationError => "DocumentValidationFailure",
            ErrorKind::DuplicateKey => "DuplicateKey",
            ErrorKind::CommandNotFound => "CommandNotFound",
            ErrorKind::CursorNotFound => "CursorNotFound",
            ErrorKind::InvalidArgument => "BadValue",
            ErrorKind::InvalidOperation => "IllegalOperation",
            ErrorKind::TransportError => "TransportError",
            ErrorKind::IOFailure => "IOFailure",
            ErrorKind::EncodingError => "EncodingError",
            ErrorKind::InternalError => "InternalError",
        }
    }

    /// Looks up a kind by its numeric code.
    pub fn from_code(code: i64) -> ErrorKind {
        match code {
            2 => ErrorKind::InvalidArgument,
            20 => ErrorKind::InvalidOperation,
            26 => ErrorKind::NamespaceNotFound,
            43 => ErrorKind::CursorNotFound,
            48 => ErrorKind::CollectionExists,
            59 => ErrorKind::CommandNotFound,
            89 => ErrorKind::TransportError,
            121 => ErrorKind::ValidationError,
            168 => ErrorKind::UnknownOperator,
            1001 => ErrorKind::IOFailure,
            1002 => ErrorKind::EncodingError,
            1003 => ErrorKind::UnsupportedFormat,
            1004 => ErrorKind::DuplicateOperator,
            1005 => ErrorKind::RegistrySealed,
            1006 => ErrorKind::NoStoreForNamespace,
            11000 => ErrorKind::DuplicateKey,
            _ => ErrorKind::InternalError,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::UnknownOperator => write!(f, "Unknown operator"),
            ErrorKind::DuplicateOperator => write!(f, "Duplicate operator"),
            ErrorKind::RegistrySealed => write!(f, "Registry sealed"),
            ErrorKind::UnsupportedFormat => write!(f, "Unsupported format"),
            ErrorKind::NamespaceNotFound => write!(f, "Namespace not found"),
            ErrorKind::CollectionExists => write!(f, "Collection exists"),
            ErrorKind::NoStoreForNamespace => write!(f, "No store for namespace"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::DuplicateKey => write!(f, "Duplicate key"),
            ErrorKind::CommandNotFound => write!(f, "Command not found"),
            ErrorKind::CursorNotFound => write!(f, "Cursor not found"),
            ErrorKind::InvalidArgument => write!(f, "Invalid argument"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::TransportError => write!(f, "Transport error"),
            ErrorKind::IOFailure => write!(f, "IO failure"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom Quarry error type.
///
/// `QuarryError` carries a message, a kind, an optional cause and an optional
/// details document. Validation failures use the details document to attach the
/// offending document and the rule it violated.
///
/// # Examples
///
/// ```rust,ignore
/// use quarry::errors::{QuarryError, ErrorKind};
///
/// let err = QuarryError::new("ns not found", ErrorKind::NamespaceNotFound);
/// let reply = err.to_document();
/// assert_eq!(reply.get("code"), Some(&26i64.into()));
/// ```
#[derive(Clone)]
pub struct QuarryError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<QuarryError>>,
    details: Option<Box<Document>>,
    backtrace: Arc<Backtrace>,
}

impl QuarryError {
    /// Creates a new `QuarryError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        QuarryError {
            message: message.to_string(),
            error_kind,
            cause: None,
            details: None,
            backtrace: Arc::new(Backtrace::new_unresolved()),
        }
    }

    /// Creates a new `QuarryError` with a cause error.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: QuarryError) -> Self {
        QuarryError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            details: None,
            backtrace: Arc::new(Backtrace::new_unresolved()),
        }
    }

    /// Attaches a details document to the error.
    pub fn with_details(mut self, details: Document) -> Self {
        self.details = Some(Box::new(details));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&QuarryError> {
        self.cause.as_deref()
    }

    pub fn details(&self) -> Option<&Document> {
        self.details.as_deref()
    }

    pub fn code(&self) -> i64 {
        self.error_kind.code()
    }

    /// Renders the error as a command reply: `{ok: 0, errmsg, code, codeName, details?}`.
    pub fn to_document(&self) -> Document {
        let mut reply = Document::new();
        reply.insert("ok", 0i64);
        reply.insert("errmsg", self.message.as_str());
        reply.insert("code", self.code());
        reply.insert("codeName", self.error_kind.code_name());
        if let Some(details) = &self.details {
            reply.insert("details", Value::Document(details.as_ref().clone()));
        }
        reply
    }

    /// Reconstructs an error from a failed command reply.
    ///
    /// Returns `None` when the reply reports success.
    pub fn from_reply(reply: &Document) -> Option<QuarryError> {
        let ok = reply.get("ok").and_then(|v| v.as_f64()).unwrap_or(0.0);
        if ok >= 1.0 {
            return None;
        }

        let message = reply
            .get("errmsg")
            .and_then(|v| v.as_str())
            .unwrap_or("command failed");
        let kind = reply
            .get("code")
            .and_then(|v| v.as_i64())
            .map(ErrorKind::from_code)
            .unwrap_or(ErrorKind::InternalError);

        let mut error = QuarryError::new(message, kind);
        if let Some(Value::Document(details)) = reply.get("details") {
            error = error.with_details(details.clone());
        }
        Some(error)
    }
}

impl Display for QuarryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for QuarryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{} ({})\nCaused by: {:?}", self.message, self.error_kind, cause),
            None => {
                let mut backtrace = self.backtrace.as_ref().clone();
                backtrace.resolve();
                write!(f, "{} ({})\n{:?}", self.message, self.error_kind, backtrace)
            }
        }
    }
}

impl Error for QuarryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for Quarry operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

impl serde::de::Error for QuarryError {
    fn custom<T: Display>(msg: T) -> Self {
        QuarryError::new(&msg.to_string(), ErrorKind::EncodingError)
    }
}

impl serde::ser::Error for QuarryError {
    fn custom<T: Display>(msg: T) -> Self {
        QuarryError::new(&msg.to_string(), ErrorKind::EncodingError)
    }
}

impl From<std::io::Error> for QuarryError {
    fn from(err: std::io::Error) -> Self {
        QuarryError::new(&format!("IO error: {}", err), ErrorKind::IOFailure)
    }
}

impl From<std::string::FromUtf8Error> for QuarryError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        QuarryError::new(
            &format!("UTF-8 encoding error: {}", err),
            ErrorKind::EncodingError,
        )
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        QuarryError::new(&format!("JSON error: {}", err), ErrorKind::EncodingError)
    }
}

impl From<serde_yaml::Error> for QuarryError {
    fn from(err: serde_yaml::Error) -> Self {
        QuarryError::new(&format!("YAML error: {}", err), ErrorKind::EncodingError)
    }
}

impl From<glob::PatternError> for QuarryError {
    fn from(err: glob::PatternError) -> Self {
        QuarryError::new(&format!("Glob pattern error: {}", err), ErrorKind::InvalidArgument)
    }
}

impl From<glob::GlobError> for QuarryError {
    fn from(err: glob::GlobError) -> Self {
        QuarryError::new(&format!("Glob error: {}", err), ErrorKind::IOFailure)
    }
}

impl From<regex::Error> for QuarryError {
    fn from(err: regex::Error) -> Self {
        QuarryError::new(&format!("Regex error: {}", err), ErrorKind::InvalidArgument)
    }
}

impl From<String> for QuarryError {
    fn from(msg: String) -> Self {
        QuarryError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for QuarryError {
    fn from(msg: &str) -> Self {
        QuarryError::new(msg, ErrorKind::InternalError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn quarry_error_new_creates_error() {
        let error = QuarryError::new("An error occurred", ErrorKind::IOFailure);
        assert_eq!(error.message(), "An error occurred");
        assert_eq!(error.kind(), &ErrorKind::IOFailure);
        assert!(error.cause().is_none());
        assert!(error.details().is_none());
    }

    #[test]
    fn quarry_error_with_cause_is_exposed_as_source() {
        let cause = QuarryError::new("disk gone", ErrorKind::IOFailure);
        let error = QuarryError::new_with_cause("read failed", ErrorKind::IOFailure, cause);
        assert!(error.source().is_some());
        assert_eq!(error.cause().map(|c| c.message()), Some("disk gone"));
        assert!(format!("{:?}", error).contains("Caused by:"));
    }

    #[test]
    fn every_kind_survives_a_code_round_trip() {
        let kinds = vec![
            ErrorKind::UnknownOperator,
            ErrorKind::DuplicateOperator,
            ErrorKind::RegistrySealed,
            ErrorKind::UnsupportedFormat,
            ErrorKind::NamespaceNotFound,
            ErrorKind::CollectionExists,
            ErrorKind::NoStoreForNamespace,
            ErrorKind::ValidationError,
            ErrorKind::DuplicateKey,
            ErrorKind::CommandNotFound,
            ErrorKind::CursorNotFound,
            ErrorKind::InvalidArgument,
            ErrorKind::InvalidOperation,
            ErrorKind::TransportError,
            ErrorKind::IOFailure,
            ErrorKind::EncodingError,
            ErrorKind::InternalError,
        ];
        for kind in kinds {
            assert_eq!(ErrorKind::from_code(kind.code()), kind);
        }
    }

    #[test]
    fn to_document_renders_failure_reply() {
        let error = QuarryError::new("ns not found", ErrorKind::NamespaceNotFound);
        let reply = error.to_document();
        assert_eq!(reply.get("ok"), Some(&Value::Int(0)));
        assert_eq!(reply.get("code"), Some(&Value::Int(26)));
        assert_eq!(reply.get("codeName"), Some(&Value::from("NamespaceNotFound")));
    }

    #[test]
    fn from_reply_restores_kind_and_details() {
        let error = QuarryError::new("bad doc", ErrorKind::ValidationError)
            .with_details(doc! { "rule": { "a": 1 } });
        let restored = QuarryError::from_reply(&error.to_document()).unwrap();
        assert_eq!(restored.kind(), &ErrorKind::ValidationError);
        assert_eq!(restored.message(), "bad doc");
        assert!(restored.details().unwrap().contains_key("rule"));
    }

    #[test]
    fn from_reply_ignores_success() {
        assert!(QuarryError::from_reply(&doc! { "ok": 1 }).is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: QuarryError = io_err.into();
        assert_eq!(err.kind(), &ErrorKind::IOFailure);
        assert!(err.message().contains("IO error"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: QuarryError = json_err.into();
        assert_eq!(err.kind(), &ErrorKind::EncodingError);
    }

    #[test]
    fn test_from_utf8_error() {
        let utf8_err = String::from_utf8(vec![0xFF, 0xFE]).unwrap_err();
        let err: QuarryError = utf8_err.into();
        assert_eq!(err.kind(), &ErrorKind::EncodingError);
    }

    #[test]
    fn test_question_mark_operator_with_from() {
        fn parse() -> QuarryResult<serde_json::Value> {
            Ok(serde_json::from_str("not json")?)
        }
        assert_eq!(parse().unwrap_err().kind(), &ErrorKind::EncodingError);
    }
}
