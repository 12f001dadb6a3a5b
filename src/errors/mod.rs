//! Error taxonomy.
//!
//! Every error flowing through the broker can be asked three questions:
//! what is its `code`, what `kind` of failure is it, and is it worth
//! retrying. The answers drive the processor and retry stages: a retryable
//! handler error is handed to the backoff loop, anything else is logged and
//! the message is treated as consumed.
//!
//! Answers are found by walking the error tree: the error itself, then its
//! causes (for [`CustomError`]) or its `source()` chain (for anything else).
//! The first non-unknown kind/code wins; retryability is true if any link is
//! retryable.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::pubsub::PubSubError;
use crate::router::{AddHandlerError, RouterError};

/// Boxed error returned by handlers and middleware.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Code reported when no code was attached anywhere in the error tree.
pub const CODE_UNKNOWN: &str = "UNKNOWN";

/// Semantic classification of a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No kind was attached.
    #[default]
    Unknown,
    /// Request conflicts with the current state of the system.
    Conflict,
    /// Internal failure: IO, invalid memory state, panics.
    Internal,
    /// Invalid input values.
    InvalidInput,
    /// A required resource does not exist.
    NotFound,
    /// Caller is not authenticated.
    Unauthenticated,
    /// Caller is not allowed.
    Unauthorized,
    /// Some quota or resource is exhausted.
    ResourceExhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unknown => "UNKNOWN",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that carry their own taxonomy.
pub trait Classify {
    fn code(&self) -> &str;
    fn kind(&self) -> ErrorKind;
    fn is_retryable(&self) -> bool;
}

/// General-purpose classified error.
///
/// Built fluently; every builder returns a modified copy:
///
/// ```ignore
/// let err = CustomError::new("inventory service unavailable")
///     .with_kind(ErrorKind::Internal)
///     .with_code("INVENTORY_UNAVAILABLE")
///     .with_cause(io_err)
///     .retryable();
/// ```
#[derive(Debug, Clone)]
pub struct CustomError {
    message: Cow<'static, str>,
    kind: ErrorKind,
    code: Cow<'static, str>,
    retryable: bool,
    causes: Vec<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl CustomError {
    /// Unknown kind, unknown code, not retryable.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Unknown,
            code: Cow::Borrowed(CODE_UNKNOWN),
            retryable: false,
            causes: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_code(mut self, code: impl Into<Cow<'static, str>>) -> Self {
        self.code = code.into();
        self
    }

    /// Attach a cause as the last link of this error.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        self.causes.push(Arc::from(cause.into()));
        self
    }

    /// Mark this error as worth retrying.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn causes(&self) -> impl Iterator<Item = &(dyn StdError + Send + Sync + 'static)> {
        self.causes.iter().map(|c| c.as_ref())
    }
}

impl fmt::Display for CustomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for CustomError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.causes
            .first()
            .map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

impl Classify for CustomError {
    fn code(&self) -> &str {
        &self.code
    }

    fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Missing constructor dependency.
pub fn missing_required_dependency(name: &str) -> CustomError {
    CustomError::new(format!("Missing required dependency: {name}"))
        .with_kind(ErrorKind::InvalidInput)
        .with_code("MISSING_REQUIRED_DEPENDENCY")
}

pub fn validation(description: impl Into<Cow<'static, str>>) -> CustomError {
    CustomError::new(description)
        .with_kind(ErrorKind::InvalidInput)
        .with_code("VALIDATION_ERROR")
}

pub fn not_found() -> CustomError {
    CustomError::new("resource not found")
        .with_kind(ErrorKind::NotFound)
        .with_code("RESOURCE_NOT_FOUND")
}

/// Taxonomy of a single link, if the link's type is one we know.
fn classified<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a dyn Classify> {
    if let Some(e) = err.downcast_ref::<CustomError>() {
        return Some(e);
    }
    if let Some(e) = err.downcast_ref::<crate::cqrs::BrokerError>() {
        return Some(e);
    }
    if let Some(e) = err.downcast_ref::<PubSubError>() {
        return Some(e);
    }
    if let Some(e) = err.downcast_ref::<AddHandlerError>() {
        return Some(e);
    }
    if let Some(e) = err.downcast_ref::<RouterError>() {
        return Some(e);
    }
    None
}

/// Direct children of a link: every cause of a [`CustomError`], otherwise
/// the `source()` of the link.
fn children<'a>(err: &'a (dyn StdError + 'static)) -> Vec<&'a (dyn StdError + 'static)> {
    match err.downcast_ref::<CustomError>() {
        Some(ce) => ce
            .causes
            .iter()
            .map(|c| c.as_ref() as &(dyn StdError + 'static))
            .collect(),
        None => err.source().into_iter().collect(),
    }
}

/// First non-unknown kind in the error tree.
pub fn kind(err: &(dyn StdError + 'static)) -> ErrorKind {
    if let Some(c) = classified(err) {
        if c.kind() != ErrorKind::Unknown {
            return c.kind();
        }
    }
    children(err)
        .into_iter()
        .map(kind)
        .find(|k| *k != ErrorKind::Unknown)
        .unwrap_or_default()
}

/// First non-unknown code in the error tree.
pub fn code(err: &(dyn StdError + 'static)) -> String {
    if let Some(c) = classified(err) {
        if c.code() != CODE_UNKNOWN {
            return c.code().to_string();
        }
    }
    children(err)
        .into_iter()
        .map(code)
        .find(|c| c != CODE_UNKNOWN)
        .unwrap_or_else(|| CODE_UNKNOWN.to_string())
}

/// Whether any link of the error tree is retryable.
pub fn is_retryable(err: &(dyn StdError + 'static)) -> bool {
    if classified(err).is_some_and(|c| c.is_retryable()) {
        return true;
    }
    children(err).into_iter().any(is_retryable)
}
