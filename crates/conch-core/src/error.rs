//! VM error types

use crate::value::Value;
use thiserror::Error;

/// VM errors
///
/// `TypeError`/`RangeError` carry only a message and are raised where no
/// [`crate::Context`] is at hand. Errors raised through the context's throw
/// path become [`VmError::Exception`] holding a heap error object and a stack
/// snapshot.
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (e.g., defining on a non-extensible object)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Range error (e.g., invalid array length)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Internal error
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Thrown JS exception
    #[error("Uncaught exception: {0}")]
    Exception(Box<ThrownValue>),
}

/// The language-level class of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `TypeError`
    TypeError,
    /// `RangeError`
    RangeError,
    /// Any other thrown value
    Other,
}

/// A thrown JavaScript value
#[derive(Debug)]
pub struct ThrownValue {
    /// The thrown value
    pub value: Value,
    /// The thrown value (as a string representation)
    pub message: String,
    /// Error class of the thrown value
    pub kind: ErrorKind,
    /// Stack trace
    pub stack: Vec<StackFrame>,
}

impl std::fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A stack frame in error trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Function name
    pub function_name: String,
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Create an exception from a thrown JS value
    pub fn exception(value: Value, message: impl Into<String>, kind: ErrorKind, stack: Vec<StackFrame>) -> Self {
        Self::Exception(Box::new(ThrownValue {
            value,
            message: message.into(),
            kind,
            stack,
        }))
    }

    /// Error class, looking through thrown exceptions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TypeError(_) => ErrorKind::TypeError,
            Self::RangeError(_) => ErrorKind::RangeError,
            Self::InternalError(_) => ErrorKind::Other,
            Self::Exception(thrown) => thrown.kind,
        }
    }

    /// Whether this is a `TypeError`, raw or thrown
    pub fn is_type_error(&self) -> bool {
        self.kind() == ErrorKind::TypeError
    }

    /// Whether this is a `RangeError`, raw or thrown
    pub fn is_range_error(&self) -> bool {
        self.kind() == ErrorKind::RangeError
    }

    /// The thrown value, if this is an exception
    pub fn thrown_value(&self) -> Option<Value> {
        match self {
            Self::Exception(thrown) => Some(thrown.value),
            _ => None,
        }
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
