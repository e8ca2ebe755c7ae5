// src/error.rs

//! Error types for component version transfers
//!
//! All fallible operations in the crate return [`Result`]. Errors that occur
//! while walking a component graph are wrapped with the traversal history
//! (the chain of visited component versions) so a failure deep inside a
//! reference tree can be traced back to the top-level transfer.
//!
//! Policy refusals are deliberately not errors: a policy declining to update
//! or recurse answers `Ok(false)` / `Ok(None)`.

use std::fmt;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transfer subsystem and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Target holds the same version with diverging signature-relevant content
    /// and the policy refused to overwrite it
    #[error("component version {0} already exists with different signature-relevant content")]
    Conflict(String),

    /// A component, version, blob, or plugin could not be found
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// Descriptor merge failed (identity collision, incompatible label values)
    #[error("merge failed: {0}")]
    MergeError(String),

    /// One or more blob copies of a version failed
    #[error("{0}")]
    CopyFailed(ErrorList),

    /// Several independent failures (reference sub-transfers, option application)
    #[error("{0}")]
    Multiple(ErrorList),

    /// Error wrapped with the component version traversal history
    #[error("{history}: {message}: {source}")]
    Traversal {
        history: String,
        message: String,
        #[source]
        source: Box<Error>,
    },

    /// Backend failure while reading or writing component versions
    #[error("repository error: {0}")]
    RepositoryError(String),

    /// Blob access failure
    #[error("access error: {0}")]
    AccessError(String),

    /// Transfer policy failed to reach a decision
    #[error("transfer policy error: {0}")]
    PolicyError(String),

    /// Transfer script could not be parsed or evaluated
    #[error("transfer script error: {0}")]
    ScriptError(String),

    /// Plugin process failed or answered garbage
    #[error("plugin error: {0}")]
    PluginError(String),

    /// Transfer options could not be resolved to a handler
    #[error("transfer option error: {0}")]
    OptionError(String),

    /// Invalid configuration file or value
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Signature creation or verification failed
    #[error("signature error: {0}")]
    SignatureError(String),

    /// Descriptor violates a model invariant
    #[error("invalid component descriptor: {0}")]
    ValidationError(String),

    /// Blob content does not match its recorded digest
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Serialization / deserialization failure
    #[error("parse error: {0}")]
    ParseError(String),

    /// Filesystem or process I/O failure
    #[error("I/O error: {0}")]
    IoError(String),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Wrap this error with the traversal history and a context message
    pub fn within(self, history: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::Traversal {
            history: history.to_string(),
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Check whether this error (or the error it wraps) is a not-found error
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Traversal { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check whether this error (or any aggregated error) is a conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Traversal { source, .. } => source.is_conflict(),
            Error::Multiple(list) | Error::CopyFailed(list) => {
                list.errors().iter().any(Error::is_conflict)
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ParseError(e.to_string())
    }
}

/// An ordered collection of errors sharing a context message
///
/// Used wherever independent work items must all be attempted before
/// failure is reported: copy tasks of one version, reference sub-transfers,
/// option application.
#[derive(Debug, Default)]
pub struct ErrorList {
    context: String,
    errors: Vec<Error>,
}

impl ErrorList {
    /// Create an empty list with a context message
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            errors: Vec::new(),
        }
    }

    /// Record the error of a result, ignoring successes
    pub fn add<T>(&mut self, result: Result<T>) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    /// Record an error unconditionally
    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Number of recorded errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Check whether no error was recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Recorded errors in insertion order
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Context message of this list
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Convert into a result, `Ok` when empty
    ///
    /// A single recorded error is returned as-is instead of being wrapped.
    pub fn result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Multiple(self)),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.context)?;
        if self.errors.len() == 1 {
            return write!(f, "{}", self.errors[0]);
        }
        write!(f, "{{")?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{e}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_list_empty_is_ok() {
        let list = ErrorList::new("nothing");
        assert!(list.is_empty());
        assert!(list.result().is_ok());
    }

    #[test]
    fn test_error_list_single_is_unwrapped() {
        let mut list = ErrorList::new("copy");
        list.add::<()>(Err(Error::AccessError("boom".to_string())));
        list.add(Ok(()));
        let err = list.result().unwrap_err();
        assert!(matches!(err, Error::AccessError(_)));
    }

    #[test]
    fn test_error_list_multiple_display() {
        let mut list = ErrorList::new("references of a:v1");
        list.push(Error::not_found("component version", "b:v1"));
        list.push(Error::Conflict("c:v1".to_string()));
        let err = list.result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "references of a:v1: {component version b:v1 not found, component version c:v1 already exists with different signature-relevant content}"
        );
        assert!(err.is_conflict());
    }

    #[test]
    fn test_traversal_wrapping_keeps_kind() {
        let err = Error::not_found("component version", "b:v1").within("a:v1", "nested component");
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "a:v1: nested component: component version b:v1 not found"
        );
    }
}
