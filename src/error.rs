//! Error type for the aggregator and its storage backends.
use std::{io, sync};

use thiserror::Error;

/// A type for results generated by aggregator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for aggregator operations.
///
/// Partial write failures are not represented here: they are carried by a
/// [`BulkWriteResult`](crate::bulk::results::BulkWriteResult) and reported
/// through the event listener.
#[derive(Error, Debug)]
pub enum Error {
    /// The backend could not be reached, or a bulk request did not complete
    /// within the configured timeout. The batch that was being sent is lost.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    /// A configuration value, connection string, or operation document was invalid.
    #[error("Argument error: {0}")]
    ArgumentError(String),
    /// A raw bulk-write reply could not be interpreted.
    #[error("Response error: {0}")]
    ResponseError(String),
    /// Any other failure while executing an operation.
    #[error("Operation error: {0}")]
    OperationError(String),
    /// A lock guarding shared state was poisoned by a panicking thread.
    #[error("Lock poisoned")]
    LockError,
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl<'a> From<&'a str> for Error {
    fn from(s: &str) -> Error {
        Error::OperationError(s.to_owned())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::OperationError(s)
    }
}

impl<T> From<sync::PoisonError<T>> for Error {
    fn from(_: sync::PoisonError<T>) -> Error {
        Error::LockError
    }
}

impl Error {
    /// Whether this error means the backend never applied the batch.
    pub fn is_backend_unavailable(&self) -> bool {
        match *self {
            Error::BackendUnavailable(_) => true,
            _ => false,
        }
    }
}
