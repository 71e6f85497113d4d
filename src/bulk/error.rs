//! Per-operation failure details reported by a bulk write.
//!
//! These are not errors of the aggregator itself: a bulk request that
//! produced write errors still counts every operation that succeeded.
use std::fmt;

use bson::{self, Bson};

use super::options::Operation;
use crate::error::Error::ResponseError;
use crate::Result;

/// The error struct for a single bulk-write step, indicating the request
/// and its index in the bulk-write request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteError {
    pub index: i32,
    pub code: i32,
    pub message: String,
    pub request: Option<Operation>,
}

/// The error struct for a write-concern related error.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcernError {
    pub code: i32,
    pub message: String,
    pub details: Option<bson::Document>,
}

impl fmt::Display for BulkWriteError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "BulkWriteError at index {} (code {}): {}",
            self.index, self.code, self.message
        )?;

        match self.request {
            Some(ref request) => write!(fmt, " Failed to execute {} request.", request.kind()),
            None => Ok(()),
        }
    }
}

impl fmt::Display for WriteConcernError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "WriteConcernError (code {}): {}", self.code, self.message)
    }
}

// Servers have replied with both 32- and 64-bit integers for these fields.
fn get_int(doc: &bson::Document, key: &str) -> Option<i32> {
    match doc.get(key) {
        Some(&Bson::I32(v)) => Some(v),
        Some(&Bson::I64(v)) => Some(v as i32),
        Some(&Bson::FloatingPoint(v)) => Some(v as i32),
        _ => None,
    }
}

impl BulkWriteError {
    /// Returns a new BulkWriteError containing the provided error information.
    pub fn new<T: ToString>(
        index: i32,
        code: i32,
        message: T,
        request: Option<Operation>,
    ) -> BulkWriteError {
        BulkWriteError {
            index,
            code,
            message: message.to_string(),
            request,
        }
    }

    /// Parses a Bson document into a BulkWriteError.
    pub fn parse(error: &bson::Document) -> Result<BulkWriteError> {
        match (get_int(error, "index"), get_int(error, "code"), error.get("errmsg")) {
            (Some(index), Some(code), Some(&Bson::String(ref message))) => {
                Ok(BulkWriteError::new(index, code, message, None))
            }
            _ => Err(ResponseError(format!(
                "WriteError document is invalid: {:?}",
                error
            ))),
        }
    }
}

impl WriteConcernError {
    /// Returns a new WriteConcernError containing the provided error information.
    pub fn new<T: ToString>(code: i32, message: T) -> WriteConcernError {
        WriteConcernError {
            code,
            message: message.to_string(),
            details: None,
        }
    }

    /// Parses a Bson document into a WriteConcernError.
    pub fn parse(error: &bson::Document) -> Result<WriteConcernError> {
        match (get_int(error, "code"), error.get("errmsg")) {
            (Some(code), Some(&Bson::String(ref message))) => {
                let mut wc_err = WriteConcernError::new(code, message);
                if let Some(&Bson::Document(ref details)) = error.get("errInfo") {
                    wc_err.details = Some(details.clone());
                }
                Ok(wc_err)
            }
            _ => Err(ResponseError(format!(
                "WriteConcernError document is invalid: {:?}",
                error
            ))),
        }
    }
}
