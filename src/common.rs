//! Types shared across the aggregator.
use std::fmt;

use serde_derive::{Deserialize, Serialize};

use crate::error::Error::ArgumentError;
use crate::Result;

/// The (database, collection) address that operations are routed to.
///
/// Targets identify both the builder an operation is buffered in and the
/// counter its outcome is tallied under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    database: String,
    collection: String,
}

impl TargetKey {
    pub fn new<D: Into<String>, C: Into<String>>(database: D, collection: C) -> TargetKey {
        TargetKey {
            database: database.into(),
            collection: collection.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.database, self.collection)
    }
}

/// Validates a database or collection name before it is used to create a builder.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ArgumentError(format!("The empty string is not a valid {} name.", kind)));
    }

    if name.contains('\0') || name.contains('$') {
        return Err(ArgumentError(format!(
            "{} name '{}' must not contain '$' or null characters.",
            kind, name
        )));
    }

    Ok(())
}
