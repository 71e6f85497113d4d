//! Operations that can be buffered in a bulk builder.
use bson::{self, Bson};

use crate::error::Error::ArgumentError;
use crate::Result;

/// A single buffered write. Operations carry no identity beyond their
/// position in the builder they were appended to.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        document: bson::Document,
    },
    /// Updates the first matching document, inserting one seeded from the
    /// filter if nothing matches.
    Upsert {
        filter: bson::Document,
        update: bson::Document,
    },
    Update {
        filter: bson::Document,
        update: bson::Document,
        upsert: bool,
        multi: bool,
    },
    Replace {
        filter: bson::Document,
        replacement: bson::Document,
        upsert: bool,
    },
    Remove {
        filter: bson::Document,
        multi: bool,
    },
}

impl Operation {
    /// Name of the operation as it appears in logs and events.
    pub fn kind(&self) -> &'static str {
        match *self {
            Operation::Insert { .. } => "insert",
            Operation::Upsert { .. } => "upsert",
            Operation::Update { .. } => "update",
            Operation::Replace { .. } => "replace",
            Operation::Remove { .. } => "remove",
        }
    }

    /// Whether this operation was produced by a `find` selector.
    pub fn is_find(&self) -> bool {
        match *self {
            Operation::Insert { .. } => false,
            _ => true,
        }
    }

    /// Checks the operation's documents before it is buffered, so a malformed
    /// write is rejected to its caller instead of failing a whole batch later.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Operation::Insert { ref document } => validate_insert(document),
            Operation::Upsert { ref update, .. } | Operation::Update { ref update, .. } => {
                validate_update(update)
            }
            Operation::Replace { ref replacement, .. } => validate_replace(replacement),
            Operation::Remove { .. } => Ok(()),
        }
    }

    /// Encodes the operation as a bulk-write statement document.
    pub fn to_bson(&self) -> bson::Document {
        let mut doc = bson::Document::new();
        match *self {
            Operation::Insert { ref document } => {
                doc.insert("insertOne", Bson::Document(document.clone()));
            }
            Operation::Upsert { ref filter, ref update } => {
                doc.insert("q", Bson::Document(filter.clone()));
                doc.insert("u", Bson::Document(update.clone()));
                doc.insert("upsert", Bson::Boolean(true));
                doc.insert("multi", Bson::Boolean(false));
            }
            Operation::Update { ref filter, ref update, upsert, multi } => {
                doc.insert("q", Bson::Document(filter.clone()));
                doc.insert("u", Bson::Document(update.clone()));
                doc.insert("upsert", Bson::Boolean(upsert));
                doc.insert("multi", Bson::Boolean(multi));
            }
            Operation::Replace { ref filter, ref replacement, upsert } => {
                doc.insert("q", Bson::Document(filter.clone()));
                doc.insert("u", Bson::Document(replacement.clone()));
                doc.insert("upsert", Bson::Boolean(upsert));
                doc.insert("multi", Bson::Boolean(false));
            }
            Operation::Remove { ref filter, multi } => {
                doc.insert("q", Bson::Document(filter.clone()));
                doc.insert("limit", Bson::I32(if multi { 0 } else { 1 }));
            }
        }
        doc
    }
}

fn validate_insert(document: &bson::Document) -> Result<()> {
    for key in document.keys() {
        if key.starts_with('$') {
            return Err(ArgumentError(format!(
                "Inserted documents cannot contain top-level operator '{}'.",
                key
            )));
        }
    }
    Ok(())
}

fn validate_replace(replacement: &bson::Document) -> Result<()> {
    for key in replacement.keys() {
        if key.starts_with('$') {
            return Err(ArgumentError(String::from("Replacement cannot include $ operators.")));
        }
    }
    Ok(())
}

fn validate_update(update: &bson::Document) -> Result<()> {
    if update.is_empty() {
        return Err(ArgumentError(String::from("Update document must not be empty.")));
    }
    for key in update.keys() {
        if !key.starts_with('$') {
            return Err(ArgumentError(String::from("Update only works with $ operators.")));
        }
    }
    Ok(())
}
