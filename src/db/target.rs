//! Typed handles for addressing one (database, collection) target.
use std::sync::Arc;

use super::TargetRegistry;
use crate::bulk::options::Operation;
use crate::common::TargetKey;
use crate::Result;

/// A handle to one target, returned by [`Aggregator::resolve`](crate::Aggregator::resolve).
///
/// Every write method buffers exactly one operation and returns once it is
/// buffered. The write is fire-and-forget: its backend outcome is reported
/// only through the aggregator's results and event listener, never through
/// the value returned here. An `Err` means the operation was rejected
/// before buffering (an invalid document or a poisoned lock).
#[derive(Clone)]
pub struct Target {
    registry: Arc<TargetRegistry>,
    key: TargetKey,
}

impl Target {
    pub(crate) fn new(registry: Arc<TargetRegistry>, collection: &str) -> Target {
        let key = registry.key(collection);
        Target { registry, key }
    }

    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    /// Buffers an arbitrary operation.
    pub fn append(&self, operation: Operation) -> Result<()> {
        self.registry.append(self.key.collection(), operation)
    }

    pub fn insert(&self, document: bson::Document) -> Result<()> {
        self.append(Operation::Insert { document })
    }

    /// Buffers one insert per document, in order.
    pub fn insert_many(&self, documents: Vec<bson::Document>) -> Result<()> {
        for document in documents {
            self.insert(document)?;
        }
        Ok(())
    }

    /// Updates the first document matching `filter`, or inserts one built
    /// from `filter` and `update` if none matches.
    pub fn upsert(&self, filter: bson::Document, update: bson::Document) -> Result<()> {
        self.append(Operation::Upsert { filter, update })
    }

    /// Updates the first document matching `filter`.
    pub fn update(&self, filter: bson::Document, update: bson::Document, upsert: bool) -> Result<()> {
        self.append(Operation::Update {
            filter,
            update,
            upsert,
            multi: false,
        })
    }

    /// Removes every document matching `filter`.
    pub fn remove(&self, filter: bson::Document) -> Result<()> {
        self.append(Operation::Remove { filter, multi: true })
    }

    /// Starts a find-and-modify operation selecting documents by `filter`.
    pub fn find(&self, filter: bson::Document) -> FindOperation {
        FindOperation {
            target: self,
            filter,
            upsert: false,
        }
    }

    /// Sends this target's pending operations now.
    pub fn flush(&self) -> Result<()> {
        self.registry.flush(self.key.collection())
    }

    /// Number of operations buffered for this target.
    pub fn pending_operations(&self) -> usize {
        self.registry.pending_for(self.key.collection())
    }
}

/// A selector produced by [`Target::find`]. Each terminal method buffers one
/// operation against the selected documents.
pub struct FindOperation<'a> {
    target: &'a Target,
    filter: bson::Document,
    upsert: bool,
}

impl<'a> FindOperation<'a> {
    /// Inserts a document if the following update or replacement matches nothing.
    pub fn upsert(mut self) -> FindOperation<'a> {
        self.upsert = true;
        self
    }

    /// Updates every matching document.
    pub fn update(self, update: bson::Document) -> Result<()> {
        self.target.append(Operation::Update {
            filter: self.filter,
            update,
            upsert: self.upsert,
            multi: true,
        })
    }

    pub fn update_one(self, update: bson::Document) -> Result<()> {
        self.target.append(Operation::Update {
            filter: self.filter,
            update,
            upsert: self.upsert,
            multi: false,
        })
    }

    pub fn replace_one(self, replacement: bson::Document) -> Result<()> {
        self.target.append(Operation::Replace {
            filter: self.filter,
            replacement,
            upsert: self.upsert,
        })
    }

    /// Removes every matching document.
    pub fn remove(self) -> Result<()> {
        self.target.append(Operation::Remove {
            filter: self.filter,
            multi: true,
        })
    }

    pub fn remove_one(self) -> Result<()> {
        self.target.append(Operation::Remove {
            filter: self.filter,
            multi: false,
        })
    }
}
