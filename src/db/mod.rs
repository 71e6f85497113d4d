//! Per-database routing of operations to their builders.
pub mod target;

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, error};

use crate::apm::{FlushEvent, Listener};
use crate::backend::Connection;
use crate::bulk::options::Operation;
use crate::bulk::results::ResultCounter;
use crate::bulk::{Append, OperationBuilder};
use crate::common::{self, TargetKey};
use crate::error::Error;
use crate::store::ResultStore;
use crate::Result;

pub use self::target::{FindOperation, Target};

/// State shared by every flush path: the lazily connected backend, the
/// result store, and the event listener.
pub(crate) struct FlushContext {
    pub connection: Connection,
    pub results: ResultStore,
    pub listener: Listener,
    pub max_ops_per_target: usize,
    pub ordered: bool,
}

impl FlushContext {
    /// Executes one drained builder and merges its outcome.
    ///
    /// Backend failures are reported to the listener and tallied as
    /// `backend_errors`. Other failures are logged. Neither propagates, so
    /// one failing target cannot abort the flush of another. Only a
    /// poisoned result store is an error.
    pub fn flush(&self, builder: &OperationBuilder) -> Result<()> {
        match builder.execute_batch(&self.connection, &self.listener) {
            Ok(Some(counter)) => self.results.merge(builder.target(), counter),
            Ok(None) => Ok(()),
            Err(Error::BackendUnavailable(_)) => {
                self.results.merge(builder.target(), ResultCounter::backend_error())
            }
            Err(err) => {
                error!("Failed to flush {}: {}", builder.target(), err);
                Ok(())
            }
        }
    }
}

/// Maps the collections of one database to their operation builders.
///
/// Holds at most one live builder per collection. The map lock covers each
/// lookup-or-create, each replacement and each drain; appends to a builder
/// happen outside of it.
pub struct TargetRegistry {
    name: String,
    context: Arc<FlushContext>,
    builders: Mutex<HashMap<String, Arc<OperationBuilder>>>,
}

impl TargetRegistry {
    pub(crate) fn new(name: &str, context: Arc<FlushContext>) -> TargetRegistry {
        TargetRegistry {
            name: name.to_owned(),
            context,
            builders: Mutex::new(HashMap::new()),
        }
    }

    /// The database this registry routes for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self, collection: &str) -> TargetKey {
        TargetKey::new(self.name.as_str(), collection)
    }

    /// Returns the live builder for `collection`, creating an empty one on
    /// first access.
    pub fn resolve(&self, collection: &str) -> Result<Arc<OperationBuilder>> {
        let mut builders = self.builders.lock()?;
        if let Some(builder) = builders.get(collection) {
            return Ok(builder.clone());
        }

        common::validate_name("collection", collection)?;
        let builder = Arc::new(OperationBuilder::new(self.key(collection), self.context.ordered));
        builders.insert(collection.to_owned(), builder.clone());
        Ok(builder)
    }

    /// Buffers `operation` for `collection`.
    ///
    /// If this append brings the builder to the per-target limit, the
    /// builder is replaced and executed on the calling thread before this
    /// returns. Backend failures during that flush are not returned here.
    pub fn append(&self, collection: &str, operation: Operation) -> Result<()> {
        operation.validate()?;

        let mut operation = operation;
        loop {
            let builder = self.resolve(collection)?;
            match builder.push(operation)? {
                Append::Buffered(len) => {
                    if len >= self.context.max_ops_per_target && self.detach(collection, &builder)? {
                        self.context.listener.emit(FlushEvent::ThresholdTriggered {
                            target: builder.target().clone(),
                            operations: len,
                            limit: self.context.max_ops_per_target,
                            at: Utc::now(),
                        });
                        self.context.flush(&builder)?;
                    }
                    return Ok(());
                }
                // Lost a race with a flush; the fresh builder takes it.
                Append::Sealed(returned) => operation = returned,
            }
        }
    }

    // Swaps a fresh builder in for `builder` if it is still the live one.
    // Exactly one caller wins the swap and becomes responsible for executing it.
    fn detach(&self, collection: &str, builder: &Arc<OperationBuilder>) -> Result<bool> {
        let mut builders = self.builders.lock()?;
        match builders.get(collection) {
            Some(current) if Arc::ptr_eq(current, builder) => {
                let fresh = Arc::new(OperationBuilder::new(self.key(collection), self.context.ordered));
                builders.insert(collection.to_owned(), fresh);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Flushes the pending operations of one collection now.
    pub fn flush(&self, collection: &str) -> Result<()> {
        let builder = self.builders.lock()?.remove(collection);
        match builder {
            Some(builder) => self.context.flush(&builder),
            None => Ok(()),
        }
    }

    /// Removes every builder from the registry and returns them. Builders
    /// created afterwards by concurrent appends stay for the next flush.
    pub fn drain_all(&self) -> Result<HashMap<String, Arc<OperationBuilder>>> {
        let mut builders = self.builders.lock()?;
        let drained = mem::replace(&mut *builders, HashMap::new());
        debug!("Drained {} builders from database {}", drained.len(), self.name);
        Ok(drained)
    }

    /// Drains and executes every builder of this database.
    pub fn flush_all(&self) -> Result<()> {
        let mut first_err = None;
        for (_, builder) in self.drain_all()? {
            if let Err(err) = self.context.flush(&builder) {
                error!("Failed to record results for {}: {}", builder.target(), err);
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of operations buffered across every collection of this database.
    pub fn pending_operations(&self) -> usize {
        match self.builders.lock() {
            Ok(builders) => builders.values().map(|builder| builder.len()).sum(),
            Err(_) => 0,
        }
    }

    /// Number of operations buffered for one collection.
    pub fn pending_for(&self, collection: &str) -> usize {
        match self.builders.lock() {
            Ok(builders) => builders.get(collection).map(|builder| builder.len()).unwrap_or(0),
            Err(_) => 0,
        }
    }
}
