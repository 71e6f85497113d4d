//! Per-target accumulation of pending operations.
pub mod error;
pub mod options;
pub mod results;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use log::debug;

use self::options::Operation;
use self::results::ResultCounter;
use crate::apm::{FlushEvent, Listener};
use crate::backend::Connection;
use crate::common::TargetKey;
use crate::error::Error::OperationError;
use crate::Result;

/// The outcome of pushing an operation into a builder.
#[derive(Debug)]
pub(crate) enum Append {
    /// The operation was buffered; carries the builder's new pending count.
    Buffered(usize),
    /// The builder was already drained; the operation is handed back so the
    /// caller can buffer it in the builder that replaced this one.
    Sealed(Operation),
}

struct Pending {
    operations: Vec<Operation>,
    sealed: bool,
}

/// Accumulates the pending operations of exactly one target.
///
/// A builder is executed at most once. Execution seals it, so the flush
/// path replaces a drained builder with a fresh one instead of reusing it.
pub struct OperationBuilder {
    target: TargetKey,
    ordered: bool,
    pending: Mutex<Pending>,
    total_ops: AtomicUsize,
    find_count: AtomicUsize,
    insert_count: AtomicUsize,
    execute_count: AtomicUsize,
}

impl fmt::Debug for OperationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OperationBuilder")
            .field("target", &self.target)
            .field("ordered", &self.ordered)
            .field("total_ops", &self.total_ops())
            .finish()
    }
}

impl fmt::Display for OperationBuilder {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "\"BOFind\": {}, \"BOInsert\": {}, \"BOExecute\": {}",
            self.find_count.load(Ordering::SeqCst),
            self.insert_count.load(Ordering::SeqCst),
            self.execute_count.load(Ordering::SeqCst)
        )
    }
}

impl OperationBuilder {
    /// Creates an empty builder. `ordered` builders execute serially and stop
    /// at the first failed operation; unordered builders attempt everything.
    pub fn new(target: TargetKey, ordered: bool) -> OperationBuilder {
        OperationBuilder {
            target,
            ordered,
            pending: Mutex::new(Pending {
                operations: Vec::new(),
                sealed: false,
            }),
            total_ops: AtomicUsize::new(0),
            find_count: AtomicUsize::new(0),
            insert_count: AtomicUsize::new(0),
            execute_count: AtomicUsize::new(0),
        }
    }

    pub fn target(&self) -> &TargetKey {
        &self.target
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Number of operations ever appended to this builder.
    pub fn total_ops(&self) -> usize {
        self.total_ops.load(Ordering::SeqCst)
    }

    /// Number of operations waiting to be executed.
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .map(|pending| pending.operations.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this builder has been drained for execution.
    pub fn is_sealed(&self) -> bool {
        self.pending.lock().map(|pending| pending.sealed).unwrap_or(true)
    }

    /// Buffers an operation without performing any I/O, returning the number
    /// of pending operations.
    ///
    /// Fails only if the builder was already executed.
    pub fn append(&self, operation: Operation) -> Result<usize> {
        operation.validate()?;
        match self.push(operation)? {
            Append::Buffered(len) => Ok(len),
            Append::Sealed(_) => Err(OperationError(format!(
                "The builder for {} has already been executed.",
                self.target
            ))),
        }
    }

    pub(crate) fn push(&self, operation: Operation) -> Result<Append> {
        let mut pending = self.pending.lock()?;
        if pending.sealed {
            return Ok(Append::Sealed(operation));
        }

        if operation.is_find() {
            self.find_count.fetch_add(1, Ordering::SeqCst);
        } else {
            self.insert_count.fetch_add(1, Ordering::SeqCst);
        }
        self.total_ops.fetch_add(1, Ordering::SeqCst);

        pending.operations.push(operation);
        Ok(Append::Buffered(pending.operations.len()))
    }

    // Seals the builder and takes everything buffered so far.
    fn drain(&self) -> Result<Vec<Operation>> {
        let mut pending = self.pending.lock()?;
        pending.sealed = true;
        Ok(pending.operations.drain(..).collect())
    }

    /// Sends every pending operation as one bulk request and returns the
    /// normalized outcome. Executing an empty builder sends nothing and
    /// returns a zero counter.
    ///
    /// A transport failure returns `BackendUnavailable`; the drained
    /// operations are not requeued.
    pub fn execute(&self, connection: &Connection, listener: &Listener) -> Result<ResultCounter> {
        Ok(self.execute_batch(connection, listener)?.unwrap_or_default())
    }

    /// Like `execute`, but distinguishes an empty builder (`None`) from a
    /// request whose tallies happen to be zero.
    pub(crate) fn execute_batch(
        &self,
        connection: &Connection,
        listener: &Listener,
    ) -> Result<Option<ResultCounter>> {
        let operations = self.drain()?;
        if operations.is_empty() {
            debug!("Skipping empty bulk request for {}", self.target);
            return Ok(None);
        }

        self.execute_count.fetch_add(1, Ordering::SeqCst);
        listener.emit(FlushEvent::FlushStarted {
            target: self.target.clone(),
            operations: operations.len(),
            at: Utc::now(),
        });

        let start = Instant::now();
        let result = match connection.execute_bulk(&self.target, &operations, self.ordered) {
            Ok(result) => result,
            Err(err) => {
                listener.emit(FlushEvent::BackendError {
                    target: self.target.clone(),
                    operations_lost: operations.len(),
                    message: err.to_string(),
                    at: Utc::now(),
                });
                return Err(err);
            }
        };

        let counter = ResultCounter::from(&result);

        if result.is_partial_failure() {
            listener.emit(FlushEvent::WriteErrors {
                target: self.target.clone(),
                write_errors: result.write_errors,
                write_concern_errors: result.write_concern_errors,
                at: Utc::now(),
            });
        }

        listener.emit(FlushEvent::FlushSucceeded {
            target: self.target.clone(),
            counter,
            duration: start.elapsed(),
            at: Utc::now(),
        });

        Ok(Some(counter))
    }
}
