//! An in-process document store implementing bulk-write semantics.
//!
//! Supports equality selectors and the `$set`, `$unset`, `$inc` and
//! `$setOnInsert` update operators. Availability and latency can be
//! controlled to exercise the aggregator's failure paths.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bson::{self, oid, Bson};

use super::{Connector, StorageBackend};
use crate::bulk::error::{BulkWriteError, WriteConcernError};
use crate::bulk::options::Operation;
use crate::bulk::results::BulkWriteResult;
use crate::common::TargetKey;
use crate::connstring::{ConnectionSettings, DEFAULT_SOCKET_TIMEOUT_MS};
use crate::error::Error::BackendUnavailable;
use crate::Result;

pub const DUPLICATE_KEY: i32 = 11000;
pub const BAD_VALUE: i32 = 2;
pub const FAILED_TO_PARSE: i32 = 9;
pub const IMMUTABLE_FIELD: i32 = 66;

/// A bulk request as it was received by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRequest {
    pub target: TargetKey,
    pub operations: usize,
    pub ordered: bool,
}

/// Shared in-memory store. Clones of the `Arc` returned by [`MemoryBackend::new`]
/// observe the same documents.
pub struct MemoryBackend {
    collections: Mutex<HashMap<TargetKey, Vec<bson::Document>>>,
    requests: Mutex<Vec<BulkRequest>>,
    pending_wc_errors: Mutex<Vec<WriteConcernError>>,
    available: AtomicBool,
    latency: Mutex<Duration>,
    timeout: Mutex<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend {
            collections: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            pending_wc_errors: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            latency: Mutex::new(Duration::from_millis(0)),
            timeout: Mutex::new(Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS)),
        })
    }

    /// When unavailable, every bulk request fails with `BackendUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delays every bulk request. A latency above the socket timeout makes
    /// requests time out, and one above the connect timeout fails connects.
    pub fn set_latency(&self, latency: Duration) -> Result<()> {
        *self.latency.lock()? = latency;
        Ok(())
    }

    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        *self.timeout.lock()? = timeout;
        Ok(())
    }

    /// Attaches a write concern error to the result of the next bulk request.
    pub fn inject_write_concern_error(&self, error: WriteConcernError) -> Result<()> {
        self.pending_wc_errors.lock()?.push(error);
        Ok(())
    }

    /// Snapshot of the documents stored for `target`, in insertion order.
    pub fn documents(&self, target: &TargetKey) -> Result<Vec<bson::Document>> {
        let collections = self.collections.lock()?;
        Ok(collections.get(target).cloned().unwrap_or_default())
    }

    pub fn count(&self, target: &TargetKey) -> Result<usize> {
        let collections = self.collections.lock()?;
        Ok(collections.get(target).map(Vec::len).unwrap_or(0))
    }

    /// Every bulk request received so far, including failed ones.
    pub fn requests(&self) -> Result<Vec<BulkRequest>> {
        Ok(self.requests.lock()?.clone())
    }

    pub fn drop_target(&self, target: &TargetKey) -> Result<()> {
        self.collections.lock()?.remove(target);
        Ok(())
    }

    // Fails the connect when the simulated latency exceeds `connect_timeout`.
    fn handshake(&self, connect_timeout: Duration) -> Result<()> {
        if *self.latency.lock()? > connect_timeout {
            thread::sleep(connect_timeout);
            return Err(BackendUnavailable(format!(
                "connect timed out after {} ms",
                connect_timeout.as_millis()
            )));
        }
        Ok(())
    }

    // Simulates the network round trip, failing once the timeout elapses.
    fn round_trip(&self) -> Result<()> {
        let latency = *self.latency.lock()?;
        let timeout = *self.timeout.lock()?;

        if latency > timeout {
            thread::sleep(timeout);
            return Err(BackendUnavailable(format!(
                "bulk request timed out after {} ms",
                timeout.as_millis()
            )));
        }

        if latency > Duration::from_millis(0) {
            thread::sleep(latency);
        }

        Ok(())
    }
}

impl StorageBackend for MemoryBackend {
    fn execute_bulk(
        &self,
        target: &TargetKey,
        operations: &[Operation],
        ordered: bool,
    ) -> Result<BulkWriteResult> {
        self.requests.lock()?.push(BulkRequest {
            target: target.clone(),
            operations: operations.len(),
            ordered,
        });

        if !self.available.load(Ordering::SeqCst) {
            return Err(BackendUnavailable(format!("no reachable server for {}", target)));
        }

        self.round_trip()?;

        let mut result = BulkWriteResult::new();
        {
            let mut collections = self.collections.lock()?;
            let docs = collections.entry(target.clone()).or_insert_with(Vec::new);

            for (index, operation) in operations.iter().enumerate() {
                if let Err((code, message)) = apply(docs, index as i32, operation, &mut result) {
                    let error = BulkWriteError::new(
                        index as i32,
                        code,
                        message,
                        Some(operation.clone()),
                    );
                    result.write_errors.push(error);

                    if ordered {
                        break;
                    }
                }
            }
        }

        result
            .write_concern_errors
            .extend(self.pending_wc_errors.lock()?.drain(..));

        Ok(result)
    }
}

type WriteFailure = (i32, String);

fn apply(
    docs: &mut Vec<bson::Document>,
    index: i32,
    operation: &Operation,
    result: &mut BulkWriteResult,
) -> std::result::Result<(), WriteFailure> {
    match *operation {
        Operation::Insert { ref document } => {
            insert(docs, document.clone())?;
            result.inserted_count += 1;
            Ok(())
        }
        Operation::Upsert { ref filter, ref update } => {
            update_matching(docs, index, filter, update, true, false, result)
        }
        Operation::Update { ref filter, ref update, upsert, multi } => {
            update_matching(docs, index, filter, update, upsert, multi, result)
        }
        Operation::Replace { ref filter, ref replacement, upsert } => {
            replace_matching(docs, index, filter, replacement, upsert, result)
        }
        Operation::Remove { ref filter, multi } => {
            let indexes = find_matching(docs, filter, multi)?;
            for &i in indexes.iter().rev() {
                docs.remove(i);
            }
            result.removed_count += indexes.len() as i64;
            Ok(())
        }
    }
}

fn new_id() -> std::result::Result<Bson, WriteFailure> {
    oid::ObjectId::new()
        .map(Bson::ObjectId)
        .map_err(|err| (BAD_VALUE, format!("failed to generate _id: {}", err)))
}

fn insert(
    docs: &mut Vec<bson::Document>,
    mut document: bson::Document,
) -> std::result::Result<Bson, WriteFailure> {
    let id = match document.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = new_id()?;
            document.insert("_id", id.clone());
            id
        }
    };

    if docs.iter().any(|doc| doc.get("_id") == Some(&id)) {
        return Err((
            DUPLICATE_KEY,
            format!("E11000 duplicate key error index: _id_ dup key: {{ : {} }}", id),
        ));
    }

    docs.push(document);
    Ok(id)
}

fn find_matching(
    docs: &[bson::Document],
    filter: &bson::Document,
    multi: bool,
) -> std::result::Result<Vec<usize>, WriteFailure> {
    if let Some(key) = filter.keys().find(|key| key.starts_with('$')) {
        return Err((BAD_VALUE, format!("unknown top level operator: {}", key)));
    }

    let mut matched = docs
        .iter()
        .enumerate()
        .filter(|&(_, doc)| filter.iter().all(|(key, value)| doc.get(key) == Some(value)))
        .map(|(i, _)| i);

    if multi {
        Ok(matched.collect())
    } else {
        Ok(matched.next().into_iter().collect())
    }
}

// The document an upsert starts from: the equality fields of its selector.
fn upsert_seed(filter: &bson::Document) -> bson::Document {
    let mut seed = bson::Document::new();
    for (key, value) in filter.iter() {
        if !key.starts_with('$') {
            seed.insert(key.clone(), value.clone());
        }
    }
    seed
}

fn update_matching(
    docs: &mut Vec<bson::Document>,
    index: i32,
    filter: &bson::Document,
    update: &bson::Document,
    upsert: bool,
    multi: bool,
    result: &mut BulkWriteResult,
) -> std::result::Result<(), WriteFailure> {
    let indexes = find_matching(docs, filter, multi)?;

    if indexes.is_empty() {
        if upsert {
            let mut seed = upsert_seed(filter);
            apply_update(&mut seed, update, true)?;
            let id = insert(docs, seed)?;
            result.upserted_count += 1;
            result.upserted_ids.push((index, id));
        }
        return Ok(());
    }

    for i in indexes {
        let mut doc = docs[i].clone();
        let changed = apply_update(&mut doc, update, false)?;
        result.matched_count += 1;
        if changed {
            docs[i] = doc;
            result.modified_count += 1;
        }
    }

    Ok(())
}

fn replace_matching(
    docs: &mut Vec<bson::Document>,
    index: i32,
    filter: &bson::Document,
    replacement: &bson::Document,
    upsert: bool,
    result: &mut BulkWriteResult,
) -> std::result::Result<(), WriteFailure> {
    let indexes = find_matching(docs, filter, false)?;

    match indexes.first() {
        Some(&i) => {
            let mut doc = replacement.clone();
            match (docs[i].get("_id"), replacement.get("_id")) {
                (Some(old), Some(new)) if old != new => {
                    return Err((
                        IMMUTABLE_FIELD,
                        "the (immutable) field '_id' was found to have been altered".to_owned(),
                    ))
                }
                (Some(old), None) => {
                    doc.insert("_id", old.clone());
                }
                _ => {}
            }

            result.matched_count += 1;
            if docs[i] != doc {
                docs[i] = doc;
                result.modified_count += 1;
            }
            Ok(())
        }
        None if upsert => {
            let mut doc = upsert_seed(filter);
            for (key, value) in replacement.iter() {
                doc.insert(key.clone(), value.clone());
            }
            let id = insert(docs, doc)?;
            result.upserted_count += 1;
            result.upserted_ids.push((index, id));
            Ok(())
        }
        None => Ok(()),
    }
}

// Applies update operators to `doc`, returning whether it changed.
fn apply_update(
    doc: &mut bson::Document,
    update: &bson::Document,
    inserting: bool,
) -> std::result::Result<bool, WriteFailure> {
    let mut changed = false;

    for (op, modifier) in update.iter() {
        let fields = match *modifier {
            Bson::Document(ref fields) => fields,
            _ => {
                return Err((
                    FAILED_TO_PARSE,
                    format!("Modifiers operate on fields but we found another type instead: {}", op),
                ))
            }
        };

        match op.as_str() {
            "$set" => {
                for (key, value) in fields.iter() {
                    check_id(doc, key, Some(value), inserting)?;
                    if doc.get(key) != Some(value) {
                        doc.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (key, value) in fields.iter() {
                        doc.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
            }
            "$unset" => {
                for key in fields.keys() {
                    check_id(doc, key, None, inserting)?;
                    if doc.remove(key).is_some() {
                        changed = true;
                    }
                }
            }
            "$inc" => {
                for (key, value) in fields.iter() {
                    check_id(doc, key, None, inserting)?;
                    let sum = increment(doc.get(key), value, key)?;
                    if doc.get(key) != Some(&sum) {
                        doc.insert(key.clone(), sum);
                        changed = true;
                    }
                }
            }
            other => return Err((FAILED_TO_PARSE, format!("Unknown modifier: {}", other))),
        }
    }

    Ok(changed)
}

fn check_id(
    doc: &bson::Document,
    key: &str,
    value: Option<&Bson>,
    inserting: bool,
) -> std::result::Result<(), WriteFailure> {
    if key != "_id" || inserting {
        return Ok(());
    }

    match (doc.get("_id"), value) {
        (Some(old), Some(new)) if old == new => Ok(()),
        _ => Err((
            IMMUTABLE_FIELD,
            "Performing an update on the path '_id' would modify the immutable field '_id'"
                .to_owned(),
        )),
    }
}

fn increment(
    current: Option<&Bson>,
    by: &Bson,
    key: &str,
) -> std::result::Result<Bson, WriteFailure> {
    let overflow = || {
        (
            BAD_VALUE,
            format!("Failed to apply $inc to '{}': integer overflow", key),
        )
    };

    match (current, by) {
        (None, &Bson::I32(_)) | (None, &Bson::I64(_)) | (None, &Bson::FloatingPoint(_)) => {
            Ok(by.clone())
        }
        (Some(&Bson::I32(a)), &Bson::I32(b)) => Ok(a
            .checked_add(b)
            .map(Bson::I32)
            .unwrap_or_else(|| Bson::I64(i64::from(a) + i64::from(b)))),
        (Some(&Bson::I32(a)), &Bson::I64(b)) => {
            i64::from(a).checked_add(b).map(Bson::I64).ok_or_else(overflow)
        }
        (Some(&Bson::I64(a)), &Bson::I32(b)) => {
            a.checked_add(i64::from(b)).map(Bson::I64).ok_or_else(overflow)
        }
        (Some(&Bson::I64(a)), &Bson::I64(b)) => a.checked_add(b).map(Bson::I64).ok_or_else(overflow),
        (current, by) => match (current.and_then(as_f64), as_f64(by)) {
            (Some(a), Some(b)) => Ok(Bson::FloatingPoint(a + b)),
            _ => Err((
                BAD_VALUE,
                format!("Cannot apply $inc to a value of non-numeric type for '{}'", key),
            )),
        },
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match *value {
        Bson::I32(v) => Some(f64::from(v)),
        Bson::I64(v) => Some(v as f64),
        Bson::FloatingPoint(v) => Some(v),
        _ => None,
    }
}

/// Hands out one shared [`MemoryBackend`] and counts how often it was asked to.
pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
    connections: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn new(backend: Arc<MemoryBackend>) -> MemoryConnector {
        MemoryConnector {
            backend,
            connections: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Counter of successful connects, shared with clones taken before the
    /// connector is handed to an aggregator.
    pub fn connections(&self) -> Arc<AtomicUsize> {
        self.connections.clone()
    }

    /// Switch that makes `connect` fail while set.
    pub fn refuse_switch(&self) -> Arc<AtomicBool> {
        self.refuse.clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn StorageBackend>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(BackendUnavailable(format!(
                "connection refused by {:?}",
                settings.hosts
            )));
        }

        self.backend.handshake(settings.connect_timeout)?;
        self.backend.set_timeout(settings.socket_timeout)?;
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(self.backend.clone())
    }
}
