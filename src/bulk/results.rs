//! Raw bulk-write replies and the normalized counters they are tallied into.
use std::ops::{Add, AddAssign};

use bson::{self, Bson};
use serde_derive::{Deserialize, Serialize};

use super::error::{BulkWriteError, WriteConcernError};
use crate::error::Error::ResponseError;
use crate::Result;

/// Results for a single bulk request, as returned by a storage backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    pub inserted_count: i64,
    pub matched_count: i64,
    pub modified_count: i64,
    pub upserted_count: i64,
    pub removed_count: i64,
    /// Ids of upserted documents, keyed by the index of the operation that created them.
    pub upserted_ids: Vec<(i32, Bson)>,
    pub write_errors: Vec<BulkWriteError>,
    pub write_concern_errors: Vec<WriteConcernError>,
}

/// Running outcome tallies for one target, merged across flushes.
///
/// Merging is field-wise addition, so the counter for a sequence of flushes
/// equals the counter of sending every operation in one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultCounter {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
    pub removed: u64,
    pub write_errors: u64,
    pub write_concern_errors: u64,
    /// Bulk requests that failed with `BackendUnavailable` and were lost.
    pub backend_errors: u64,
}

impl BulkWriteResult {
    pub fn new() -> BulkWriteResult {
        BulkWriteResult::default()
    }

    /// Whether the backend reported any write or write-concern errors.
    pub fn is_partial_failure(&self) -> bool {
        !self.write_errors.is_empty() || !self.write_concern_errors.is_empty()
    }

    /// Extracts server reply information into a result.
    ///
    /// Accepts both the `writeConcernErrors` array of a bulk reply and the
    /// single `writeConcernError` document of a write command reply.
    pub fn parse(reply: &bson::Document) -> Result<BulkWriteResult> {
        let mut result = BulkWriteResult::new();

        result.inserted_count = get_count(reply, "nInserted");
        result.matched_count = get_count(reply, "nMatched");
        result.modified_count = get_count(reply, "nModified");
        result.removed_count = get_count(reply, "nRemoved");

        match reply.get("upserted") {
            Some(&Bson::Array(ref upserted)) => {
                for entry in upserted {
                    if let Bson::Document(ref doc) = *entry {
                        let index = match doc.get("index") {
                            Some(&Bson::I32(i)) => i,
                            Some(&Bson::I64(i)) => i as i32,
                            _ => continue,
                        };
                        if let Some(id) = doc.get("_id") {
                            result.upserted_ids.push((index, id.clone()));
                        }
                    }
                }
                result.upserted_count = upserted.len() as i64;
            }
            _ => result.upserted_count = get_count(reply, "nUpserted"),
        }

        if let Some(errors) = reply.get("writeErrors") {
            result.write_errors = parse_documents(errors, "writeErrors")?
                .iter()
                .map(|doc| BulkWriteError::parse(doc))
                .collect::<Result<_>>()?;
        }

        if let Some(errors) = reply.get("writeConcernErrors") {
            result.write_concern_errors = parse_documents(errors, "writeConcernErrors")?
                .iter()
                .map(|doc| WriteConcernError::parse(doc))
                .collect::<Result<_>>()?;
        } else if let Some(&Bson::Document(ref error)) = reply.get("writeConcernError") {
            result.write_concern_errors.push(WriteConcernError::parse(error)?);
        }

        Ok(result)
    }
}

fn get_count(doc: &bson::Document, key: &str) -> i64 {
    match doc.get(key) {
        Some(&Bson::I32(n)) => i64::from(n),
        Some(&Bson::I64(n)) => n,
        Some(&Bson::FloatingPoint(n)) => n as i64,
        _ => 0,
    }
}

fn parse_documents<'a>(bson: &'a Bson, field: &str) -> Result<Vec<&'a bson::Document>> {
    match *bson {
        Bson::Array(ref values) => values
            .iter()
            .map(|value| match *value {
                Bson::Document(ref doc) => Ok(doc),
                _ => Err(ResponseError(format!(
                    "{} entry provided was not a bson document.",
                    field
                ))),
            })
            .collect(),
        _ => Err(ResponseError(format!("{} must be an array.", field))),
    }
}

// Negative counts can only come from a misbehaving backend; they are clamped.
fn count(n: i64) -> u64 {
    if n > 0 {
        n as u64
    } else {
        0
    }
}

impl<'a> From<&'a BulkWriteResult> for ResultCounter {
    fn from(result: &BulkWriteResult) -> ResultCounter {
        ResultCounter {
            inserted: count(result.inserted_count),
            matched: count(result.matched_count),
            modified: count(result.modified_count),
            upserted: count(result.upserted_count),
            removed: count(result.removed_count),
            write_errors: result.write_errors.len() as u64,
            write_concern_errors: result.write_concern_errors.len() as u64,
            backend_errors: 0,
        }
    }
}

impl ResultCounter {
    pub fn new() -> ResultCounter {
        ResultCounter::default()
    }

    /// A counter recording one bulk request lost to an unavailable backend.
    pub fn backend_error() -> ResultCounter {
        ResultCounter {
            backend_errors: 1,
            ..ResultCounter::default()
        }
    }

    /// Whether every tally is zero.
    pub fn is_empty(&self) -> bool {
        *self == ResultCounter::default()
    }

    /// Total number of operations the backend applied.
    pub fn applied(&self) -> u64 {
        self.inserted + self.matched + self.upserted + self.removed
    }

    /// Encodes the non-zero tallies using bulk reply field names.
    pub fn to_bson(&self) -> bson::Document {
        let fields = [
            ("nInserted", self.inserted),
            ("nMatched", self.matched),
            ("nModified", self.modified),
            ("nUpserted", self.upserted),
            ("nRemoved", self.removed),
            ("writeErrors", self.write_errors),
            ("writeConcernErrors", self.write_concern_errors),
            ("backendErrors", self.backend_errors),
        ];

        let mut doc = bson::Document::new();
        for &(key, value) in fields.iter().filter(|&&(_, value)| value > 0) {
            doc.insert(key, Bson::I64(value as i64));
        }
        doc
    }
}

impl AddAssign for ResultCounter {
    fn add_assign(&mut self, other: ResultCounter) {
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.modified += other.modified;
        self.upserted += other.upserted;
        self.removed += other.removed;
        self.write_errors += other.write_errors;
        self.write_concern_errors += other.write_concern_errors;
        self.backend_errors += other.backend_errors;
    }
}

impl Add for ResultCounter {
    type Output = ResultCounter;

    fn add(mut self, other: ResultCounter) -> ResultCounter {
        self += other;
        self
    }
}
