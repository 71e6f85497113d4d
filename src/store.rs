//! Aggregated outcome counters, keyed by target.
use std::collections::BTreeMap;
use std::mem;
use std::sync::Mutex;

use crate::bulk::results::ResultCounter;
use crate::common::TargetKey;
use crate::Result;

/// Running results of every flush since the last reset.
///
/// Written by every flush, whichever thread performs it, and read by
/// callers of `results`; a single lock covers merge, read and reset.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: Mutex<BTreeMap<TargetKey, ResultCounter>>,
}

impl ResultStore {
    pub fn new() -> ResultStore {
        ResultStore::default()
    }

    /// Adds `counter` into the stored counter for `key`, creating it if absent.
    pub fn merge(&self, key: &TargetKey, counter: ResultCounter) -> Result<()> {
        let mut results = self.results.lock()?;
        *results.entry(key.clone()).or_insert_with(ResultCounter::new) += counter;
        Ok(())
    }

    pub fn get(&self, key: &TargetKey) -> Result<Option<ResultCounter>> {
        Ok(self.results.lock()?.get(key).cloned())
    }

    /// Snapshot of every stored counter.
    pub fn results(&self) -> Result<BTreeMap<TargetKey, ResultCounter>> {
        Ok(self.results.lock()?.clone())
    }

    /// Takes every stored counter and leaves the store empty. A merge racing
    /// with the reset lands entirely before or entirely after it.
    pub fn take(&self) -> Result<BTreeMap<TargetKey, ResultCounter>> {
        let mut results = self.results.lock()?;
        Ok(mem::replace(&mut *results, BTreeMap::new()))
    }

    /// Sum of the counters of every target.
    pub fn total(&self) -> Result<ResultCounter> {
        let results = self.results.lock()?;
        Ok(results
            .values()
            .fold(ResultCounter::new(), |total, counter| total + *counter))
    }
}
