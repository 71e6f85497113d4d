//! The aggregator facade: routing, timed flushing and result retrieval.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};

use log::{debug, error, info, warn};

use crate::apm::{EventHook, Listener};
use crate::backend::{Connection, Connector};
use crate::bulk::results::ResultCounter;
use crate::common::{self, TargetKey};
use crate::config::AggregatorConfig;
use crate::db::{FlushContext, Target, TargetRegistry};
use crate::scheduler::Scheduler;
use crate::store::ResultStore;
use crate::Result;

/// The outcome of a call to [`Aggregator::flush_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Every registry was drained and every drained builder executed.
    Completed,
    /// Another flush was in progress; this call did nothing. The running
    /// flush, or the next one, picks up whatever is pending.
    AlreadyExecuting,
}

struct Inner {
    context: Arc<FlushContext>,
    databases: RwLock<HashMap<String, Arc<TargetRegistry>>>,
    executing: Mutex<bool>,
    idle: Condvar,
}

// Clears the executing flag when the flush that set it ends, even by panic.
struct Executing<'a> {
    inner: &'a Inner,
}

impl<'a> Drop for Executing<'a> {
    fn drop(&mut self) {
        match self.inner.executing.lock() {
            Ok(mut executing) => *executing = false,
            Err(poisoned) => *poisoned.into_inner() = false,
        }
        self.inner.idle.notify_all();
    }
}

impl Inner {
    fn registry(&self, database: &str) -> Result<Arc<TargetRegistry>> {
        if let Some(registry) = self.databases.read()?.get(database) {
            return Ok(registry.clone());
        }

        common::validate_name("database", database)?;
        let mut databases = self.databases.write()?;
        let registry = databases
            .entry(database.to_owned())
            .or_insert_with(|| Arc::new(TargetRegistry::new(database, self.context.clone())));
        Ok(registry.clone())
    }

    fn begin(&self) -> Result<Option<Executing<'_>>> {
        let mut executing = self.executing.lock()?;
        if *executing {
            return Ok(None);
        }
        *executing = true;
        Ok(Some(Executing { inner: self }))
    }

    fn flush_all(&self) -> Result<FlushStatus> {
        let _executing = match self.begin()? {
            Some(guard) => guard,
            None => {
                debug!("Flush already executing; skipping");
                return Ok(FlushStatus::AlreadyExecuting);
            }
        };

        let registries: Vec<Arc<TargetRegistry>> =
            self.databases.read()?.values().cloned().collect();

        let mut first_err = None;
        for registry in registries {
            if let Err(err) = registry.flush_all() {
                error!("Failed to flush database {}: {}", registry.name(), err);
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(FlushStatus::Completed),
        }
    }

    fn wait_idle(&self) -> Result<()> {
        let mut executing = self.executing.lock()?;
        while *executing {
            executing = self.idle.wait(executing)?;
        }
        Ok(())
    }
}

/// Buffers writes per (database, collection) and sends them as bulk requests.
///
/// Writes are addressed through [`resolve`](Aggregator::resolve) and are
/// fire-and-forget: they return once buffered. A target is flushed when its
/// pending operations reach the configured limit (on the appending thread),
/// on every tick of the flush timer once [`start`](Aggregator::start) has
/// been called, or on a manual flush.
///
/// Owners should call [`close`](Aggregator::close) before dropping the
/// aggregator. Dropping it runs the same final flush best-effort, and
/// operations still buffered when the process exits abruptly are lost.
pub struct Aggregator {
    inner: Arc<Inner>,
    scheduler: Scheduler,
    config: AggregatorConfig,
    closed: AtomicBool,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{{\"seconds\": {}}}", self.config.flush_interval.as_secs_f64())
    }
}

impl Aggregator {
    /// Creates an aggregator. No connection is made until the first flush,
    /// and the flush timer stays idle until `start` is called.
    pub fn new(config: AggregatorConfig, connector: Box<dyn Connector>) -> Aggregator {
        let context = Arc::new(FlushContext {
            connection: Connection::new(config.connection.clone(), connector),
            results: ResultStore::new(),
            listener: Listener::new(),
            max_ops_per_target: config.max_ops_per_target,
            ordered: config.ordered,
        });

        let inner = Arc::new(Inner {
            context,
            databases: RwLock::new(HashMap::new()),
            executing: Mutex::new(false),
            idle: Condvar::new(),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let scheduler = Scheduler::new(config.flush_interval, move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = inner.flush_all() {
                    error!("Timed flush failed: {}", err);
                }
            }
        });

        Aggregator {
            inner,
            scheduler,
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Returns a handle to `collection` in `database`, creating the routing
    /// state for either on first use.
    pub fn resolve(&self, database: &str, collection: &str) -> Result<Target> {
        let registry = self.inner.registry(database)?;
        registry.resolve(collection)?;
        Ok(Target::new(registry, collection))
    }

    /// The registry routing operations for `database`.
    pub fn database(&self, database: &str) -> Result<Arc<TargetRegistry>> {
        self.inner.registry(database)
    }

    /// Names of every database addressed so far.
    pub fn database_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.inner.databases.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Drains and executes every pending operation of every target.
    ///
    /// Not reentrant: while a flush is running, further calls return
    /// `AlreadyExecuting` immediately. Backend failures are reported to the
    /// listener and the result counters, not returned.
    pub fn flush_all(&self) -> Result<FlushStatus> {
        self.inner.flush_all()
    }

    /// Flushes one target now.
    pub fn flush(&self, database: &str, collection: &str) -> Result<()> {
        let registry = self.inner.databases.read()?.get(database).cloned();
        match registry {
            Some(registry) => registry.flush(collection),
            None => Ok(()),
        }
    }

    /// Starts the flush timer. Returns `false` if it was already running.
    pub fn start(&self) -> Result<bool> {
        self.scheduler.start()
    }

    /// Cancels future timed flushes. A flush already running is not waited for.
    pub fn stop(&self) -> Result<bool> {
        self.scheduler.stop()
    }

    pub fn restart(&self) -> Result<()> {
        self.scheduler.restart()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Number of times the flush timer has fired.
    pub fn ticks(&self) -> usize {
        self.scheduler.ticks()
    }

    /// Snapshot of the counters of every target flushed since the last reset.
    pub fn results(&self) -> Result<BTreeMap<TargetKey, ResultCounter>> {
        self.inner.context.results.results()
    }

    pub fn results_for(&self, database: &str, collection: &str) -> Result<Option<ResultCounter>> {
        self.inner
            .context
            .results
            .get(&TargetKey::new(database, collection))
    }

    /// Returns every counter and resets the store to empty in one step.
    pub fn get_and_reset_results(&self) -> Result<BTreeMap<TargetKey, ResultCounter>> {
        self.inner.context.results.take()
    }

    /// Sum of the counters of every target.
    pub fn total_results(&self) -> Result<ResultCounter> {
        self.inner.context.results.total()
    }

    pub fn listener(&self) -> &Listener {
        &self.inner.context.listener
    }

    /// Registers a hook that receives every flush event.
    pub fn add_hook(&self, hook: EventHook) -> Result<()> {
        self.inner.context.listener.add_hook(hook)
    }

    /// Whether the backend connection has been established.
    pub fn is_connected(&self) -> bool {
        self.inner.context.connection.is_connected()
    }

    /// Number of operations buffered across every target.
    pub fn pending_operations(&self) -> Result<usize> {
        Ok(self
            .inner
            .databases
            .read()?
            .values()
            .map(|registry| registry.pending_operations())
            .sum())
    }

    /// Stops the flush timer, waits for a running flush to finish, then
    /// flushes everything still pending.
    ///
    /// Operations appended after `close` returns are buffered but only sent
    /// by a later manual flush.
    pub fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Closing aggregator");
        }

        self.scheduler.stop()?;
        loop {
            self.inner.wait_idle()?;
            if self.inner.flush_all()? == FlushStatus::Completed {
                return Ok(());
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        if self.is_closed() {
            // Already closed; flush only what arrived since.
            if let Ok(pending) = self.pending_operations() {
                if pending == 0 {
                    return;
                }
            }
        }

        if let Err(err) = self.close() {
            warn!("Failed to flush pending operations on drop: {}", err);
        }
    }
}
