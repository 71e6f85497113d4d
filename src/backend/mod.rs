//! The storage backend capability consumed by the flush engine.
//!
//! The aggregator never speaks a wire protocol itself. It hands each drained
//! batch to a [`StorageBackend`], which it obtains lazily from a
//! [`Connector`] the first time a flush needs one.
pub mod memory;

use std::fmt;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::bulk::options::Operation;
use crate::bulk::results::BulkWriteResult;
use crate::common::TargetKey;
use crate::connstring::ConnectionSettings;
use crate::error::Error::BackendUnavailable;
use crate::Result;

pub use self::memory::{MemoryBackend, MemoryConnector};

/// A document store that accepts bulk writes.
pub trait StorageBackend: Send + Sync {
    /// Sends `operations` for `target` as a single bulk request.
    ///
    /// `ordered` requests serial execution that stops at the first failed
    /// operation; otherwise every operation is attempted and all errors are
    /// reported. Failed operations are reported in the result, not as an
    /// `Err`. An `Err` means the request as a whole did not complete, and
    /// must be [`BackendUnavailable`](crate::Error::BackendUnavailable) for
    /// transport failures and timeouts. Implementations must bound each call
    /// by the socket timeout of the settings they were connected with.
    fn execute_bulk(
        &self,
        target: &TargetKey,
        operations: &[Operation],
        ordered: bool,
    ) -> Result<BulkWriteResult>;
}

/// Opens storage backends.
pub trait Connector: Send + Sync {
    fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn StorageBackend>>;
}

/// A lazily established, shared backend handle.
///
/// The backend is created once, under a lock, by the first flush that needs
/// it; afterwards every flush shares it. A failed connect attempt is not
/// cached, so the next flush tries again.
pub struct Connection {
    settings: ConnectionSettings,
    connector: Box<dyn Connector>,
    backend: Mutex<Option<Arc<dyn StorageBackend>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("hosts", &self.settings.hosts)
            .finish()
    }
}

impl Connection {
    pub fn new(settings: ConnectionSettings, connector: Box<dyn Connector>) -> Connection {
        Connection {
            settings,
            connector,
            backend: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Whether a backend has been established.
    pub fn is_connected(&self) -> bool {
        self.backend.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Returns the shared backend, connecting first if necessary.
    pub fn backend(&self) -> Result<Arc<dyn StorageBackend>> {
        let mut guard = self.backend.lock()?;

        if let Some(ref backend) = *guard {
            return Ok(backend.clone());
        }

        debug!("Connecting to backend at {:?}", self.settings.hosts);
        let backend = match self.connector.connect(&self.settings) {
            Ok(backend) => backend,
            Err(err) => {
                warn!("Failed to connect to backend: {}", err);
                return Err(match err {
                    BackendUnavailable(msg) => BackendUnavailable(msg),
                    other => BackendUnavailable(other.to_string()),
                });
            }
        };

        *guard = Some(backend.clone());
        Ok(backend)
    }

    /// Sends one bulk request over the shared backend.
    pub fn execute_bulk(
        &self,
        target: &TargetKey,
        operations: &[Operation],
        ordered: bool,
    ) -> Result<BulkWriteResult> {
        self.backend()?.execute_bulk(target, operations, ordered)
    }
}
