//! Client-side write batching for MongoDB-style document stores.
//!
//! An [`Aggregator`] buffers inserts, updates and removals per
//! (database, collection) target and sends each target's buffer as a single
//! bulk request, either when the buffer reaches a configured size or when the
//! periodic flush timer fires.
//!
//! ```
//! use bson::{bson, doc};
//! use moquag::{Aggregator, AggregatorConfig, MemoryBackend, MemoryConnector, TargetKey};
//!
//! let backend = MemoryBackend::new();
//! let config = AggregatorConfig::new(0.5, 100)?;
//! let aggregator = Aggregator::new(config, Box::new(MemoryConnector::new(backend.clone())));
//!
//! let people = aggregator.resolve("app", "people")?;
//! people.insert(doc! { "name": "Ada" })?;
//! people
//!     .find(doc! { "name": "Ada" })
//!     .update_one(doc! { "$set": { "age": 36 } })?;
//!
//! aggregator.close()?;
//! assert_eq!(backend.count(&TargetKey::new("app", "people"))?, 1);
//! # Ok::<(), moquag::Error>(())
//! ```
//!
//! Writes are fire-and-forget. A successful append only means the operation
//! is buffered; what the backend did with it is reported through
//! [`Aggregator::results`] and the event hooks of [`apm::Listener`]. Owners
//! must call [`Aggregator::close`] before shutting down. Operations still
//! buffered when the process terminates abruptly are lost.
pub mod aggregator;
pub mod apm;
pub mod backend;
pub mod bulk;
pub mod common;
pub mod config;
pub mod connstring;
pub mod db;
pub mod error;
pub mod scheduler;
pub mod store;

pub use crate::aggregator::{Aggregator, FlushStatus};
pub use crate::apm::{EventHook, FlushEvent, Listener};
pub use crate::backend::{Connector, MemoryBackend, MemoryConnector, StorageBackend};
pub use crate::bulk::options::Operation;
pub use crate::bulk::results::{BulkWriteResult, ResultCounter};
pub use crate::common::TargetKey;
pub use crate::config::AggregatorConfig;
pub use crate::connstring::ConnectionSettings;
pub use crate::db::{FindOperation, Target};
pub use crate::error::{Error, Result};
