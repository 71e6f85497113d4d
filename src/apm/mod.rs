//! Flush Monitoring
//!
//! The APM module provides an interface for monitoring and responding to runtime
//! information about the flushes performed by an aggregator. Every flush emits
//! structured events to the aggregator's listener; each event is logged through
//! the `log` facade and passed to every hook registered on the listener.
mod event;
mod listener;

pub use self::event::FlushEvent;
pub use self::listener::{EventHook, Listener};
