use std::fmt::{Display, Error, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::bulk::error::{BulkWriteError, WriteConcernError};
use crate::bulk::results::ResultCounter;
use crate::common::TargetKey;

/// A structured event emitted by the flush engine.
#[derive(Debug, Clone)]
pub enum FlushEvent {
    /// A non-empty builder is about to be sent as one bulk request.
    FlushStarted {
        target: TargetKey,
        operations: usize,
        at: DateTime<Utc>,
    },
    /// The backend accepted a bulk request; `counter` is what was merged.
    FlushSucceeded {
        target: TargetKey,
        counter: ResultCounter,
        duration: Duration,
        at: DateTime<Utc>,
    },
    /// An append brought a builder to the per-target operation limit.
    ThresholdTriggered {
        target: TargetKey,
        operations: usize,
        limit: usize,
        at: DateTime<Utc>,
    },
    /// A bulk request failed at the transport level; its operations are lost.
    BackendError {
        target: TargetKey,
        operations_lost: usize,
        message: String,
        at: DateTime<Utc>,
    },
    /// The backend accepted a bulk request but some operations failed.
    WriteErrors {
        target: TargetKey,
        write_errors: Vec<BulkWriteError>,
        write_concern_errors: Vec<WriteConcernError>,
        at: DateTime<Utc>,
    },
}

impl FlushEvent {
    /// The event name used by log lines and hooks that dispatch on strings.
    pub fn name(&self) -> &'static str {
        match *self {
            FlushEvent::FlushStarted { .. } => "flush-started",
            FlushEvent::FlushSucceeded { .. } => "flush-result",
            FlushEvent::ThresholdTriggered { .. } => "threshold-triggered",
            FlushEvent::BackendError { .. } => "backend-error",
            FlushEvent::WriteErrors { .. } => "write-errors",
        }
    }

    pub fn target(&self) -> &TargetKey {
        match *self {
            FlushEvent::FlushStarted { ref target, .. }
            | FlushEvent::FlushSucceeded { ref target, .. }
            | FlushEvent::ThresholdTriggered { ref target, .. }
            | FlushEvent::BackendError { ref target, .. }
            | FlushEvent::WriteErrors { ref target, .. } => target,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match *self {
            FlushEvent::FlushStarted { at, .. }
            | FlushEvent::FlushSucceeded { at, .. }
            | FlushEvent::ThresholdTriggered { at, .. }
            | FlushEvent::BackendError { at, .. }
            | FlushEvent::WriteErrors { at, .. } => at,
        }
    }

    /// Whether the event reports lost or failed writes.
    pub fn is_failure(&self) -> bool {
        match *self {
            FlushEvent::BackendError { .. } | FlushEvent::WriteErrors { .. } => true,
            _ => false,
        }
    }
}

impl Display for FlushEvent {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
        match *self {
            FlushEvent::FlushStarted { ref target, operations, .. } => {
                fmt.write_fmt(format_args!("FLUSH.{} STARTED: {} operations", target, operations))
            }
            FlushEvent::FlushSucceeded { ref target, ref counter, duration, .. } => {
                fmt.write_fmt(format_args!(
                    "FLUSH.{} COMPLETED: {} ({} ms)",
                    target,
                    counter.to_bson(),
                    duration.as_millis()
                ))
            }
            FlushEvent::ThresholdTriggered { ref target, operations, limit, .. } => {
                fmt.write_fmt(format_args!(
                    "FLUSH.{} THRESHOLD: {} operations reached limit {}",
                    target, operations, limit
                ))
            }
            FlushEvent::BackendError { ref target, operations_lost, ref message, .. } => {
                fmt.write_fmt(format_args!(
                    "FLUSH.{} FAILURE: {} ({} operations lost)",
                    target, message, operations_lost
                ))
            }
            FlushEvent::WriteErrors {
                ref target,
                ref write_errors,
                ref write_concern_errors,
                ..
            } => {
                fmt.write_fmt(format_args!("FLUSH.{} WRITE ERRORS:", target))?;
                for err in write_errors {
                    fmt.write_fmt(format_args!("\n\t{}", err))?;
                }
                for err in write_concern_errors {
                    fmt.write_fmt(format_args!("\n\t{}", err))?;
                }
                Ok(())
            }
        }
    }
}
