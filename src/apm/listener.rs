use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use log::{debug, error, warn};

use super::event::FlushEvent;
use crate::error::Result;

pub type EventHook = Box<dyn Fn(&FlushEvent) + Send + Sync>;

/// The event sink of an aggregator.
pub struct Listener {
    no_hooks: AtomicBool,
    hooks: RwLock<Vec<EventHook>>,
}

impl Default for Listener {
    fn default() -> Listener {
        Listener::new()
    }
}

impl Listener {
    pub fn new() -> Listener {
        Listener {
            no_hooks: AtomicBool::new(true),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn add_hook(&self, hook: EventHook) -> Result<()> {
        let mut guard = self.hooks.write()?;
        self.no_hooks.store(false, Ordering::SeqCst);
        guard.push(hook);
        Ok(())
    }

    /// Logs the event and runs every registered hook on it.
    ///
    /// Emission never fails the flush that produced the event; a poisoned
    /// hook list only skips the hooks.
    pub fn emit(&self, event: FlushEvent) {
        match event {
            FlushEvent::BackendError { .. } => error!("{}", event),
            FlushEvent::WriteErrors { .. } => warn!("{}", event),
            _ => debug!("{}", event),
        }

        if self.no_hooks.load(Ordering::SeqCst) {
            return;
        }

        if let Ok(guard) = self.hooks.read() {
            for hook in guard.iter() {
                hook(&event);
            }
        }
    }
}
