//! Registry of in-flight receive units.
//!
//! Exists solely so the stop phase can enumerate and drain whatever is
//! currently running; admission is gated by the limiter, never by this map.
//! Critical sections are a single map operation, so the mutex is the plain
//! synchronous one and removal stays non-blocking from async contexts.

use std::{collections::HashMap, sync::Mutex};

use tokio::task::JoinHandle;
use uuid::Uuid;

/// Concurrent map of unit identity to its running task.
#[derive(Debug, Default)]
pub(crate) struct InFlightRegistry {
    units: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl InFlightRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Tracks a newly spawned unit.
    pub(crate) fn insert(&self, id: Uuid, handle: JoinHandle<()>) {
        self.lock().insert(id, handle);
    }

    /// Removes a unit, typically by the unit itself on completion.
    ///
    /// Returns false if the unit was already drained by the stop phase.
    pub(crate) fn remove(&self, id: &Uuid) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Takes every tracked handle for the drain phase.
    pub(crate) fn drain(&self) -> Vec<JoinHandle<()>> {
        self.lock().drain().map(|(_, handle)| handle).collect()
    }

    /// Drops all remaining entries.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    /// Number of units currently tracked.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
        self.units.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
