//! Counting admission gate bounding in-flight receive units.
//!
//! A thin wrapper around [`tokio::sync::Semaphore`] that makes acquisition
//! cancellable by the pump-wide shutdown token and ties slot release to the
//! permit's drop, so a unit cannot leak its slot on any exit path.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{PumpError, Result};

/// Admission gate with a fixed number of slots.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// One unit of permission to run a receive.
///
/// The slot returns to the limiter when the permit is dropped, regardless of
/// how the holding unit exited.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self { slots: Arc::new(Semaphore::new(capacity)), capacity }
    }

    /// Waits for a free slot.
    ///
    /// Suspends until a slot is available or `shutdown` fires, whichever
    /// comes first; shutdown surfaces as [`PumpError::Cancelled`]. A closed
    /// limiter also reports cancellation, so acquirers racing disposal fail
    /// fast instead of hanging.
    pub async fn acquire(&self, shutdown: &CancellationToken) -> Result<SlotPermit> {
        tokio::select! {
            () = shutdown.cancelled() => Err(PumpError::Cancelled),
            permit = Arc::clone(&self.slots).acquire_owned() => {
                let permit = permit.map_err(|_| PumpError::Cancelled)?;
                Ok(SlotPermit { _permit: permit })
            }
        }
    }

    /// Releases the gate: all pending and future acquisitions fail.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Configured slot count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently free slots.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
