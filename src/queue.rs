//! Collaborator contracts consumed by the pump.
//!
//! The pump is a pure in-process control component: the physical queue
//! storage engine, message serialization, address resolution, transactional
//! receive semantics, the expiry purge policy, and the critical-error sink
//! all live behind the traits defined here. Production implementations bind
//! them to a real transport; tests provide in-memory fakes.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::TransactionMode,
    error::{PumpError, Result},
};

/// Opaque envelope for one received item.
///
/// Serialization is not the pump's concern: the payload is carried as raw
/// bytes and interpreted by the pipeline.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Transport-assigned item identity.
    pub id: Uuid,
    /// Transport headers accompanying the item.
    pub headers: HashMap<String, String>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl QueueItem {
    /// Creates an item with a fresh identity and no headers.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { id: Uuid::new_v4(), headers: HashMap::new(), payload }
    }
}

/// Externally supplied callback invoked once per successfully received item.
///
/// Failure semantics are opaque to the pump beyond `Err`: a rejected item is
/// reported to the receive circuit breaker, and any retry or dead-lettering
/// decision belongs to the receive strategy.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    /// Processes one received item.
    async fn process(&self, item: QueueItem) -> Result<()>;
}

/// Handle to one resolved transport queue.
///
/// `peek` owns its back-off/blocking behavior when the queue is idle; the
/// dispatch loop re-peeks immediately on a zero count and imposes no delay of
/// its own.
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    /// Address this handle was resolved from.
    fn address(&self) -> &str;

    /// Returns the number of currently visible items.
    ///
    /// Cancellation of `cancel` must surface as [`PumpError::Cancelled`].
    async fn peek(&self, cancel: &CancellationToken) -> Result<usize>;

    /// Attempts to claim one item and hand it to the pipeline.
    ///
    /// The batch token belongs to the peek cycle that admitted this receive;
    /// implementations may cancel it to stop further admissions from the same
    /// batch (for example on detecting a poison condition). The pump itself
    /// never cancels it.
    async fn receive(
        &self,
        error_queue: &Arc<dyn WorkQueue>,
        batch: &CancellationToken,
        pipeline: &Arc<dyn Pipeline>,
    ) -> Result<()>;

    /// Removes all items from the queue, returning the removed count.
    async fn purge(&self) -> Result<u64>;
}

/// Resolves a queue address into a usable handle.
#[async_trait]
pub trait QueueResolver: Send + Sync + 'static {
    /// Resolves `address` into a queue handle.
    async fn resolve(&self, address: &str) -> Result<Arc<dyn WorkQueue>>;
}

/// The receive-and-invoke sequence for one transaction mode.
///
/// A strategy performs exactly one receive attempt per call. Retry and
/// redelivery policy live here, not in the pump: the pump treats any `Err`
/// as a single failed attempt and moves on.
#[async_trait]
pub trait ReceiveStrategy: Send + Sync + 'static {
    /// Receives one item from `input` and drives it through `pipeline`,
    /// honoring this strategy's transactional semantics.
    async fn receive_message(
        &self,
        input: &Arc<dyn WorkQueue>,
        error_queue: &Arc<dyn WorkQueue>,
        batch: &CancellationToken,
        pipeline: &Arc<dyn Pipeline>,
    ) -> Result<()>;
}

/// Maps the configured transaction mode to a receive strategy.
pub trait ReceiveStrategyFactory: Send + Sync + 'static {
    /// Builds the strategy for `mode`.
    fn build(&self, mode: TransactionMode) -> Arc<dyn ReceiveStrategy>;
}

/// External expiry purge policy.
///
/// The pump owns only the scheduling loop; what counts as expired, and how
/// long to wait between passes, are the purger's decisions. The recommended
/// delay is re-read before every sleep so the policy can adapt it over time.
#[async_trait]
pub trait ExpiryPurger: Send + Sync + 'static {
    /// Prepares the purger for the given input queue. Called once during
    /// pump initialization.
    async fn init(&self, input: &Arc<dyn WorkQueue>) -> Result<()>;

    /// Runs one purge pass, returning the number of items removed.
    async fn purge(&self, input: &Arc<dyn WorkQueue>, cancel: &CancellationToken) -> Result<u64>;

    /// Recommended delay before the next purge pass.
    fn next_purge_delay(&self) -> Duration;
}

/// Sink for circuit-breaker escalations.
#[async_trait]
pub trait CriticalErrorSink: Send + Sync + 'static {
    /// Reports that `category` has been failing continuously past its
    /// configured window, with the failure that tripped the escalation.
    async fn raise(&self, category: &str, error: &PumpError);
}
