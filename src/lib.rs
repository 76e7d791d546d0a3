//! Bounded-concurrency queue polling pump.
//!
//! This crate implements the control core of a queue consumer: a pump that
//! repeatedly peeks a transport queue for available work, fans processing out
//! to concurrent receive units up to a configured ceiling, isolates transient
//! backend failures behind per-category circuit breakers, and drains
//! in-flight work within a bounded timeout on shutdown.
//!
//! # Architecture
//!
//! The pump runs two detached loops between `start` and `stop`:
//!
//! 1. **Dispatch loop** - peeks the input queue for a count of visible items
//!    and admits that many receive units, each gated by the concurrency
//!    limiter and tracked in an in-flight registry
//! 2. **Expiry purge loop** - periodically invokes the external purge policy
//!    with a policy-supplied delay between passes
//!
//! Each receive unit performs exactly one receive-and-process attempt via
//! the configured receive strategy and reports its outcome to the receive
//! circuit breaker. Peek failures feed an independent breaker, so an outage
//! on one path cannot mask the other. Breakers escalate through the
//! critical-error sink once per failure streak that outlasts the configured
//! wait window, while the loops keep retrying.
//!
//! The queue storage engine, serialization, transactional receive semantics,
//! and the purge policy itself are collaborators behind the traits in
//! [`queue`]; the pump is a pure in-process control component.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sluice::{MessagePump, PumpSettings, RealClock};
//! # use sluice::queue::{CriticalErrorSink, ExpiryPurger, Pipeline, QueueResolver, ReceiveStrategyFactory};
//!
//! # async fn example(
//! #     resolver: Arc<dyn QueueResolver>,
//! #     strategies: Arc<dyn ReceiveStrategyFactory>,
//! #     purger: Arc<dyn ExpiryPurger>,
//! #     critical: Arc<dyn CriticalErrorSink>,
//! #     pipeline: Arc<dyn Pipeline>,
//! # ) -> anyhow::Result<()> {
//! let config = PumpSettings::load()?.to_pump_config();
//! let mut pump =
//!     MessagePump::new(config, resolver, strategies, purger, critical, Arc::new(RealClock));
//!
//! pump.init(pipeline).await?;
//! pump.start().await?;
//! // ... until shutdown is requested
//! pump.stop().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod pump;
pub mod queue;
mod registry;

// Re-export main public API
pub use breaker::FailureCircuitBreaker;
pub use clock::{Clock, RealClock, TestClock};
pub use config::{PumpConfig, PumpSettings, TransactionMode};
pub use error::{PumpError, Result};
pub use limiter::{ConcurrencyLimiter, SlotPermit};
pub use pump::MessagePump;

/// Default ceiling for concurrently running receive units.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default circuit breaker wait window in seconds.
pub const DEFAULT_CIRCUIT_WAIT_SECS: u64 = 30;

/// Default bound on the stop-phase drain in seconds.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;
