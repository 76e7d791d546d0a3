//! Pump lifecycle and control loops.
//!
//! [`MessagePump`] owns one input queue and fans receive work out to
//! concurrently running units, bounded by the concurrency limiter. Two
//! detached loops run between start and stop: the dispatch loop
//! (peek-then-admit) and the expiry purge loop. Stop cancels intake and
//! drains both loops plus every in-flight unit within a bounded timeout.
//!
//! Peek-then-admit decouples how many items exist from how many can run at
//! once: the limiter, not the queue backend, is the single source of truth
//! for admitted concurrency. The in-flight registry exists only so the stop
//! phase can drain; it never gates admission.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    breaker::FailureCircuitBreaker,
    clock::Clock,
    config::PumpConfig,
    error::{PumpError, Result},
    limiter::{ConcurrencyLimiter, SlotPermit},
    queue::{
        CriticalErrorSink, ExpiryPurger, Pipeline, QueueResolver, ReceiveStrategy,
        ReceiveStrategyFactory, WorkQueue,
    },
    registry::InFlightRegistry,
};

/// Queue polling pump with bounded concurrency and graceful drain.
///
/// Exactly one pump exists per configured input queue. Lifecycle is strictly
/// init once, start once, stop once; the pump is not restartable after stop.
pub struct MessagePump {
    config: PumpConfig,
    resolver: Arc<dyn QueueResolver>,
    strategies: Arc<dyn ReceiveStrategyFactory>,
    purger: Arc<dyn ExpiryPurger>,
    critical: Arc<dyn CriticalErrorSink>,
    clock: Arc<dyn Clock>,
    bindings: Option<Arc<PumpBindings>>,
    runtime: Option<PumpRuntime>,
    stopped: bool,
}

/// Collaborators resolved during init and shared by all units.
struct PumpBindings {
    input: Arc<dyn WorkQueue>,
    error_queue: Arc<dyn WorkQueue>,
    strategy: Arc<dyn ReceiveStrategy>,
    pipeline: Arc<dyn Pipeline>,
    peek_breaker: FailureCircuitBreaker,
    receive_breaker: FailureCircuitBreaker,
}

/// Resources allocated by start and released by stop.
struct PumpRuntime {
    shutdown: CancellationToken,
    limiter: Arc<ConcurrencyLimiter>,
    registry: Arc<InFlightRegistry>,
    dispatch: JoinHandle<()>,
    purge: JoinHandle<()>,
}

/// State shared by the dispatch loop, the purge loop, and every unit.
struct PumpContext {
    bindings: Arc<PumpBindings>,
    limiter: Arc<ConcurrencyLimiter>,
    registry: Arc<InFlightRegistry>,
    shutdown: CancellationToken,
    purger: Arc<dyn ExpiryPurger>,
    clock: Arc<dyn Clock>,
}

impl MessagePump {
    /// Creates a pump over the given collaborators.
    ///
    /// Nothing is resolved or spawned until [`init`](Self::init) and
    /// [`start`](Self::start).
    pub fn new(
        config: PumpConfig,
        resolver: Arc<dyn QueueResolver>,
        strategies: Arc<dyn ReceiveStrategyFactory>,
        purger: Arc<dyn ExpiryPurger>,
        critical: Arc<dyn CriticalErrorSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            resolver,
            strategies,
            purger,
            critical,
            clock,
            bindings: None,
            runtime: None,
            stopped: false,
        }
    }

    /// Binds the pipeline and resolves all collaborators.
    ///
    /// Resolves the input and error queues, builds the receive strategy for
    /// the configured transaction mode, constructs both circuit breakers,
    /// purges the input queue when configured to purge on startup, and
    /// initializes the expiry purger. Must complete before `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if called twice, or if queue resolution, the startup
    /// purge, or purger initialization fails.
    pub async fn init(&mut self, pipeline: Arc<dyn Pipeline>) -> Result<()> {
        if self.bindings.is_some() {
            return Err(PumpError::lifecycle("pump is already initialized"));
        }

        let input = self.resolver.resolve(&self.config.input_queue).await?;
        let error_queue = self.resolver.resolve(&self.config.error_queue).await?;
        let strategy = self.strategies.build(self.config.transaction_mode);

        let peek_breaker = FailureCircuitBreaker::new(
            "queue-peek",
            self.config.circuit_breaker_wait,
            self.clock.clone(),
            self.critical.clone(),
        );
        let receive_breaker = FailureCircuitBreaker::new(
            "message-receive",
            self.config.circuit_breaker_wait,
            self.clock.clone(),
            self.critical.clone(),
        );

        if self.config.purge_on_startup {
            let purged = input.purge().await?;
            info!(queue = input.address(), purged, "input queue purged on startup");
        }

        self.purger.init(&input).await?;

        info!(
            input_queue = input.address(),
            error_queue = error_queue.address(),
            transaction_mode = %self.config.transaction_mode,
            "message pump initialized"
        );

        self.bindings = Some(Arc::new(PumpBindings {
            input,
            error_queue,
            strategy,
            pipeline,
            peek_breaker,
            receive_breaker,
        }));
        Ok(())
    }

    /// Starts the dispatch and expiry purge loops.
    ///
    /// Allocates the in-flight registry, the concurrency limiter, and the
    /// pump-wide cancellation token, then spawns both loops detached.
    /// Returns immediately; use [`stop`](Self::stop) to shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if init has not completed, if already started, or if
    /// the pump was stopped.
    pub async fn start(&mut self) -> Result<()> {
        if self.stopped {
            return Err(PumpError::lifecycle("pump cannot be restarted after stop"));
        }
        if self.runtime.is_some() {
            return Err(PumpError::lifecycle("pump is already started"));
        }
        let bindings = Arc::clone(
            self.bindings
                .as_ref()
                .ok_or_else(|| PumpError::lifecycle("init must complete before start"))?,
        );

        let shutdown = CancellationToken::new();
        let limiter = Arc::new(ConcurrencyLimiter::new(self.config.max_concurrency));
        let registry = Arc::new(InFlightRegistry::new());

        let context = Arc::new(PumpContext {
            bindings,
            limiter: Arc::clone(&limiter),
            registry: Arc::clone(&registry),
            shutdown: shutdown.clone(),
            purger: Arc::clone(&self.purger),
            clock: Arc::clone(&self.clock),
        });

        let dispatch = tokio::spawn(dispatch_loop(Arc::clone(&context)));
        let purge = tokio::spawn(purge_loop(context));

        self.runtime = Some(PumpRuntime { shutdown, limiter, registry, dispatch, purge });

        info!(max_concurrency = self.config.max_concurrency, "message pump started");
        Ok(())
    }

    /// Stops the pump, draining in-flight work within the configured bound.
    ///
    /// Signals pump-wide cancellation, then waits for every in-flight unit
    /// plus both loops, racing the stop timeout. An elapsed timeout is logged
    /// as an error but is non-fatal: outstanding work may still be running in
    /// the background when this returns. The registry, limiter, and
    /// cancellation token are released before returning in all cases.
    ///
    /// # Errors
    ///
    /// Returns an error only when the pump is not running.
    pub async fn stop(&mut self) -> Result<()> {
        let PumpRuntime { shutdown, limiter, registry, dispatch, purge } =
            self.runtime.take().ok_or_else(|| PumpError::lifecycle("pump is not running"))?;
        self.stopped = true;

        info!("message pump stopping");
        shutdown.cancel();
        limiter.close();

        let mut handles = registry.drain();
        let in_flight = handles.len();
        handles.push(dispatch);
        handles.push(purge);

        let drain = async {
            for handle in handles {
                if let Err(join_error) = handle.await {
                    if join_error.is_panic() {
                        error!(error = %join_error, "pump task panicked during drain");
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.stop_timeout, drain).await.is_err() {
            error!(
                timeout_secs = self.config.stop_timeout.as_secs(),
                in_flight, "pump stop timed out, outstanding work may still be running"
            );
        } else {
            debug!(in_flight, "pump drained cleanly");
        }

        registry.clear();
        drop(limiter);
        drop(shutdown);

        info!("message pump stopped");
        Ok(())
    }

    /// Whether the pump has been started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Drop for MessagePump {
    fn drop(&mut self) {
        if let Some(runtime) = &self.runtime {
            if !runtime.shutdown.is_cancelled() {
                warn!("message pump dropped while running, cancelling loops");
                runtime.shutdown.cancel();
                runtime.limiter.close();
            }
        }
    }
}

/// Main control loop: peek the input queue and admit receive units until
/// pump-wide cancellation.
async fn dispatch_loop(context: Arc<PumpContext>) {
    info!("dispatch loop starting");

    while !context.shutdown.is_cancelled() {
        if !context.dispatch_cycle().await {
            break;
        }
    }

    info!("dispatch loop stopped");
}

/// Periodic expiry purge until pump-wide cancellation.
///
/// The delay is re-read from the purger every iteration, so the policy can
/// vary it over time. Cancellation during the purge call or the sleep ends
/// the loop without error reporting.
async fn purge_loop(context: Arc<PumpContext>) {
    info!("expiry purge loop starting");

    loop {
        let input = &context.bindings.input;
        tokio::select! {
            () = context.shutdown.cancelled() => break,
            result = context.purger.purge(input, &context.shutdown) => match result {
                Ok(purged) => {
                    debug!(queue = input.address(), purged, "expiry purge pass complete");
                },
                Err(error) if error.is_cancellation() => break,
                Err(error) => {
                    warn!(queue = input.address(), error = %error, "expiry purge failed");
                },
            },
        }

        let delay = context.purger.next_purge_delay();
        tokio::select! {
            () = context.shutdown.cancelled() => break,
            () = context.clock.sleep(delay) => {},
        }
    }

    info!("expiry purge loop stopped");
}

impl PumpContext {
    /// One peek-and-admit cycle. Returns false when shutdown ends the loop.
    async fn dispatch_cycle(self: &Arc<Self>) -> bool {
        let bindings = &self.bindings;

        let available = match bindings.input.peek(&self.shutdown).await {
            Ok(count) => {
                bindings.peek_breaker.success();
                count
            },
            Err(error) if error.is_cancellation() => return false,
            Err(error) => {
                warn!(queue = bindings.input.address(), error = %error, "queue peek failed");
                bindings.peek_breaker.failure(&error).await;
                return true;
            },
        };

        if available == 0 {
            // The peek collaborator owns idle back-off; re-peek immediately.
            return true;
        }

        debug!(queue = bindings.input.address(), available, "admitting peeked batch");
        let batch = CancellationToken::new();

        for _ in 0..available {
            if batch.is_cancelled() {
                debug!(
                    queue = bindings.input.address(),
                    "batch cancelled, stopping further admissions"
                );
                break;
            }

            let permit = match self.limiter.acquire(&self.shutdown).await {
                Ok(permit) => permit,
                Err(_) => return false,
            };

            self.spawn_receive_unit(permit, batch.clone());
        }

        true
    }

    /// Launches one receive unit holding `permit`, tracked in the registry.
    fn spawn_receive_unit(self: &Arc<Self>, permit: SlotPermit, batch: CancellationToken) {
        let id = Uuid::new_v4();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let context = Arc::clone(self);

        let handle = tokio::spawn(async move {
            // Slot returns to the limiter when this guard drops, on every
            // exit path including failure and cancellation.
            let _slot = permit;

            // Wait out registration before touching the queue: the launching
            // dispatcher is never blocked by this unit (receive backends may
            // enlist pooled connections synchronously), and self-removal
            // cannot race the registry insert.
            if registered_rx.await.is_err() {
                return;
            }

            context.receive_one(&batch).await;
            context.registry.remove(&id);
        });

        self.registry.insert(id, handle);
        let _ = registered_tx.send(());
    }

    /// Performs exactly one receive-and-process attempt.
    async fn receive_one(&self, batch: &CancellationToken) {
        let bindings = &self.bindings;

        let result = bindings
            .strategy
            .receive_message(&bindings.input, &bindings.error_queue, batch, &bindings.pipeline)
            .await;

        match result {
            Ok(()) => bindings.receive_breaker.success(),
            Err(error) if error.is_cancellation() => {
                debug!(queue = bindings.input.address(), "receive abandoned during shutdown");
            },
            Err(error) => {
                warn!(queue = bindings.input.address(), error = %error, "message receive failed");
                bindings.receive_breaker.failure(&error).await;
            },
        }
    }
}
