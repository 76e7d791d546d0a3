//! In-memory fakes for exercising the pump without a real transport.
//!
//! `TestQueue` implements the queue contract over a `VecDeque`, with
//! scriptable peek results and failure injection. The passthrough strategy
//! redelivers failed items to the back of the queue, which keeps a failing
//! pipeline failing continuously, the shape the circuit-breaker scenarios
//! need.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use sluice::{
    queue::{
        CriticalErrorSink, ExpiryPurger, Pipeline, QueueItem, QueueResolver, ReceiveStrategy,
        ReceiveStrategyFactory, WorkQueue,
    },
    PumpError, Result, TransactionMode,
};
use tokio_util::sync::CancellationToken;

/// Scripted outcome for one peek call.
#[derive(Debug, Clone)]
pub enum PeekStep {
    /// Report this many visible items.
    Count(usize),
    /// Fail with a queue backend error.
    Fail(&'static str),
}

/// In-memory queue with scriptable peeks and failure injection.
pub struct TestQueue {
    address: String,
    items: Mutex<VecDeque<QueueItem>>,
    script: Option<Mutex<VecDeque<PeekStep>>>,
    fail_next_peeks: AtomicUsize,
    pub peeks: AtomicUsize,
    pub purges: AtomicUsize,
}

impl TestQueue {
    pub fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            items: Mutex::new(VecDeque::new()),
            script: None,
            fail_next_peeks: AtomicUsize::new(0),
            peeks: AtomicUsize::new(0),
            purges: AtomicUsize::new(0),
        })
    }

    /// Queue whose peeks follow `steps`, then block until cancellation.
    pub fn scripted(address: &str, steps: Vec<PeekStep>) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            items: Mutex::new(VecDeque::new()),
            script: Some(Mutex::new(steps.into())),
            fail_next_peeks: AtomicUsize::new(0),
            peeks: AtomicUsize::new(0),
            purges: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, payload: &[u8]) {
        self.items.lock().unwrap().push_back(QueueItem::new(payload.to_vec()));
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Makes the next `count` peeks fail with a backend error.
    pub fn fail_next_peeks(&self, count: usize) {
        self.fail_next_peeks.store(count, Ordering::SeqCst);
    }

    fn pop(&self) -> Option<QueueItem> {
        self.items.lock().unwrap().pop_front()
    }

    fn redeliver(&self, item: QueueItem) {
        self.items.lock().unwrap().push_back(item);
    }
}

#[async_trait]
impl WorkQueue for TestQueue {
    fn address(&self) -> &str {
        &self.address
    }

    async fn peek(&self, cancel: &CancellationToken) -> Result<usize> {
        self.peeks.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .fail_next_peeks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            // Brief pause keeps an injected failure streak from busy-spinning
            tokio::time::sleep(Duration::from_millis(2)).await;
            return Err(PumpError::queue("injected peek failure"));
        }

        if let Some(script) = &self.script {
            let step = script.lock().unwrap().pop_front();
            return match step {
                Some(PeekStep::Count(count)) => Ok(count),
                Some(PeekStep::Fail(message)) => Err(PumpError::queue(message)),
                None => {
                    cancel.cancelled().await;
                    Err(PumpError::Cancelled)
                },
            };
        }

        let visible = self.len();
        if visible > 0 {
            return Ok(visible);
        }

        // Idle back-off belongs to the peek collaborator, not the loop
        tokio::select! {
            () = cancel.cancelled() => Err(PumpError::Cancelled),
            () = tokio::time::sleep(Duration::from_millis(5)) => Ok(self.len()),
        }
    }

    async fn receive(
        &self,
        _error_queue: &Arc<dyn WorkQueue>,
        _batch: &CancellationToken,
        pipeline: &Arc<dyn Pipeline>,
    ) -> Result<()> {
        // A sibling unit may have taken the last item between peek and now;
        // an empty receive is not a failure.
        let Some(item) = self.pop() else {
            return Ok(());
        };

        match pipeline.process(item.clone()).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.redeliver(item);
                Err(error)
            },
        }
    }

    async fn purge(&self) -> Result<u64> {
        self.purges.fetch_add(1, Ordering::SeqCst);
        let mut items = self.items.lock().unwrap();
        let removed = items.len() as u64;
        items.clear();
        Ok(removed)
    }
}

/// Resolver handing out pre-built queues by address.
pub struct TestResolver {
    queues: Mutex<Vec<Arc<TestQueue>>>,
}

impl TestResolver {
    pub fn with(queues: Vec<Arc<TestQueue>>) -> Arc<Self> {
        Arc::new(Self { queues: Mutex::new(queues) })
    }
}

#[async_trait]
impl QueueResolver for TestResolver {
    async fn resolve(&self, address: &str) -> Result<Arc<dyn WorkQueue>> {
        self.queues
            .lock()
            .unwrap()
            .iter()
            .find(|queue| queue.address() == address)
            .cloned()
            .map(|queue| queue as Arc<dyn WorkQueue>)
            .ok_or_else(|| PumpError::configuration(format!("unknown queue address: {address}")))
    }
}

/// Strategy delegating straight to the queue's receive.
pub struct PassthroughStrategy;

#[async_trait]
impl ReceiveStrategy for PassthroughStrategy {
    async fn receive_message(
        &self,
        input: &Arc<dyn WorkQueue>,
        error_queue: &Arc<dyn WorkQueue>,
        batch: &CancellationToken,
        pipeline: &Arc<dyn Pipeline>,
    ) -> Result<()> {
        input.receive(error_queue, batch, pipeline).await
    }
}

/// Strategy that cancels its batch after the first successful receive,
/// exercising the stop-admitting-from-this-batch hook.
pub struct PoisonStrategy {
    pub receives: AtomicUsize,
}

impl PoisonStrategy {
    pub fn new() -> Self {
        Self { receives: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ReceiveStrategy for PoisonStrategy {
    async fn receive_message(
        &self,
        input: &Arc<dyn WorkQueue>,
        error_queue: &Arc<dyn WorkQueue>,
        batch: &CancellationToken,
        pipeline: &Arc<dyn Pipeline>,
    ) -> Result<()> {
        let result = input.receive(error_queue, batch, pipeline).await;
        if self.receives.fetch_add(1, Ordering::SeqCst) == 0 {
            batch.cancel();
        }
        result
    }
}

/// Factory returning a fixed strategy regardless of mode.
pub struct FixedStrategyFactory {
    strategy: Arc<dyn ReceiveStrategy>,
    pub requested_mode: Mutex<Option<TransactionMode>>,
}

impl FixedStrategyFactory {
    pub fn passthrough() -> Arc<Self> {
        Self::with(Arc::new(PassthroughStrategy))
    }

    pub fn with(strategy: Arc<dyn ReceiveStrategy>) -> Arc<Self> {
        Arc::new(Self { strategy, requested_mode: Mutex::new(None) })
    }
}

impl ReceiveStrategyFactory for FixedStrategyFactory {
    fn build(&self, mode: TransactionMode) -> Arc<dyn ReceiveStrategy> {
        *self.requested_mode.lock().unwrap() = Some(mode);
        Arc::clone(&self.strategy)
    }
}

/// Purge policy counting invocations with a fixed recommended delay.
pub struct TestPurger {
    pub inits: AtomicUsize,
    pub purge_passes: AtomicUsize,
    delay: Duration,
}

impl TestPurger {
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inits: AtomicUsize::new(0),
            purge_passes: AtomicUsize::new(0),
            delay,
        })
    }
}

#[async_trait]
impl ExpiryPurger for TestPurger {
    async fn init(&self, _input: &Arc<dyn WorkQueue>) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn purge(&self, _input: &Arc<dyn WorkQueue>, _cancel: &CancellationToken) -> Result<u64> {
        self.purge_passes.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    fn next_purge_delay(&self) -> Duration {
        self.delay
    }
}

/// Critical-error sink recording every escalation.
#[derive(Default)]
pub struct RecordingSink {
    pub raised: AtomicUsize,
    pub categories: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl CriticalErrorSink for RecordingSink {
    async fn raise(&self, category: &str, _error: &PumpError) {
        self.raised.fetch_add(1, Ordering::SeqCst);
        self.categories.lock().unwrap().push(category.to_string());
    }
}

/// Pipeline tracking concurrency and completions, with switchable failure.
pub struct TrackingPipeline {
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub processed: AtomicUsize,
    pub failing: AtomicBool,
    work_time: Duration,
}

impl TrackingPipeline {
    pub fn with_work_time(work_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            work_time,
        })
    }

    pub fn instant() -> Arc<Self> {
        Self::with_work_time(Duration::ZERO)
    }
}

#[async_trait]
impl Pipeline for TrackingPipeline {
    async fn process(&self, _item: QueueItem) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PumpError::pipeline("handler configured to fail"));
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.work_time.is_zero() {
            tokio::time::sleep(self.work_time).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Polls `condition` until it holds or `deadline` elapses.
pub async fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
