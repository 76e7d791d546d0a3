//! Circuit breaker tracking repeated failures over a time window.
//!
//! Unlike a request-gating breaker, this one never blocks work: the loops
//! keep retrying throughout. Its job is failure isolation and escalation,
//! deciding when an unbroken streak of failures has lasted long enough that
//! a human needs to know, and saying so exactly once per streak.
//!
//! # State Machine
//!
//! ```text
//! Healthy ──failure──▶ Degraded (streak armed, window running)
//! Degraded ──success──▶ Healthy (streak cleared)
//! Degraded ──failure after window──▶ Escalated (critical sink raised once)
//! Escalated ──success──▶ Healthy (a later streak may escalate again)
//! ```
//!
//! One instance guards the peek path and an independent one guards the
//! receive path, so an outage on one side cannot mask the other.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::{debug, error, info};

use crate::{clock::Clock, error::PumpError, queue::CriticalErrorSink};

/// Failure streak tracked by a breaker.
#[derive(Debug, Clone, Copy)]
struct StreakState {
    /// When the current uninterrupted failure streak began.
    failing_since: Option<Instant>,
    /// Whether the critical sink has been raised for this streak.
    escalated: bool,
}

/// Tracks repeated failures of one category and escalates once per streak
/// that outlasts the configured wait window.
///
/// `success` is synchronous and cheap; `failure` is async because raising
/// the critical sink may suspend. Both are safe to call concurrently from
/// arbitrarily many receive units sharing the instance: the escalation
/// decision is made under the state lock, so concurrent failures cannot
/// double-fire the sink for the same streak.
pub struct FailureCircuitBreaker {
    name: String,
    wait_time: Duration,
    clock: Arc<dyn Clock>,
    critical: Arc<dyn CriticalErrorSink>,
    state: Mutex<StreakState>,
}

impl FailureCircuitBreaker {
    /// Creates a breaker for the given failure category.
    pub fn new(
        name: impl Into<String>,
        wait_time: Duration,
        clock: Arc<dyn Clock>,
        critical: Arc<dyn CriticalErrorSink>,
    ) -> Self {
        Self {
            name: name.into(),
            wait_time,
            clock,
            critical,
            state: Mutex::new(StreakState { failing_since: None, escalated: false }),
        }
    }

    /// Failure category this breaker reports under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records a successful operation, clearing any failure streak.
    pub fn success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.failing_since.take().is_some() {
            let was_escalated = state.escalated;
            state.escalated = false;
            drop(state);

            info!(breaker = %self.name, recovered_from_escalation = was_escalated, "circuit breaker disarmed after success");
        }
    }

    /// Records a failed operation.
    ///
    /// Arms the streak on the first failure; raises the critical sink when a
    /// failure is observed after the wait window has elapsed without an
    /// intervening success. Later failures of the same streak are absorbed
    /// silently.
    pub async fn failure(&self, error: &PumpError) {
        let escalate = {
            let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = self.clock.now();

            let since = match state.failing_since {
                Some(since) => since,
                None => {
                    state.failing_since = Some(now);
                    debug!(breaker = %self.name, wait_secs = self.wait_time.as_secs(), "circuit breaker armed");
                    now
                },
            };

            if !state.escalated && now.duration_since(since) >= self.wait_time {
                state.escalated = true;
                true
            } else {
                false
            }
        };

        if escalate {
            error!(
                breaker = %self.name,
                error = %error,
                wait_secs = self.wait_time.as_secs(),
                "failures persisted past the wait window, raising critical error"
            );
            self.critical.raise(&self.name, error).await;
        }
    }

    /// Whether the current streak has escalated and not yet been resolved.
    pub fn is_escalated(&self) -> bool {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).escalated
    }
}

impl std::fmt::Debug for FailureCircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureCircuitBreaker")
            .field("name", &self.name)
            .field("wait_time", &self.wait_time)
            .finish_non_exhaustive()
    }
}
