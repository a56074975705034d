//! Retry and circuit-breaker decorator for [`LlmProvider`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::llm_service::{LlmError, LlmProvider};
use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// `base * 2^attempt`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl From<&LlmConfig> for RetryPolicy {
    fn from(cfg: &LlmConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms.max(cfg.base_backoff_ms)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Id of the half-open trial currently admitted, if any.
    trial: Option<u64>,
    next_trial_id: u64,
}

/// Opens after `failure_threshold` consecutive failed calls, rejects calls
/// for `cooldown`, then admits a single trial call.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

/// Admission to call the provider.
///
/// A half-open trial holds the breaker's only trial slot. Dropping the
/// permit without an outcome (the caller's future was cancelled) frees the
/// slot so the next caller can run the trial instead.
#[derive(Debug)]
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl CallPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.trial {
            self.breaker.abandon_trial(id);
        }
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial: None,
                next_trial_id: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// `Err(remaining)` while the circuit rejects calls.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, Duration> {
        let mut inner = self.inner.lock();
        let admit_trial = match inner.state {
            CircuitState::Closed => {
                return Ok(CallPermit {
                    breaker: self,
                    trial: None,
                })
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed < self.cooldown {
                    return Err(self.cooldown - elapsed);
                }
                info!("Model provider circuit half-open, admitting trial call");
                inner.state = CircuitState::HalfOpen;
                true
            }
            CircuitState::HalfOpen => inner.trial.is_none(),
        };

        if !admit_trial {
            return Err(Duration::ZERO);
        }
        let id = inner.next_trial_id;
        inner.next_trial_id += 1;
        inner.trial = Some(id);
        Ok(CallPermit {
            breaker: self,
            trial: Some(id),
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!("Model provider circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.trial = None;

        let trip = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if trip {
            if inner.state != CircuitState::Open {
                warn!(
                    "Model provider circuit open after {} consecutive failures (cooldown {:?})",
                    inner.consecutive_failures, self.cooldown
                );
            }
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Frees the trial slot if trial `id` ended without an outcome.
    fn abandon_trial(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial == Some(id) {
            warn!("Model provider trial call cancelled, trial slot released");
            inner.trial = None;
        }
    }
}

/// Wraps a provider with bounded retries and a circuit breaker.
pub struct ReliableProvider<P> {
    inner: P,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy, breaker: CircuitBreaker) -> Self {
        Self {
            inner,
            policy,
            breaker,
        }
    }

    pub fn from_config(inner: P, cfg: &LlmConfig) -> Self {
        Self::new(
            inner,
            RetryPolicy::from(cfg),
            CircuitBreaker::new(
                cfg.breaker_failure_threshold,
                Duration::from_secs(cfg.breaker_cooldown_seconds),
            ),
        )
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let _permit = self
            .breaker
            .try_acquire()
            .map_err(|retry_in| LlmError::CircuitOpen { retry_in })?;

        let mut attempt = 0;
        loop {
            match self.inner.complete(messages).await {
                Ok(text) => {
                    self.breaker.record_success();
                    return Ok(text);
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    attempt += 1;
                    warn!(
                        "Model call failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.policy.max_retries + 1,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    // 4xx: provider is reachable
                    if err.is_retryable() {
                        self.breaker.record_failure();
                    } else {
                        self.breaker.record_success();
                    }
                    return Err(err);
                }
            }
        }
    }
}
