//! Rate-adaptive gateway in front of the remote ledger endpoint.
//!
//! Every remote call goes through [`Gateway::call`], which
//! - waits for one of `max_in_flight` slots (FIFO),
//! - sleeps the shared adaptive delay,
//! - runs the call under a hard timeout,
//! - retries retryable failures with exponential backoff.
//!
//! One gateway is shared by every job in the process since the endpoint's
//! rate limit is global, so it is passed around as `Arc<Gateway>`.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::ledger::{LedgerClient, LedgerError};

/// Classification of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Retryable(LedgerError),
    Fatal(LedgerError),
}

impl<T> From<Result<T, LedgerError>> for Attempt<T> {
    fn from(result: Result<T, LedgerError>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(err) if err.is_retryable() => Attempt::Retryable(err),
            Err(err) => Attempt::Fatal(err),
        }
    }
}

/// Per-call retry budget and timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Retries after the first attempt.
    pub retries: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub max_in_flight: usize,
    pub call_options: CallOptions,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub delay_step: Duration,
    pub max_delay: Duration,
    /// Consecutive successes needed before the delay steps down.
    pub decay_after: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            call_options: CallOptions {
                retries: 3,
                timeout: Duration::from_secs(30),
            },
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            delay_step: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            decay_after: 5,
        }
    }
}

impl GatewayConfig {
    /// Backoff before retry number `attempt`: base * 2^(attempt - 1), capped.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Wait before retry `attempt`. A server hint raises it, but never past
    /// `max_backoff`.
    pub fn retry_wait(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let backoff = self.backoff_for_attempt(attempt);
        match retry_after_ms {
            Some(ms) => backoff.max(Duration::from_millis(ms).min(self.max_backoff)),
            None => backoff,
        }
    }
}

/// Delay applied before every dispatch, driven by rate-limit signals.
///
/// Doubles on each rate limit (starting at `step`, capped at `max`) and
/// steps down by `step` after `decay_after` consecutive successes.
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    current: Duration,
    step: Duration,
    max: Duration,
    decay_after: u32,
    streak: u32,
}

impl AdaptiveDelay {
    pub fn new(step: Duration, max: Duration, decay_after: u32) -> Self {
        Self {
            current: Duration::ZERO,
            step: step.max(Duration::from_millis(1)),
            max,
            decay_after: decay_after.max(1),
            streak: 0,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn on_rate_limit(&mut self) {
        self.streak = 0;
        let next = if self.current.is_zero() {
            self.step
        } else {
            self.current.saturating_mul(2)
        };
        self.current = next.min(self.max);
    }

    pub fn on_success(&mut self) {
        if self.current.is_zero() {
            return;
        }
        self.streak += 1;
        if self.streak >= self.decay_after {
            self.streak = 0;
            self.current = self.current.saturating_sub(self.step);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub calls: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub failures: u64,
}

pub struct Gateway {
    config: GatewayConfig,
    permits: Semaphore,
    delay: Mutex<AdaptiveDelay>,
    fee: Mutex<Option<u64>>,
    calls: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    failures: AtomicU64,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let delay = AdaptiveDelay::new(config.delay_step, config.max_delay, config.decay_after);
        Self {
            permits: Semaphore::new(config.max_in_flight.max(1)),
            delay: Mutex::new(delay),
            fee: Mutex::new(None),
            calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn default_options(&self) -> CallOptions {
        self.config.call_options
    }

    /// Delay currently applied before each dispatch.
    pub fn current_delay(&self) -> Duration {
        self.delay.lock().unwrap_or_else(|e| e.into_inner()).current()
    }

    /// Per-item fee from the last successful [`Gateway::refresh_fee`].
    pub fn cached_fee(&self) -> Option<u64> {
        *self.fee.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            calls: self.calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Run `op` with bounded concurrency, timeout and retries.
    ///
    /// `op` is invoked once per attempt. Retryable failures are retried up to
    /// `opts.retries` times; fatal ones return [`GatewayError::Rejected`]
    /// immediately.
    pub async fn call<T, F, Fut>(&self, mut op: F, opts: CallOptions) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = {
                let Ok(_permit) = self.permits.acquire().await else {
                    return Err(GatewayError::Rejected(LedgerError::Connection(
                        "gateway pool closed".into(),
                    )));
                };
                let delay = self.current_delay();
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                match timeout(opts.timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(LedgerError::Timeout),
                }
            };

            match Attempt::from(result) {
                Attempt::Success(value) => {
                    self.with_delay(AdaptiveDelay::on_success);
                    return Ok(value);
                }
                Attempt::Fatal(cause) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(GatewayError::Rejected(cause));
                }
                Attempt::Retryable(cause) => {
                    let mut wait = self.config.backoff_for_attempt(attempt);
                    if let LedgerError::RateLimited { retry_after_ms } = &cause {
                        self.rate_limited.fetch_add(1, Ordering::Relaxed);
                        self.with_delay(AdaptiveDelay::on_rate_limit);
                        wait = self.config.retry_wait(attempt, *retry_after_ms);
                        debug!(delay_ms = self.current_delay().as_millis() as u64, "rate limited, raising delay");
                    }
                    if attempt > opts.retries {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        return Err(GatewayError::RemoteFailure {
                            attempts: attempt,
                            cause,
                        });
                    }
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt,
                        max = opts.retries,
                        wait_ms = wait.as_millis() as u64,
                        "retrying remote call: {cause}"
                    );
                    sleep(wait).await;
                }
            }
        }
    }

    /// Sample the endpoint's per-item fee and cache it for the planner.
    pub async fn refresh_fee<C: LedgerClient>(&self, client: &C) -> Result<u64, GatewayError> {
        let fee = self
            .call(|| client.estimate_fee(), self.default_options())
            .await?;
        *self.fee.lock().unwrap_or_else(|e| e.into_inner()) = Some(fee);
        Ok(fee)
    }

    fn with_delay(&self, f: impl FnOnce(&mut AdaptiveDelay)) {
        let mut delay = self.delay.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *delay);
    }
}
