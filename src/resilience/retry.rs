//! 重试执行器：指数退避 + 抖动，按错误分类决定是否重试。
//!
//! Retry executor.
//!
//! Runs a unit of work up to `max_attempts` times. Between attempts it sleeps
//! `min(max_delay, base_delay * 2^(i-1)) * (1 ± jitter * random())`, checking the
//! call's cancellation token and deadline before every attempt and every sleep.
//! Retry state is local to one call; the executor holds no shared mutable state.

use crate::category::ErrorCategory;
use crate::error::ErrorKind;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::context::CallContext;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Immutable retry configuration, cheap to clone and share across calls.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction in `0..=1` of the backoff that is randomised in either direction.
    pub jitter: f64,
    is_retryable: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish()
    }
}

/// Default classification: retry transient errors only.
pub fn retry_transient(err: &Error) -> bool {
    err.kind() == ErrorKind::Transient
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
            is_retryable: Arc::new(retry_transient),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the retry classification.
    pub fn with_retryable<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(f);
        self
    }

    /// Retry only errors of the given categories (and only if transient).
    pub fn retry_on_categories(self, categories: Vec<ErrorCategory>) -> Self {
        self.with_retryable(move |e| retry_transient(e) && categories.contains(&e.category()))
    }

    pub fn is_retryable(&self, err: &Error) -> bool {
        (self.is_retryable)(err)
    }

    pub fn validate(&self) -> Result<()> {
        let ctx = || ErrorContext::new().with_source("retry_policy");
        if self.max_attempts < 1 {
            return Err(Error::configuration_with_context(
                "max_attempts must be at least 1",
                ctx(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::configuration_with_context(
                "base_delay must not exceed max_delay",
                ctx(),
            ));
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::configuration_with_context(
                format!("jitter must be within 0..=1, got {}", self.jitter),
                ctx(),
            ));
        }
        Ok(())
    }

    /// Un-jittered delay after the `attempt`-th failure (1-indexed).
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay after the `attempt`-th failure for a given random sample `unit` in `0..=1`.
    ///
    /// `unit = 0.5` yields the un-jittered delay; the extremes yield `1 ± jitter`.
    pub fn delay_for(&self, attempt: u32, unit: f64) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        let unit = unit.clamp(0.0, 1.0);
        let factor = 1.0 + jitter * (2.0 * unit - 1.0);
        self.base_backoff(attempt).mul_f64(factor.max(0.0))
    }

    /// Jittered delay after the `attempt`-th failure.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay_for(attempt, rand::random::<f64>())
    }
}

/// Serializable retry defaults, turned into a [`RetryPolicy`] with the default classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "crate::config::duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "crate::config::duration_ms")]
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            max_attempts: p.max_attempts,
            base_delay: p.base_delay,
            max_delay: p.max_delay,
            jitter: p.jitter,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_jitter(self.jitter)
    }
}

/// What happened inside one retried call, successful or not.
#[derive(Debug, Clone, Default)]
pub struct RetryReport {
    /// Attempts that actually invoked the unit of work.
    pub attempts: u32,
    /// Backoff sleeps taken, in order.
    pub delays: Vec<Duration>,
    /// Category and message of the most recent failed attempt.
    pub last_failure: Option<(ErrorCategory, String)>,
}

impl RetryReport {
    pub fn had_failure(&self) -> bool {
        self.last_failure.is_some()
    }
}

pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub report: RetryReport,
}

/// Runs a unit of work under a [`RetryPolicy`], optionally gating every attempt
/// through a circuit breaker.
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            breaker: None,
        }
    }

    /// Admit each attempt through `breaker` and report its outcome there.
    ///
    /// The outcome is recorded after the attempt timeout applied, so timeouts
    /// count as breaker failures. Cancelled or abandoned attempts are released uncounted.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` with retries, returning only the final outcome.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(ctx, op).await.result
    }

    /// Run `op` with retries and report attempt details alongside the outcome.
    ///
    /// Terminal outcomes:
    /// - `Cancelled` when the call's token fires
    /// - `CircuitOpen` when a breaker rejects before any attempt ran
    /// - `Final { retryable: false }` when the classification refuses a retry
    /// - `Final { retryable: true }` when attempts or the deadline ran out
    pub async fn run<T, F, Fut>(&self, ctx: &CallContext, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut report = RetryReport::default();
        let mut last_err: Option<Error> = None;

        let result = loop {
            if let Err(e) = ctx.check() {
                break Err(Self::abort(e, report.attempts));
            }

            let err = match self.attempt(ctx, &mut op, &mut report).await {
                Ok(v) => break Ok(v),
                Err(e) => e,
            };

            if err.is_cancelled() {
                break Err(err);
            }
            if let Error::CircuitOpen { .. } = err {
                break Err(match last_err.take() {
                    Some(prev) => Error::Final {
                        source: Box::new(prev),
                        retryable: true,
                        attempts: report.attempts,
                    },
                    None => err,
                });
            }

            report.last_failure = Some((err.category(), err.to_string()));

            if ctx.deadline_exceeded() {
                break Err(Error::Final {
                    source: Box::new(ctx.deadline_error()),
                    retryable: true,
                    attempts: report.attempts,
                });
            }
            if !self.policy.is_retryable(&err) {
                debug!(error = %err, "error is not retryable");
                break Err(Error::Final {
                    source: Box::new(err),
                    retryable: false,
                    attempts: report.attempts,
                });
            }
            if report.attempts >= max_attempts {
                warn!(attempts = report.attempts, error = %err, "retries exhausted");
                break Err(Error::Final {
                    source: Box::new(err),
                    retryable: true,
                    attempts: report.attempts,
                });
            }

            let delay = self.policy.backoff(report.attempts);
            warn!(
                attempt = report.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            last_err = Some(err);

            if let Err(e) = ctx.sleep(delay).await {
                break Err(Self::abort(e, report.attempts));
            }
            report.delays.push(delay);
        };

        RetryOutcome { result, report }
    }

    async fn attempt<T, F, Fut>(
        &self,
        ctx: &CallContext,
        op: &mut F,
        report: &mut RetryReport,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // A rejection never touches the dependency and does not count as an attempt.
        // The permit is held across the await, so dropping this future frees its slot.
        let permit = match &self.breaker {
            Some(b) => Some(b.try_acquire()?),
            None => None,
        };

        report.attempts += 1;
        debug!(attempt = report.attempts, "attempt starting");
        let res = ctx.run(op()).await;

        if let Some(permit) = permit {
            match &res {
                Ok(_) => permit.record_success(),
                Err(e) if e.is_cancelled() => permit.release(),
                Err(_) => permit.record_failure(),
            }
        }
        res
    }

    // Cancellation passes through; a deadline is reported as the reason the call stopped,
    // superseding whatever failed before it.
    fn abort(e: Error, attempts: u32) -> Error {
        if e.is_cancelled() {
            return e;
        }
        Error::Final {
            source: Box::new(e),
            retryable: true,
            attempts,
        }
    }
}
