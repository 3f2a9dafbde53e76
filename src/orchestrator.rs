//! 弹性编排：组合熔断、重试、回退链、降级与错误分析，对外提供 execute_with_resilience。
//!
//! # Resilience Orchestrator
//!
//! [`ResilienceRegistry`] owns the process-wide mutable state: one breaker per
//! resource name, the analytics buffer and the degradation controller. It is
//! built once and shared by reference; there are no module-level singletons.
//!
//! [`ResilienceOrchestrator::execute_with_resilience`] runs one logical call:
//!
//! 1. every attempt of the primary is admitted through the named breaker and
//!    reports its outcome back to it
//! 2. failed attempts are retried under the call's [`RetryPolicy`], if any
//! 3. once the primary is exhausted (or the breaker rejected it) the
//!    [`FallbackChain`] runs in declaration order
//! 4. the terminal outcome is recorded to analytics, the degradation level is
//!    re-evaluated and one [`AuditEvent`] is emitted
//!
//! ```rust,no_run
//! use ai_resilience::{CallOptions, Error, ResilienceOrchestrator, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn demo() -> ai_resilience::Result<()> {
//! let orchestrator = ResilienceOrchestrator::default();
//! let options = CallOptions::new()
//!     .with_circuit_breaker("sd-backend")
//!     .with_retry(RetryPolicy::new().with_base_delay(Duration::from_millis(50)))
//!     .with_timeout(Duration::from_secs(30));
//! let image: Vec<u8> = orchestrator
//!     .execute_with_resilience(|| async { Err::<Vec<u8>, _>(Error::transient("connection reset")) }, options)
//!     .await?;
//! # let _ = image;
//! # Ok(())
//! # }
//! ```

use crate::audit::{noop_sink, AuditEvent, AuditSink, CallOutcome};
use crate::category::ErrorCategory;
use crate::config::ResilienceConfig;
use crate::resilience::analytics::{AnalyticsReport, ErrorAnalytics};
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
use crate::resilience::clock::{system_clock, Clock};
use crate::resilience::context::CallContext;
use crate::resilience::degradation::{DegradationController, DegradationLevel};
use crate::resilience::fallback::FallbackChain;
use crate::resilience::retry::{RetryExecutor, RetryOutcome, RetryPolicy, RetrySettings};
use crate::{Error, Result};
use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UNNAMED_RESOURCE: &str = "unnamed";

/// Process-wide resilience state, shared by every orchestrated call.
pub struct ResilienceRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    breaker_defaults: ArcSwap<CircuitBreakerConfig>,
    retry_defaults: ArcSwap<RetrySettings>,
    analytics: ErrorAnalytics,
    degradation: DegradationController,
    clock: Arc<dyn Clock>,
}

impl ResilienceRegistry {
    /// Build the registry from a validated `config`.
    pub fn new(config: &ResilienceConfig) -> Result<Self> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: &ResilienceConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: &ResilienceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            breaker_defaults: ArcSwap::from_pointee(config.circuit_breaker.clone()),
            retry_defaults: ArcSwap::from_pointee(config.retry.clone()),
            analytics: ErrorAnalytics::with_clock(config.analytics.clone(), clock.clone()),
            degradation: DegradationController::with_clock(
                config.degradation.clone(),
                clock.clone(),
            ),
            clock,
        }
    }

    /// The single shared breaker for `name`, created with the current defaults on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breaker_with_config(name, || (*self.breaker_defaults.load_full()).clone())
    }

    /// Like [`breaker`](Self::breaker), but a newly created breaker uses `cfg()`.
    /// An existing breaker is returned unchanged.
    pub fn breaker_with_config(
        &self,
        name: &str,
        cfg: impl FnOnce() -> CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(b) = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return b.clone();
        }
        let mut map = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        map.entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "creating circuit breaker");
                Arc::new(CircuitBreaker::with_clock(name, cfg(), self.clock.clone()))
            })
            .clone()
    }

    pub fn get_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn breaker_states(&self) -> BTreeMap<String, CircuitState> {
        let map = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        map.iter().map(|(k, b)| (k.clone(), b.state())).collect()
    }

    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers: Vec<_> = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        let mut snaps: Vec<_> = breakers.iter().map(|b| b.snapshot()).collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }

    pub fn breaker_defaults(&self) -> Arc<CircuitBreakerConfig> {
        self.breaker_defaults.load_full()
    }

    /// Swap the defaults for breakers created from now on.
    pub fn set_breaker_defaults(&self, cfg: CircuitBreakerConfig) -> Result<()> {
        cfg.validate()?;
        self.breaker_defaults.store(Arc::new(cfg));
        Ok(())
    }

    pub fn retry_defaults(&self) -> Arc<RetrySettings> {
        self.retry_defaults.load_full()
    }

    pub fn set_retry_defaults(&self, settings: RetrySettings) -> Result<()> {
        settings.to_policy().validate()?;
        self.retry_defaults.store(Arc::new(settings));
        Ok(())
    }

    pub fn analytics(&self) -> &ErrorAnalytics {
        &self.analytics
    }

    pub fn degradation(&self) -> &DegradationController {
        &self.degradation
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::build(&ResilienceConfig::default(), system_clock())
    }
}

/// Per-call configuration. Cheap to build; policies and chains are shared.
pub struct CallOptions<T> {
    circuit_breaker: Option<String>,
    resource: Option<String>,
    retry: Option<RetryPolicy>,
    fallback: Option<FallbackChain<T>>,
    timeout: Option<Duration>,
    attempt_timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl<T> Default for CallOptions<T> {
    fn default() -> Self {
        Self {
            circuit_breaker: None,
            resource: None,
            retry: None,
            fallback: None,
            timeout: None,
            attempt_timeout: None,
            cancel: None,
        }
    }
}

impl<T> CallOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate the primary through the registry's breaker named `name`.
    pub fn with_circuit_breaker(mut self, name: impl Into<String>) -> Self {
        self.circuit_breaker = Some(name.into());
        self
    }

    /// Resource name for analytics and audit when no breaker is used.
    pub fn with_resource(mut self, name: impl Into<String>) -> Self {
        self.resource = Some(name.into());
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_fallback(mut self, chain: FallbackChain<T>) -> Self {
        self.fallback = Some(chain);
        self
    }

    /// Budget for the whole call, fallbacks included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn resource_name(&self) -> &str {
        self.circuit_breaker
            .as_deref()
            .or(self.resource.as_deref())
            .unwrap_or(UNNAMED_RESOURCE)
    }

    fn context(&self) -> CallContext {
        let mut ctx = CallContext::new();
        if let Some(token) = &self.cancel {
            ctx = ctx.with_cancel(token.clone());
        }
        if let Some(t) = self.timeout {
            ctx = ctx.with_timeout(t);
        }
        if let Some(t) = self.attempt_timeout {
            ctx = ctx.with_attempt_timeout(t);
        }
        ctx
    }
}

/// Read-only dashboard snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub error_rate_per_minute: f64,
    pub recovery_rate: f64,
    pub breaker_states: BTreeMap<String, CircuitState>,
    pub current_degradation_level: DegradationLevel,
}

pub struct ResilienceOrchestrator {
    registry: Arc<ResilienceRegistry>,
    sink: Arc<dyn AuditSink>,
}

impl Default for ResilienceOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(ResilienceRegistry::default()))
    }
}

impl ResilienceOrchestrator {
    pub fn new(registry: Arc<ResilienceRegistry>) -> Self {
        Self {
            registry,
            sink: noop_sink(),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(ResilienceRegistry::new(config)?)))
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &Arc<ResilienceRegistry> {
        &self.registry
    }

    /// Retry policy built from the configured defaults.
    pub fn default_retry_policy(&self) -> RetryPolicy {
        self.registry.retry_defaults().to_policy()
    }

    pub fn current_degradation_level(&self) -> DegradationLevel {
        self.registry.degradation.current_level()
    }

    /// Rewrite request parameters for the current degradation level.
    pub fn adjust_parameters(&self, params: &Value) -> Value {
        self.registry.degradation.adjust_parameters(params)
    }

    pub fn analytics_report(&self) -> AnalyticsReport {
        self.registry.analytics.report()
    }

    pub fn system_health(&self) -> SystemHealth {
        let window = self.registry.degradation.config().window;
        SystemHealth {
            error_rate_per_minute: self.registry.analytics.error_rate_per_minute(window),
            recovery_rate: self.registry.analytics.recovery_rate(),
            breaker_states: self.registry.breaker_states(),
            current_degradation_level: self.registry.degradation.current_level(),
        }
    }

    /// Run `op` under the breaker, retry policy, fallback chain and deadline in `options`.
    ///
    /// Returns the primary's or a fallback's value, `CircuitOpen` when the breaker
    /// rejected and no chain is configured, `ChainExhausted` when every fallback
    /// failed, `Final` when the primary failed and there is no chain, or
    /// `Cancelled`.
    pub async fn execute_with_resilience<T, F, Fut>(
        &self,
        op: F,
        options: CallOptions<T>,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let call_id = Uuid::new_v4();
        let started = Instant::now();
        let resource = options.resource_name().to_string();
        let ctx = options.context();

        let mut exec =
            RetryExecutor::new(options.retry.clone().unwrap_or_else(RetryPolicy::no_retry));
        if let Some(name) = &options.circuit_breaker {
            exec = exec.with_circuit_breaker(self.registry.breaker(name));
        }

        let RetryOutcome { result, report } = exec.run(&ctx, op).await;
        let mut event = AuditEvent::new(call_id, resource.as_str(), CallOutcome::Success)
            .with_attempts(report.attempts);

        let result = match result {
            Ok(value) => {
                if let Some((category, message)) = &report.last_failure {
                    self.record(*category, &resource, message, true);
                    event.outcome = CallOutcome::Recovered;
                }
                Ok(value)
            }
            Err(err) if err.is_cancelled() => {
                // Attempts that already failed were seen by the breaker; analytics gets them too.
                if let Some((category, message)) = &report.last_failure {
                    self.record(*category, &resource, message, false);
                    event = event.with_error(*category, message.clone());
                }
                event.outcome = CallOutcome::Cancelled;
                Err(err)
            }
            Err(err) => match &options.fallback {
                Some(chain) if ctx.check().is_ok() => {
                    self.run_fallback(chain, &ctx, err, &resource, &mut event).await
                }
                _ => {
                    self.record(err.category(), &resource, &err.to_string(), false);
                    event.outcome = CallOutcome::Failed;
                    event = event.with_error(err.category(), err.to_string());
                    Err(err)
                }
            },
        };

        if event.outcome != CallOutcome::Cancelled || event.error_category.is_some() {
            self.registry.degradation.evaluate(&self.registry.analytics);
        }
        self.finish(event, started).await;
        result
    }

    async fn run_fallback<T: Send + 'static>(
        &self,
        chain: &FallbackChain<T>,
        ctx: &CallContext,
        primary_err: Error,
        resource: &str,
        event: &mut AuditEvent,
    ) -> Result<T> {
        let category = primary_err.category();
        debug!(
            resource,
            error = %primary_err,
            fallbacks = chain.len(),
            "primary exhausted, running fallback chain"
        );
        match chain.execute(ctx).await {
            Ok(success) => {
                self.record(category, resource, &primary_err.to_string(), true);
                event.outcome = CallOutcome::Fallback;
                event.fallback_entry = Some(success.entry);
                Ok(success.value)
            }
            Err(e) if e.is_cancelled() => {
                self.record(category, resource, &primary_err.to_string(), false);
                event.outcome = CallOutcome::Cancelled;
                event.error_category = Some(category);
                event.error = Some(primary_err.to_string());
                Err(e)
            }
            Err(chain_err) => {
                let category = if chain_err.is_timeout() || ctx.deadline_exceeded() {
                    ErrorCategory::Timeout
                } else {
                    category
                };
                self.record(category, resource, &chain_err.to_string(), false);
                event.outcome = CallOutcome::Failed;
                event.error_category = Some(category);
                event.error = Some(chain_err.to_string());
                Err(chain_err)
            }
        }
    }

    fn record(&self, category: ErrorCategory, resource: &str, message: &str, recovered: bool) {
        self.registry
            .analytics
            .record_now(category, resource, message, recovered);
    }

    async fn finish(&self, event: AuditEvent, started: Instant) {
        let event = event
            .with_duration_ms(started.elapsed().as_millis() as u64)
            .with_degradation_level(self.registry.degradation.current_level());

        match event.outcome {
            CallOutcome::Success => debug!(
                call_id = %event.call_id,
                resource = %event.resource_name,
                duration_ms = event.duration_ms,
                "call succeeded"
            ),
            CallOutcome::Recovered | CallOutcome::Fallback => info!(
                call_id = %event.call_id,
                resource = %event.resource_name,
                attempts = event.attempts,
                fallback = event.fallback_entry.as_deref().unwrap_or("-"),
                "call recovered"
            ),
            CallOutcome::Failed => warn!(
                call_id = %event.call_id,
                resource = %event.resource_name,
                attempts = event.attempts,
                error = event.error.as_deref().unwrap_or("-"),
                "call failed"
            ),
            CallOutcome::Cancelled => debug!(
                call_id = %event.call_id,
                resource = %event.resource_name,
                "call cancelled"
            ),
        }

        if let Err(e) = self.sink.emit(event).await {
            warn!(error = %e, "audit sink failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::resilience::clock::ManualClock;
    use crate::resilience::degradation::DegradationConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(n: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(n)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
    }

    #[test]
    fn test_registry_returns_one_breaker_per_name() {
        let reg = ResilienceRegistry::default();
        let a = reg.breaker("sd");
        let b = reg.breaker("sd");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &reg.breaker("llm")));
        assert_eq!(reg.breaker_states().len(), 2);
        assert!(reg.get_breaker("missing").is_none());
    }

    #[test]
    fn test_breaker_defaults_swap_affects_new_breakers_only() {
        let reg = ResilienceRegistry::default();
        let old = reg.breaker("old");
        reg.set_breaker_defaults(CircuitBreakerConfig::new().with_failure_threshold(1))
            .unwrap();
        assert!(reg
            .set_breaker_defaults(CircuitBreakerConfig::new().with_success_threshold(0))
            .is_err());
        let new = reg.breaker("new");
        assert_eq!(old.config().failure_threshold, 5);
        assert_eq!(new.config().failure_threshold, 1);

        let custom = reg.breaker_with_config("custom", || {
            CircuitBreakerConfig::new().with_failure_threshold(9)
        });
        assert_eq!(custom.config().failure_threshold, 9);
    }

    #[tokio::test]
    async fn test_first_try_success_records_nothing() {
        let sink = Arc::new(InMemoryAuditSink::new(10));
        let orch = ResilienceOrchestrator::default().with_audit_sink(sink.clone());
        let v = orch
            .execute_with_resilience(
                || async { Ok::<_, Error>(42) },
                CallOptions::new().with_circuit_breaker("sd"),
            )
            .await
            .unwrap();
        assert_eq!(v, 42);
        assert!(orch.registry().analytics().is_empty());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, CallOutcome::Success);
        assert_eq!(events[0].attempts, 1);
        assert_eq!(events[0].resource_name, "sd");
    }

    #[tokio::test]
    async fn test_retry_recovery_is_recorded() {
        let orch = ResilienceOrchestrator::default();
        let calls = AtomicU32::new(0);
        let v = orch
            .execute_with_resilience(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(Error::transient("connection reset"))
                        } else {
                            Ok("ok")
                        }
                    }
                },
                CallOptions::new().with_resource("llm").with_retry(fast_retry(3)),
            )
            .await
            .unwrap();
        assert_eq!(v, "ok");

        let recent = orch.registry().analytics().recent(1);
        assert_eq!(recent.len(), 1);
        assert!(recent[0].recovered);
        assert_eq!(recent[0].category, ErrorCategory::Network);
        assert_eq!(recent[0].resource_name, "llm");
    }

    #[tokio::test]
    async fn test_open_breaker_without_fallback_fails_fast() {
        let orch = ResilienceOrchestrator::default();
        let breaker = orch.registry().breaker_with_config("sd", || {
            CircuitBreakerConfig::new().with_failure_threshold(1)
        });
        breaker.record_failure();

        let calls = AtomicU32::new(0);
        let err = orch
            .execute_with_resilience(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, Error>(()) }
                },
                CallOptions::new().with_circuit_breaker("sd"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            orch.registry().analytics().count_by_category(ErrorCategory::CircuitOpen),
            1
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_final_and_not_retried() {
        let orch = ResilienceOrchestrator::default();
        let calls = AtomicU32::new(0);
        let err = orch
            .execute_with_resilience(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(Error::permanent("invalid prompt")) }
                },
                CallOptions::new().with_retry(fast_retry(5)),
            )
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::Final { retryable: false, attempts: 1, .. }));
        assert_eq!(
            orch.registry().analytics().count_by_category(ErrorCategory::Validation),
            1
        );
    }

    #[tokio::test]
    async fn test_cancelled_call_is_not_recorded() {
        let sink = Arc::new(InMemoryAuditSink::new(10));
        let orch = ResilienceOrchestrator::default().with_audit_sink(sink.clone());
        let token = CancellationToken::new();
        token.cancel();
        let err = orch
            .execute_with_resilience(
                || async { Ok::<_, Error>(1) },
                CallOptions::new().with_cancel(token),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(orch.registry().analytics().is_empty());
        assert_eq!(sink.events()[0].outcome, CallOutcome::Cancelled);
    }

    #[test]
    fn test_registry_rejects_invalid_config() {
        let mut config = ResilienceConfig::default();
        config.circuit_breaker.success_threshold = 0;
        assert!(matches!(
            ResilienceRegistry::new(&config),
            Err(Error::Configuration { .. })
        ));

        config.circuit_breaker.success_threshold = 2;
        config.retry.jitter = 5.0;
        assert!(ResilienceOrchestrator::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_cancel_after_failed_attempt_is_recorded() {
        let sink = Arc::new(InMemoryAuditSink::new(10));
        let orch = ResilienceOrchestrator::default().with_audit_sink(sink.clone());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = orch
            .execute_with_resilience(
                || async { Err::<(), _>(Error::transient("connection reset")) },
                CallOptions::new()
                    .with_circuit_breaker("sd")
                    .with_retry(
                        RetryPolicy::new()
                            .with_base_delay(Duration::from_secs(10))
                            .with_max_delay(Duration::from_secs(10)),
                    )
                    .with_cancel(token),
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let recent = orch.registry().analytics().recent(10);
        assert_eq!(recent.len(), 1);
        assert!(!recent[0].recovered);
        assert_eq!(recent[0].category, ErrorCategory::Network);
        assert_eq!(orch.registry().breaker("sd").snapshot().consecutive_failures, 1);

        let events = sink.events();
        assert_eq!(events[0].outcome, CallOutcome::Cancelled);
        assert_eq!(events[0].error_category, Some(ErrorCategory::Network));
    }

    #[tokio::test]
    async fn test_failures_drive_degradation() {
        let clock = Arc::new(ManualClock::new());
        let config = ResilienceConfig {
            degradation: DegradationConfig {
                degrade_above: 2.0,
                restore_below: 1.0,
                min_dwell: Duration::ZERO,
                ..DegradationConfig::default()
            },
            ..ResilienceConfig::default()
        };
        let orch = ResilienceOrchestrator::new(Arc::new(
            ResilienceRegistry::with_clock(&config, clock).unwrap(),
        ));

        for _ in 0..3 {
            let _ = orch
                .execute_with_resilience(
                    || async { Err::<(), _>(Error::transient("connection refused")) },
                    CallOptions::new().with_resource("sd"),
                )
                .await;
        }
        assert!(orch.current_degradation_level() < DegradationLevel::Full);

        let health = orch.system_health();
        assert!((health.error_rate_per_minute - 3.0).abs() < 1e-9);
        assert_eq!(health.recovery_rate, 0.0);
        assert_eq!(health.current_degradation_level, orch.current_degradation_level());
        let json = serde_json::to_value(&health).unwrap();
        assert!(json["current_degradation_level"].is_string());
    }
}
