//! # ai-resilience
//!
//! 弹性与容错核心：为任意可能失败的操作提供重试、熔断、回退链、优雅降级与错误分析。
//!
//! Resilience & fault-tolerance core for AI-Protocol workloads. Wraps arbitrary,
//! potentially failing async operations (backend requests, model invocations,
//! external processes) with retry, circuit breaking, fallback chains, graceful
//! degradation and error analytics.
//!
//! ## Core Philosophy
//!
//! - **Opaque work**: the core observes only success, failure and timing
//! - **Explicit state**: breakers and analytics live in a [`ResilienceRegistry`] you own
//! - **Configured, not hard-coded**: thresholds come from [`ResilienceConfig`]
//! - **Cancellable**: every attempt and backoff sleep honours the call's token and deadline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_resilience::{CallOptions, Error, FallbackChain, ResilienceOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> ai_resilience::Result<()> {
//!     let orchestrator = ResilienceOrchestrator::default();
//!     let fallback = FallbackChain::builder()
//!         .then("cached", || async { Ok::<_, Error>("cached answer".to_string()) })
//!         .build();
//!
//!     let options = CallOptions::new()
//!         .with_circuit_breaker("llm-backend")
//!         .with_retry(orchestrator.default_retry_policy())
//!         .with_fallback(fallback);
//!
//!     let answer = orchestrator
//!         .execute_with_resilience(|| async { Err(Error::transient("connection reset")) }, options)
//!         .await?;
//!     println!("{answer}");
//!     println!("{}", serde_json::to_string(&orchestrator.system_health()).unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`orchestrator`] | Registry, per-call options and `execute_with_resilience` |
//! | [`resilience`] | Retry, circuit breaker, fallback chain, degradation, analytics |
//! | [`audit`] | Structured per-call audit events and sinks |
//! | [`config`] | YAML and environment configuration |
//! | [`category`] | Error category taxonomy |
//! | [`error`] | Error type and context |

pub mod audit;
pub mod category;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod resilience;

pub use audit::{AuditEvent, AuditSink, CallOutcome};
pub use category::ErrorCategory;
pub use config::ResilienceConfig;
pub use error::{Error, ErrorContext, ErrorKind};
pub use orchestrator::{CallOptions, ResilienceOrchestrator, ResilienceRegistry, SystemHealth};
pub use resilience::circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use resilience::context::CallContext;
pub use resilience::degradation::{DegradationController, DegradationLevel};
pub use resilience::fallback::{FallbackChain, FallbackEntry};
pub use resilience::retry::{RetryExecutor, RetryPolicy};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
