//! 弹性模式模块：重试、熔断、回退链、降级控制与错误分析。
//!
//! # Resilience Primitives
//!
//! Building blocks composed by [`crate::orchestrator::ResilienceOrchestrator`],
//! each usable on its own.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`retry`] | Bounded retries with capped exponential backoff and jitter |
//! | [`circuit_breaker`] | Per-resource failure isolation (closed / open / half-open) |
//! | [`fallback`] | Ordered chain of alternative strategies |
//! | [`degradation`] | Quality level driven by the observed error rate |
//! | [`analytics`] | Bounded error history with rate queries |
//! | [`context`] | Cancellation and deadlines for one logical call |
//! | [`clock`] | Injectable time source |
//!
//! ```rust
//! use ai_resilience::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "sd-backend",
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(3)
//!         .with_open_timeout(Duration::from_secs(30)),
//! );
//! assert!(breaker.allow());
//! breaker.record_failure();
//! ```

pub mod analytics;
pub mod circuit_breaker;
pub mod clock;
pub mod context;
pub mod degradation;
pub mod fallback;
pub mod retry;
