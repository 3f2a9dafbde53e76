//! 配置模块：从 YAML 与环境变量加载熔断、重试、分析与降级参数。
//!
//! Runtime configuration for the resilience core.
//!
//! Every section has serde defaults, so an empty document is valid.
//! Durations are written as integer milliseconds (`*_ms` keys).
//!
//! ```yaml
//! circuit_breaker:
//!   failure_threshold: 3
//!   open_timeout_ms: 30000
//! retry:
//!   max_attempts: 2
//! degradation:
//!   degrade_above: 20
//! ```
//!
//! Environment overrides (applied by [`ResilienceConfig::with_env_overrides`]):
//! - `RESILIENCE_BREAKER_FAILURE_THRESHOLD`
//! - `RESILIENCE_BREAKER_SUCCESS_THRESHOLD`
//! - `RESILIENCE_BREAKER_OPEN_TIMEOUT_MS`
//! - `RESILIENCE_ANALYTICS_CAPACITY`
//! - `RESILIENCE_RETRY_MAX_ATTEMPTS`
//! - `RESILIENCE_RETRY_BASE_DELAY_MS`
//! - `RESILIENCE_RETRY_MAX_DELAY_MS`
//! - `RESILIENCE_RETRY_JITTER`

use crate::resilience::analytics::AnalyticsConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::degradation::DegradationConfig;
use crate::resilience::retry::RetrySettings;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Defaults for breakers created on first use.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Default retry policy for calls that do not bring their own.
    pub retry: RetrySettings,
    pub analytics: AnalyticsConfig,
    pub degradation: DegradationConfig,
}

impl ResilienceConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid resilience config: {}", e),
                ErrorContext::new().with_source("config"),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read {}: {}", path.display(), e),
                ErrorContext::new().with_source("config"),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    /// Apply `RESILIENCE_*` environment variables on top of `self` and validate the result.
    ///
    /// Unparseable values are logged and ignored; parseable but out-of-range
    /// values fail with [`Error::Configuration`].
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let cb = &mut self.circuit_breaker;
        override_with(&lookup, "RESILIENCE_BREAKER_FAILURE_THRESHOLD", &mut cb.failure_threshold);
        override_with(&lookup, "RESILIENCE_BREAKER_SUCCESS_THRESHOLD", &mut cb.success_threshold);
        override_ms(&lookup, "RESILIENCE_BREAKER_OPEN_TIMEOUT_MS", &mut cb.open_timeout);

        override_with(&lookup, "RESILIENCE_ANALYTICS_CAPACITY", &mut self.analytics.capacity);

        let r = &mut self.retry;
        override_with(&lookup, "RESILIENCE_RETRY_MAX_ATTEMPTS", &mut r.max_attempts);
        override_ms(&lookup, "RESILIENCE_RETRY_BASE_DELAY_MS", &mut r.base_delay);
        override_ms(&lookup, "RESILIENCE_RETRY_MAX_DELAY_MS", &mut r.max_delay);
        override_with(&lookup, "RESILIENCE_RETRY_JITTER", &mut r.jitter);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.circuit_breaker.validate()?;
        if self.analytics.capacity < 1 {
            return Err(Error::configuration_with_context(
                "analytics capacity must be at least 1",
                ErrorContext::new().with_source("analytics"),
            ));
        }
        self.retry.to_policy().validate()?;
        self.degradation.validate()
    }
}

fn override_with<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

fn override_ms(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration) {
    let mut ms = slot.as_millis() as u64;
    override_with(lookup, key, &mut ms);
    *slot = Duration::from_millis(ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_document_uses_defaults() {
        let cfg = ResilienceConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg, ResilienceConfig::default());
        assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
        assert_eq!(cfg.circuit_breaker.open_timeout, Duration::from_secs(60));
        assert_eq!(cfg.analytics.capacity, 1000);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
circuit_breaker:
  failure_threshold: 3
  open_timeout_ms: 1500
retry:
  max_attempts: 2
  base_delay_ms: 10
degradation:
  degrade_above: 20
"#;
        let cfg = ResilienceConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.circuit_breaker.failure_threshold, 3);
        assert_eq!(cfg.circuit_breaker.success_threshold, 2);
        assert_eq!(cfg.circuit_breaker.open_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(10));
        assert_eq!(cfg.degradation.degrade_above, 20.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ResilienceConfig::from_yaml_str("retry:\n  max_attempts: 0\n").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let err = ResilienceConfig::from_yaml_str("circuit_breaker:\n  failure_threshold: 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("thresholds"));

        assert!(ResilienceConfig::from_yaml_str("retry: [1, 2]").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RESILIENCE_BREAKER_FAILURE_THRESHOLD", "7"),
            ("RESILIENCE_BREAKER_OPEN_TIMEOUT_MS", "2500"),
            ("RESILIENCE_RETRY_JITTER", "0.1"),
            ("RESILIENCE_ANALYTICS_CAPACITY", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let cfg = ResilienceConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.circuit_breaker.failure_threshold, 7);
        assert_eq!(cfg.circuit_breaker.open_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.retry.jitter, 0.1);
        assert_eq!(cfg.analytics.capacity, 1000);
    }

    #[test]
    fn test_out_of_range_env_override_rejected() {
        for (key, value) in [
            ("RESILIENCE_BREAKER_SUCCESS_THRESHOLD", "0"),
            ("RESILIENCE_RETRY_JITTER", "5"),
            ("RESILIENCE_ANALYTICS_CAPACITY", "0"),
        ] {
            let err = ResilienceConfig::default()
                .with_overrides_from(|k| (k == key).then(|| value.to_string()))
                .unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }), "{key}={value}");
        }
    }

    #[test]
    fn test_yaml_round_trip_keeps_ms_keys() {
        let yaml = serde_yaml::to_string(&ResilienceConfig::default()).unwrap();
        assert!(yaml.contains("open_timeout_ms: 60000"));
        assert!(yaml.contains("report_window_ms"));
    }
}
