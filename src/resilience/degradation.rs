//! 优雅降级：根据系统错误率逐级降低/恢复请求参数（分辨率、步数、并发、超时）。
//!
//! Graceful degradation controller.
//!
//! Tracks one process-wide [`DegradationLevel`]. When the recent error rate
//! rises above `degrade_above` the level drops one step; once it has stayed
//! below `restore_below` for `recovery_hold` it climbs back one step. Level
//! changes are spaced at least `min_dwell` apart.
//!
//! The controller never rejects calls. It only rewrites request parameters
//! through [`DegradationController::adjust_parameters`]; the caller decides
//! whether to apply them.

use crate::resilience::analytics::ErrorAnalytics;
use crate::resilience::clock::{system_clock, Clock};
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Service quality levels, ordered `Minimal < Low < Medium < High < Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Minimal,
    Low,
    Medium,
    High,
    Full,
}

impl DegradationLevel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Minimal => "minimal",
        }
    }

    /// One step down, saturating at `Minimal`.
    pub fn lower(self) -> Self {
        match self {
            Self::Full => Self::High,
            Self::High => Self::Medium,
            Self::Medium => Self::Low,
            Self::Low | Self::Minimal => Self::Minimal,
        }
    }

    /// One step up, saturating at `Full`.
    pub fn higher(self) -> Self {
        match self {
            Self::Minimal => Self::Low,
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Full => Self::Full,
        }
    }

    pub fn profile(&self) -> DegradationProfile {
        DegradationProfile::for_level(*self)
    }
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Concrete parameter overrides applied at one level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationProfile {
    pub resolution_scale: f64,
    pub steps_scale: f64,
    pub max_batch_size: Option<u64>,
    pub max_concurrency: Option<u64>,
    pub timeout_scale: f64,
}

impl DegradationProfile {
    pub fn for_level(level: DegradationLevel) -> Self {
        let (resolution_scale, steps_scale, max_batch_size, max_concurrency, timeout_scale) =
            match level {
                DegradationLevel::Full => (1.0, 1.0, None, None, 1.0),
                DegradationLevel::High => (0.875, 0.8, Some(4), None, 1.0),
                DegradationLevel::Medium => (0.75, 0.6, Some(2), Some(4), 0.8),
                DegradationLevel::Low => (0.5, 0.5, Some(1), Some(2), 0.7),
                DegradationLevel::Minimal => (0.5, 0.3, Some(1), Some(1), 0.5),
            };
        Self {
            resolution_scale,
            steps_scale,
            max_batch_size,
            max_concurrency,
            timeout_scale,
        }
    }

    /// Rewrite the well-known numeric keys of a JSON object; everything else passes through.
    ///
    /// - `width`/`height`: scaled, rounded down to a multiple of 8, kept within `64..=original`
    /// - `steps`: scaled, at least 1
    /// - `batch_size`, `max_concurrency`: capped
    /// - `timeout_ms`: scaled, at least 1
    pub fn apply(&self, params: &Value) -> Value {
        let Value::Object(map) = params else {
            return params.clone();
        };
        let mut out = map.clone();

        for key in ["width", "height"] {
            if let Some(v) = map.get(key).and_then(Value::as_u64) {
                let scaled = (v as f64 * self.resolution_scale) as u64;
                let snapped = (scaled / 8 * 8).max(64).min(v);
                out.insert(key.to_string(), Value::from(snapped));
            }
        }
        if let Some(v) = map.get("steps").and_then(Value::as_u64) {
            let scaled = ((v as f64 * self.steps_scale).round() as u64).max(1);
            out.insert("steps".to_string(), Value::from(scaled));
        }
        if let (Some(v), Some(cap)) = (map.get("batch_size").and_then(Value::as_u64), self.max_batch_size) {
            out.insert("batch_size".to_string(), Value::from(v.min(cap)));
        }
        if let (Some(v), Some(cap)) = (
            map.get("max_concurrency").and_then(Value::as_u64),
            self.max_concurrency,
        ) {
            out.insert("max_concurrency".to_string(), Value::from(v.min(cap)));
        }
        if let Some(v) = map.get("timeout_ms").and_then(Value::as_u64) {
            let scaled = ((v as f64 * self.timeout_scale).round() as u64).max(1);
            out.insert("timeout_ms".to_string(), Value::from(scaled));
        }
        Value::Object(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// Sliding window the error rate is measured over.
    #[serde(rename = "window_ms", with = "crate::config::duration_ms")]
    pub window: Duration,
    /// Errors per minute above which the level drops.
    pub degrade_above: f64,
    /// Errors per minute below which the level may recover.
    pub restore_below: f64,
    #[serde(rename = "min_dwell_ms", with = "crate::config::duration_ms")]
    pub min_dwell: Duration,
    #[serde(rename = "recovery_hold_ms", with = "crate::config::duration_ms")]
    pub recovery_hold: Duration,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            degrade_above: 10.0,
            restore_below: 2.0,
            min_dwell: Duration::from_secs(10),
            recovery_hold: Duration::from_secs(30),
        }
    }
}

impl DegradationConfig {
    pub fn validate(&self) -> Result<()> {
        let ctx = || ErrorContext::new().with_source("degradation_config");
        if self.window.is_zero() {
            return Err(Error::configuration_with_context("window must be positive", ctx()));
        }
        if !(self.degrade_above.is_finite() && self.restore_below.is_finite())
            || self.restore_below < 0.0
            || self.restore_below > self.degrade_above
        {
            return Err(Error::configuration_with_context(
                format!(
                    "need 0 <= restore_below ({}) <= degrade_above ({})",
                    self.restore_below, self.degrade_above
                ),
                ctx(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub from: DegradationLevel,
    pub to: DegradationLevel,
}

#[derive(Debug)]
struct State {
    level: DegradationLevel,
    last_change: Option<Instant>,
    calm_since: Option<Instant>,
    last_rate_per_minute: f64,
}

pub struct DegradationController {
    config: ArcSwap<DegradationConfig>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl DegradationController {
    pub fn new(config: DegradationConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: DegradationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            clock,
            state: Mutex::new(State {
                level: DegradationLevel::Full,
                last_change: None,
                calm_since: None,
                last_rate_per_minute: 0.0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> Arc<DegradationConfig> {
        self.config.load_full()
    }

    /// Swap thresholds at runtime; the current level is kept.
    pub fn update_config(&self, config: DegradationConfig) -> Result<()> {
        config.validate()?;
        self.config.store(Arc::new(config));
        Ok(())
    }

    pub fn current_level(&self) -> DegradationLevel {
        self.lock().level
    }

    /// Error rate (per minute) seen by the most recent evaluation.
    pub fn last_rate_per_minute(&self) -> f64 {
        self.lock().last_rate_per_minute
    }

    /// Pure mapping of the current level onto caller parameters.
    pub fn adjust_parameters(&self, params: &Value) -> Value {
        self.current_level().profile().apply(params)
    }

    /// Force a level, e.g. from an operator override.
    pub fn set_level(&self, level: DegradationLevel) {
        let now = self.clock.now();
        let mut st = self.lock();
        st.level = level;
        st.last_change = Some(now);
        st.calm_since = None;
    }

    /// Re-evaluate against the analytics window.
    pub fn evaluate(&self, analytics: &ErrorAnalytics) -> Option<LevelChange> {
        let window = self.config.load().window;
        let per_second = analytics.error_rate(window);
        self.observe_rate(per_second * 60.0)
    }

    /// Feed one error-rate sample (errors per minute) and move at most one level.
    pub fn observe_rate(&self, rate_per_minute: f64) -> Option<LevelChange> {
        let cfg = self.config.load();
        let now = self.clock.now();
        let mut st = self.lock();
        st.last_rate_per_minute = rate_per_minute;

        let dwell_ok = st
            .last_change
            .map(|t| now.saturating_duration_since(t) >= cfg.min_dwell)
            .unwrap_or(true);

        if rate_per_minute > cfg.degrade_above {
            st.calm_since = None;
            if st.level == DegradationLevel::Minimal || !dwell_ok {
                return None;
            }
            let from = st.level;
            st.level = from.lower();
            st.last_change = Some(now);
            warn!(
                from = from.name(),
                to = st.level.name(),
                errors_per_minute = rate_per_minute,
                "degrading service level"
            );
            return Some(LevelChange { from, to: st.level });
        }

        if rate_per_minute < cfg.restore_below {
            let calm_since = *st.calm_since.get_or_insert(now);
            let held = now.saturating_duration_since(calm_since) >= cfg.recovery_hold;
            if st.level == DegradationLevel::Full || !held || !dwell_ok {
                return None;
            }
            let from = st.level;
            st.level = from.higher();
            st.last_change = Some(now);
            // Each further step needs its own sustained calm period.
            st.calm_since = Some(now);
            info!(
                from = from.name(),
                to = st.level.name(),
                errors_per_minute = rate_per_minute,
                "restoring service level"
            );
            return Some(LevelChange { from, to: st.level });
        }

        st.calm_since = None;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::ManualClock;
    use serde_json::json;

    fn controller() -> (DegradationController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cfg = DegradationConfig {
            window: Duration::from_secs(60),
            degrade_above: 10.0,
            restore_below: 2.0,
            min_dwell: Duration::from_secs(10),
            recovery_hold: Duration::from_secs(30),
        };
        (DegradationController::with_clock(cfg, clock.clone()), clock)
    }

    #[test]
    fn test_level_ordering() {
        assert!(DegradationLevel::Full > DegradationLevel::High);
        assert!(DegradationLevel::High > DegradationLevel::Medium);
        assert!(DegradationLevel::Medium > DegradationLevel::Low);
        assert!(DegradationLevel::Low > DegradationLevel::Minimal);
        assert_eq!(DegradationLevel::Minimal.lower(), DegradationLevel::Minimal);
        assert_eq!(DegradationLevel::Full.higher(), DegradationLevel::Full);
    }

    #[test]
    fn test_degrades_one_step_per_dwell() {
        let (ctl, clock) = controller();
        assert_eq!(ctl.current_level(), DegradationLevel::Full);

        let change = ctl.observe_rate(30.0).unwrap();
        assert_eq!(change.to, DegradationLevel::High);
        // Within min_dwell: no further drop.
        assert!(ctl.observe_rate(30.0).is_none());
        assert_eq!(ctl.current_level(), DegradationLevel::High);

        for expected in [
            DegradationLevel::Medium,
            DegradationLevel::Low,
            DegradationLevel::Minimal,
        ] {
            clock.advance(Duration::from_secs(10));
            assert_eq!(ctl.observe_rate(30.0).unwrap().to, expected);
        }
        clock.advance(Duration::from_secs(10));
        assert!(ctl.observe_rate(30.0).is_none());
        assert_eq!(ctl.current_level(), DegradationLevel::Minimal);
    }

    #[test]
    fn test_restores_after_sustained_calm() {
        let (ctl, clock) = controller();
        ctl.set_level(DegradationLevel::Low);

        assert!(ctl.observe_rate(0.0).is_none());
        clock.advance(Duration::from_secs(29));
        assert!(ctl.observe_rate(0.0).is_none());
        clock.advance(Duration::from_secs(1));
        assert_eq!(ctl.observe_rate(0.0).unwrap().to, DegradationLevel::Medium);

        // The hold restarts for the next step.
        clock.advance(Duration::from_secs(10));
        assert!(ctl.observe_rate(0.0).is_none());
        clock.advance(Duration::from_secs(20));
        assert_eq!(ctl.observe_rate(0.0).unwrap().to, DegradationLevel::High);
    }

    #[test]
    fn test_mid_band_rate_resets_calm_period() {
        let (ctl, clock) = controller();
        ctl.set_level(DegradationLevel::Medium);
        ctl.observe_rate(0.0);
        clock.advance(Duration::from_secs(20));
        ctl.observe_rate(5.0);
        clock.advance(Duration::from_secs(20));
        assert!(ctl.observe_rate(0.0).is_none());
        assert_eq!(ctl.current_level(), DegradationLevel::Medium);
    }

    #[test]
    fn test_never_above_full() {
        let (ctl, clock) = controller();
        ctl.observe_rate(0.0);
        clock.advance(Duration::from_secs(120));
        assert!(ctl.observe_rate(0.0).is_none());
        assert_eq!(ctl.current_level(), DegradationLevel::Full);
    }

    #[test]
    fn test_adjust_parameters_full_is_identity() {
        let (ctl, _) = controller();
        let params = json!({"width": 1024, "height": 768, "steps": 30, "prompt": "a cat"});
        assert_eq!(ctl.adjust_parameters(&params), params);
    }

    #[test]
    fn test_adjust_parameters_low() {
        let (ctl, _) = controller();
        ctl.set_level(DegradationLevel::Low);
        let params = json!({
            "width": 1024,
            "height": 768,
            "steps": 30,
            "batch_size": 4,
            "timeout_ms": 60000,
            "prompt": "a cat"
        });
        let adjusted = ctl.adjust_parameters(&params);
        assert_eq!(adjusted["width"], 512);
        assert_eq!(adjusted["height"], 384);
        assert_eq!(adjusted["steps"], 15);
        assert_eq!(adjusted["batch_size"], 1);
        assert_eq!(adjusted["timeout_ms"], 42000);
        assert_eq!(adjusted["prompt"], "a cat");
    }

    #[test]
    fn test_adjust_parameters_keeps_small_resolutions_sane() {
        let profile = DegradationLevel::Minimal.profile();
        let adjusted = profile.apply(&json!({"width": 100, "height": 32}));
        assert_eq!(adjusted["width"], 64);
        // Never scaled up.
        assert_eq!(adjusted["height"], 32);
        assert_eq!(profile.apply(&json!("not an object")), json!("not an object"));
    }

    #[test]
    fn test_update_config_validates() {
        let (ctl, _) = controller();
        let bad = DegradationConfig {
            restore_below: 50.0,
            ..DegradationConfig::default()
        };
        assert!(ctl.update_config(bad).is_err());
        let relaxed = DegradationConfig {
            degrade_above: 100.0,
            ..DegradationConfig::default()
        };
        ctl.update_config(relaxed).unwrap();
        assert!(ctl.observe_rate(30.0).is_none());
    }
}
