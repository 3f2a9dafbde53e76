//! 错误分析：有界环形缓冲区记录错误，按窗口计算错误率、恢复率与类别统计。
//!
//! Error analytics engine.
//!
//! A fixed-capacity ring buffer of [`ErrorRecord`]s behind a single mutex.
//! Records are immutable once stored; the oldest is evicted on overflow.
//! Rates are computed on read over the records inside the requested window.

use crate::category::ErrorCategory;
use crate::resilience::clock::{system_clock, Clock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One failed (or failed-then-recovered) logical call.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    #[serde(skip)]
    pub occurred_at: Instant,
    /// Unix seconds, for external consumers.
    pub timestamp: f64,
    pub category: ErrorCategory,
    pub resource_name: String,
    pub message: String,
    /// Whether a retry or fallback eventually succeeded for this call.
    pub recovered: bool,
}

impl ErrorRecord {
    pub fn new(
        occurred_at: Instant,
        category: ErrorCategory,
        resource_name: impl Into<String>,
        message: impl Into<String>,
        recovered: bool,
    ) -> Self {
        Self {
            occurred_at,
            timestamp: timestamp(),
            category,
            resource_name: resource_name.into(),
            message: message.into(),
            recovered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub capacity: usize,
    /// Window used by [`ErrorAnalytics::report`].
    #[serde(rename = "report_window_ms", with = "crate::config::duration_ms")]
    pub report_window: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            report_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub capacity: usize,
    pub buffered: usize,
    pub total_recorded: u64,
    pub evicted: u64,
    pub window_secs: f64,
    pub error_rate_per_minute: f64,
    pub recovery_rate: f64,
    pub by_category: BTreeMap<String, u64>,
    pub by_resource: BTreeMap<String, u64>,
    /// Newest last.
    pub recent: Vec<ErrorRecord>,
}

#[derive(Debug)]
struct Inner {
    buf: VecDeque<ErrorRecord>,
    total: u64,
    evicted: u64,
}

pub struct ErrorAnalytics {
    cfg: AnalyticsConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

const REPORT_RECENT: usize = 10;

impl ErrorAnalytics {
    pub fn new(cfg: AnalyticsConfig) -> Self {
        Self::with_clock(cfg, system_clock())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(AnalyticsConfig {
            capacity,
            ..AnalyticsConfig::default()
        })
    }

    pub fn with_clock(cfg: AnalyticsConfig, clock: Arc<dyn Clock>) -> Self {
        let cfg = AnalyticsConfig {
            capacity: cfg.capacity.max(1),
            ..cfg
        };
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(cfg.capacity),
                total: 0,
                evicted: 0,
            }),
            cfg,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.cfg.capacity
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn record(&self, record: ErrorRecord) {
        let mut inner = self.lock();
        if inner.buf.len() >= self.cfg.capacity {
            inner.buf.pop_front();
            inner.evicted += 1;
        }
        inner.buf.push_back(record);
        inner.total += 1;
    }

    /// Stamp a record with the engine's clock and store it.
    pub fn record_now(
        &self,
        category: ErrorCategory,
        resource_name: impl Into<String>,
        message: impl Into<String>,
        recovered: bool,
    ) {
        let rec = ErrorRecord::new(self.clock.now(), category, resource_name, message, recovered);
        self.record(rec);
    }

    // Records may arrive out of timestamp order, so windows are scanned in full.
    fn in_window(now: Instant, window: Duration, rec: &ErrorRecord) -> bool {
        now.saturating_duration_since(rec.occurred_at) <= window
    }

    /// Records per second over the trailing `window`.
    pub fn error_rate(&self, window: Duration) -> f64 {
        if window.is_zero() {
            return 0.0;
        }
        let now = self.clock.now();
        let inner = self.lock();
        let n = inner
            .buf
            .iter()
            .filter(|r| Self::in_window(now, window, r))
            .count();
        n as f64 / window.as_secs_f64()
    }

    pub fn error_rate_per_minute(&self, window: Duration) -> f64 {
        self.error_rate(window) * 60.0
    }

    /// Fraction of buffered records flagged `recovered`; 0.0 when empty.
    pub fn recovery_rate(&self) -> f64 {
        let inner = self.lock();
        Self::fraction_recovered(inner.buf.iter())
    }

    pub fn recovery_rate_within(&self, window: Duration) -> f64 {
        let now = self.clock.now();
        let inner = self.lock();
        Self::fraction_recovered(
            inner
                .buf
                .iter()
                .filter(|r| Self::in_window(now, window, r)),
        )
    }

    fn fraction_recovered<'a>(records: impl Iterator<Item = &'a ErrorRecord>) -> f64 {
        let (total, recovered) = records.fold((0u64, 0u64), |(t, r), rec| {
            (t + 1, r + u64::from(rec.recovered))
        });
        if total == 0 {
            0.0
        } else {
            recovered as f64 / total as f64
        }
    }

    pub fn count_by_category(&self, category: ErrorCategory) -> usize {
        self.lock()
            .buf
            .iter()
            .filter(|r| r.category == category)
            .count()
    }

    pub fn count_by_resource(&self, resource_name: &str) -> usize {
        self.lock()
            .buf
            .iter()
            .filter(|r| r.resource_name == resource_name)
            .count()
    }

    /// Up to `n` newest records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        let inner = self.lock();
        let skip = inner.buf.len().saturating_sub(n);
        inner.buf.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_recorded(&self) -> u64 {
        self.lock().total
    }

    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    /// Drop every buffered record and reset the lifetime counters.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.buf.clear();
        inner.total = 0;
        inner.evicted = 0;
    }

    /// Consistent snapshot of the buffer, taken under one lock.
    pub fn report(&self) -> AnalyticsReport {
        let window = self.cfg.report_window;
        let now = self.clock.now();
        let inner = self.lock();

        let mut by_category = BTreeMap::new();
        let mut by_resource = BTreeMap::new();
        for rec in &inner.buf {
            *by_category.entry(rec.category.name().to_string()).or_insert(0) += 1;
            *by_resource.entry(rec.resource_name.clone()).or_insert(0) += 1;
        }
        let in_window = inner
            .buf
            .iter()
            .filter(|r| Self::in_window(now, window, r))
            .count();
        let error_rate_per_minute = if window.is_zero() {
            0.0
        } else {
            in_window as f64 / window.as_secs_f64() * 60.0
        };
        let skip = inner.buf.len().saturating_sub(REPORT_RECENT);

        AnalyticsReport {
            capacity: self.cfg.capacity,
            buffered: inner.buf.len(),
            total_recorded: inner.total,
            evicted: inner.evicted,
            window_secs: window.as_secs_f64(),
            error_rate_per_minute,
            recovery_rate: Self::fraction_recovered(inner.buf.iter()),
            by_category,
            by_resource,
            recent: inner.buf.iter().skip(skip).cloned().collect(),
        }
    }
}
