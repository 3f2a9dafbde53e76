//! 审计事件：每次弹性调用结束后发出一条结构化事件（始终编译）。
//!
//! Audit events emitted once per orchestrated call.
//!
//! Sinks are best-effort: the orchestrator logs a sink error and moves on,
//! it never fails the call because auditing failed.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`AuditEvent`] | One finished call |
//! | [`AuditSink`] | Trait for audit destinations |
//! | [`NoopAuditSink`] | Default, drops everything |
//! | [`InMemoryAuditSink`] | Bounded buffer for tests |
//! | [`TracingAuditSink`] | Emits each event as a `tracing` record |
//! | [`CompositeAuditSink`] | Fan-out to several sinks |

use crate::category::ErrorCategory;
use crate::resilience::degradation::DegradationLevel;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// How an orchestrated call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Primary succeeded on the first attempt.
    Success,
    /// Primary succeeded after at least one retry.
    Recovered,
    /// A fallback entry produced the result.
    Fallback,
    Failed,
    Cancelled,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Recovered | Self::Fallback)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub call_id: Uuid,
    pub resource_name: String,
    pub outcome: CallOutcome,
    /// Attempts of the primary unit of work.
    pub attempts: u32,
    pub duration_ms: u64,
    pub degradation_level: DegradationLevel,
    pub fallback_entry: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub error: Option<String>,
    pub timestamp: f64,
}

impl AuditEvent {
    pub fn new(call_id: Uuid, resource_name: impl Into<String>, outcome: CallOutcome) -> Self {
        Self {
            call_id,
            resource_name: resource_name.into(),
            outcome,
            attempts: 0,
            duration_ms: 0,
            degradation_level: DegradationLevel::Full,
            fallback_entry: None,
            error_category: None,
            error: None,
            timestamp: timestamp(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_degradation_level(mut self, level: DegradationLevel) -> Self {
        self.degradation_level = level;
        self
    }

    pub fn with_fallback_entry(mut self, entry: impl Into<String>) -> Self {
        self.fallback_entry = Some(entry.into());
        self
    }

    pub fn with_error(mut self, category: ErrorCategory, message: impl Into<String>) -> Self {
        self.error_category = Some(category);
        self.error = Some(message.into());
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> Result<()>;
    async fn emit_batch(&self, events: Vec<AuditEvent>) -> Result<()> {
        for e in events {
            self.emit(e).await?;
        }
        Ok(())
    }
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn emit(&self, _: AuditEvent) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn AuditSink> {
    Arc::new(NoopAuditSink)
}

/// Keeps the newest `max_events` events.
pub struct InMemoryAuditSink {
    events: RwLock<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events: max.max(1),
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn events_for(&self, resource_name: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.resource_name == resource_name)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
        Ok(())
    }
}

/// Logs every event under the `ai_resilience::audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        let outcome = serde_json::to_value(event.outcome)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        if event.outcome.is_success() {
            tracing::info!(
                target: "ai_resilience::audit",
                call_id = %event.call_id,
                resource = %event.resource_name,
                outcome = %outcome,
                attempts = event.attempts,
                duration_ms = event.duration_ms,
                level = event.degradation_level.name(),
                fallback = event.fallback_entry.as_deref().unwrap_or("-"),
                "call finished"
            );
        } else {
            tracing::warn!(
                target: "ai_resilience::audit",
                call_id = %event.call_id,
                resource = %event.resource_name,
                outcome = %outcome,
                attempts = event.attempts,
                duration_ms = event.duration_ms,
                level = event.degradation_level.name(),
                category = event.error_category.map(|c| c.name()).unwrap_or("-"),
                error = event.error.as_deref().unwrap_or("-"),
                "call failed"
            );
        }
        Ok(())
    }
}

/// Fan-out sink; a failing child does not stop the others.
#[derive(Default)]
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl AuditSink for CompositeAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        for s in &self.sinks {
            if let Err(e) = s.emit(event.clone()).await {
                tracing::debug!(error = %e, "audit sink rejected event");
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for s in &self.sinks {
            let _ = s.close().await;
        }
        Ok(())
    }
}
