//! 回退链：主操作耗尽后按声明顺序尝试备选操作。
//!
//! Fallback chain.
//!
//! An ordered list of alternative units of work tried one after another once
//! the primary operation is exhausted. The chain adds no retry semantics of its
//! own; each entry may carry its own [`RetryPolicy`] and [`CircuitBreaker`].
//! Chains are cheap to clone and share: entries and their counters live behind `Arc`.

use crate::error::FallbackFailure;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::context::CallContext;
use crate::resilience::retry::{RetryExecutor, RetryPolicy};
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A shareable, repeatable unit of work.
pub type WorkFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Box a closure returning a future into a [`WorkFn`].
pub fn work_fn<T, F, Fut>(f: F) -> WorkFn<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

#[derive(Debug, Default)]
struct EntryCounters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackEntryStats {
    pub name: String,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

pub struct FallbackEntry<T> {
    name: String,
    op: WorkFn<T>,
    retry: Option<RetryPolicy>,
    breaker: Option<Arc<CircuitBreaker>>,
    counters: Arc<EntryCounters>,
}

impl<T> Clone for FallbackEntry<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            op: self.op.clone(),
            retry: self.retry.clone(),
            breaker: self.breaker.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<T: Send + 'static> FallbackEntry<T> {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::from_work(name, work_fn(f))
    }

    pub fn from_work(name: impl Into<String>, op: WorkFn<T>) -> Self {
        Self {
            name: name.into(),
            op,
            retry: None,
            breaker: None,
            counters: Arc::new(EntryCounters::default()),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> FallbackEntryStats {
        FallbackEntryStats {
            name: self.name.clone(),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    async fn invoke(&self, ctx: &CallContext) -> Result<T> {
        let policy = self.retry.clone().unwrap_or_else(RetryPolicy::no_retry);
        let mut exec = RetryExecutor::new(policy);
        if let Some(b) = &self.breaker {
            exec = exec.with_circuit_breaker(b.clone());
        }
        let op = self.op.clone();
        let res = exec.execute(ctx, move || op()).await;
        // An entry without its own retry policy reports the raw failure.
        match res {
            Err(Error::Final { source, .. }) if self.retry.is_none() => Err(*source),
            other => other,
        }
    }
}

/// A successful fallback: the value and which entry produced it.
#[derive(Debug)]
pub struct FallbackSuccess<T> {
    pub value: T,
    pub entry: String,
    /// 0-based position of the entry in the chain.
    pub index: usize,
}

pub struct FallbackChain<T> {
    entries: Arc<Vec<FallbackEntry<T>>>,
}

impl<T> Clone for FallbackChain<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T: Send + 'static> FallbackChain<T> {
    pub fn new(entries: Vec<FallbackEntry<T>>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn builder() -> FallbackChainBuilder<T> {
        FallbackChainBuilder {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    pub fn stats(&self) -> Vec<FallbackEntryStats> {
        self.entries.iter().map(|e| e.stats()).collect()
    }

    /// Try every entry in declaration order, returning the first success.
    ///
    /// Exhaustion means every entry was tried in this call and failed; the
    /// resulting `ChainExhausted` lists their errors in the same order.
    /// Cancellation stops the traversal immediately. Reaching the call deadline
    /// stops it too, as `Final { source: Timeout }`; entries that never ran
    /// keep their counters untouched.
    pub async fn execute(&self, ctx: &CallContext) -> Result<FallbackSuccess<T>> {
        let mut failures = Vec::with_capacity(self.entries.len());

        for (index, entry) in self.entries.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(Error::cancelled("fallback_chain"));
            }
            if ctx.deadline_exceeded() {
                debug!(
                    entry = entry.name(),
                    index,
                    tried = failures.len(),
                    "deadline reached, stopping fallback chain"
                );
                return Err(Error::Final {
                    source: Box::new(ctx.deadline_error()),
                    retryable: true,
                    attempts: failures.len() as u32,
                });
            }
            entry.counters.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(entry = entry.name(), index, "trying fallback");

            match entry.invoke(ctx).await {
                Ok(value) => {
                    entry.counters.successes.fetch_add(1, Ordering::Relaxed);
                    info!(entry = entry.name(), index, "fallback succeeded");
                    return Ok(FallbackSuccess {
                        value,
                        entry: entry.name.clone(),
                        index,
                    });
                }
                Err(e) => {
                    entry.counters.failures.fetch_add(1, Ordering::Relaxed);
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    debug!(entry = entry.name(), index, error = %e, "fallback failed");
                    failures.push(FallbackFailure {
                        entry: entry.name.clone(),
                        error: e,
                    });
                }
            }
        }

        Err(Error::ChainExhausted { failures })
    }
}

pub struct FallbackChainBuilder<T> {
    entries: Vec<FallbackEntry<T>>,
}

impl<T: Send + 'static> FallbackChainBuilder<T> {
    /// Append an alternative, tried after all previously added ones.
    pub fn then<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.entries.push(FallbackEntry::new(name, f));
        self
    }

    pub fn entry(mut self, entry: FallbackEntry<T>) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn build(self) -> FallbackChain<T> {
        FallbackChain::new(self.entries)
    }
}
