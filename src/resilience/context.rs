//! Per-call cancellation and deadline, threaded through every attempt and backoff sleep.

use crate::{Error, ErrorContext, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DEADLINE_DETAILS: &str = "call deadline exceeded";

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    attempt_timeout: Option<Duration>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Overall budget for the call, measured from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Bound on a single attempt. Exceeding it is a transient timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.remaining().map(|r| r.is_zero()).unwrap_or(false)
    }

    pub(crate) fn deadline_error(&self) -> Error {
        Error::timeout_with_context(
            DEADLINE_DETAILS,
            ErrorContext::new().with_source("call_context"),
        )
    }

    /// Fails fast when the call was cancelled or ran out of time.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::cancelled("call_context"));
        }
        if self.deadline_exceeded() {
            return Err(self.deadline_error());
        }
        Ok(())
    }

    /// Drive one attempt under the attempt timeout, the call deadline and cancellation.
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let remaining = self.remaining();
        let (limit, from_deadline) = match (self.attempt_timeout, remaining) {
            (Some(a), Some(r)) if r <= a => (Some(r), true),
            (Some(a), _) => (Some(a), false),
            (None, Some(r)) => (Some(r), true),
            (None, None) => (None, false),
        };

        let guarded = async {
            match limit {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(res) => res,
                    Err(_) if from_deadline => Err(self.deadline_error()),
                    Err(_) => Err(Error::timeout_with_context(
                        format!("attempt timed out after {}ms", limit.as_millis()),
                        ErrorContext::new().with_source("attempt_timeout"),
                    )),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::cancelled("call_context")),
            res = guarded => res,
        }
    }

    /// Cancellable backoff sleep. A sleep that would outlast the deadline fails immediately.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.check()?;
        if let Some(remaining) = self.remaining() {
            if delay >= remaining {
                return Err(self.deadline_error());
            }
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::cancelled("call_context")),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = CallContext::new();
        let v = ctx.run(async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_transient() {
        let ctx = CallContext::new().with_attempt_timeout(Duration::from_millis(10));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.kind(), crate::error::ErrorKind::Transient);
        assert!(!ctx.deadline_exceeded());
    }

    #[tokio::test]
    async fn test_deadline_exceeded_during_attempt() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(20));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(ctx.deadline_exceeded());
        assert!(ctx.check().is_err());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let ctx = CallContext::new().with_cancel(token.clone());
        let handle = tokio::spawn(async move { ctx.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let res = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sleep should be interrupted")
            .unwrap();
        assert!(res.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_past_deadline_fails_fast() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let err = ctx.sleep(Duration::from_secs(10)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
