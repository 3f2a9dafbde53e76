//! 统一错误类型：瞬时/永久错误分类、熔断拒绝、回退链耗尽。
//!
//! Unified error type for the resilience runtime.
//!
//! Units of work report failures through [`Error::transient`] or [`Error::permanent`];
//! the runtime adds its own terminal variants (`CircuitOpen`, `Final`, `ChainExhausted`).

use crate::category::ErrorCategory;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Component that produced the error (e.g., "retry_executor", "fallback_chain")
    pub source: Option<String>,
    /// Named resource the failing call was aimed at
    pub resource: Option<String>,
    /// Free-form details (e.g., upstream status, attempt number)
    pub details: Option<String>,
    /// Explicit category, overriding keyword inference
    pub category: Option<ErrorCategory>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// Sealed retry classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network/timeout/IO style failures; retryable by default.
    Transient,
    /// Validation/logic failures; never retried by default.
    Permanent,
}

/// One failed entry of a fallback chain, kept in traversal order.
#[derive(Debug)]
pub struct FallbackFailure {
    pub entry: String,
    pub error: Error,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transient error: {message}{}", format_context(.context))]
    Transient {
        message: String,
        context: ErrorContext,
    },

    #[error("Permanent error: {message}{}", format_context(.context))]
    Permanent {
        message: String,
        context: ErrorContext,
    },

    #[error("Timed out: {message}{}", format_context(.context))]
    Timeout {
        message: String,
        context: ErrorContext,
    },

    #[error("Call cancelled{}", format_context(.context))]
    Cancelled { context: ErrorContext },

    #[error("Circuit breaker '{resource}' is open")]
    CircuitOpen {
        resource: String,
        /// Remaining open time in ms, if known.
        retry_after_ms: Option<u64>,
    },

    #[error("Operation failed after {attempts} attempt(s) (retryable: {retryable}): {source}")]
    Final {
        #[source]
        source: Box<Error>,
        retryable: bool,
        attempts: u32,
    },

    #[error("All {} fallback(s) failed{}", .failures.len(), format_failures(.failures))]
    ChainExhausted { failures: Vec<FallbackFailure> },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref resource) = ctx.resource {
        parts.push(format!("resource: {}", resource));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_failures(failures: &[FallbackFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = failures
        .iter()
        .map(|f| format!("{}: {}", f.entry, f.error))
        .collect();
    format!(": [{}]", parts.join("; "))
}

impl Error {
    /// A retryable failure reported by a unit of work.
    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// A non-retryable failure reported by a unit of work.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Error::Permanent {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn transient_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Transient {
            message: msg.into(),
            context,
        }
    }

    pub fn permanent_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Permanent {
            message: msg.into(),
            context,
        }
    }

    pub fn timeout_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Timeout {
            message: msg.into(),
            context,
        }
    }

    pub fn cancelled(source: impl Into<String>) -> Self {
        Error::Cancelled {
            context: ErrorContext::new().with_source(source),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Set the category on errors that carry a context. Other variants are returned unchanged.
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.category = Some(category);
        }
        self
    }

    /// Set the resource name on errors that carry a context.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.resource = Some(resource.into());
        }
        self
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Transient { context, .. }
            | Error::Permanent { context, .. }
            | Error::Timeout { context, .. }
            | Error::Cancelled { context }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Error::Transient { context, .. }
            | Error::Permanent { context, .. }
            | Error::Timeout { context, .. }
            | Error::Cancelled { context }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Retry classification used by the default retry predicate.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transient { .. } | Error::Timeout { .. } => ErrorKind::Transient,
            Error::Final { source, .. } => source.kind(),
            _ => ErrorKind::Permanent,
        }
    }

    /// Analytics category of this error.
    ///
    /// An explicit category in the context wins; otherwise it is inferred from the
    /// variant and, for caller-reported errors, from the message.
    pub fn category(&self) -> ErrorCategory {
        if let Some(c) = self.context().and_then(|c| c.category) {
            return c;
        }
        match self {
            Error::Transient { message, .. } => {
                ErrorCategory::classify_message(message).unwrap_or(ErrorCategory::Network)
            }
            Error::Permanent { message, .. } => {
                ErrorCategory::classify_message(message).unwrap_or(ErrorCategory::Validation)
            }
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Error::Final { source, .. } => source.category(),
            Error::ChainExhausted { failures } => failures
                .last()
                .map(|f| f.error.category())
                .unwrap_or(ErrorCategory::Other),
            Error::Configuration { .. } => ErrorCategory::Validation,
            Error::Cancelled { .. } => ErrorCategory::Other,
        }
    }

    /// Innermost error for `Final` wrappers; `self` otherwise.
    pub fn root(&self) -> &Error {
        match self {
            Error::Final { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self.root(), Error::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
