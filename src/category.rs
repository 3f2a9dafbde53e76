//! 错误类别：用于错误分析的分类体系及基于消息的推断。
//!
//! Error categories for analytics.
//!
//! Every recorded failure lands in exactly one category. Callers may set the
//! category explicitly on an [`crate::Error`]; otherwise it is inferred from the
//! error variant and, for caller-reported errors, from keywords in the message.
//!
//! ## Example
//!
//! ```rust
//! use ai_resilience::category::ErrorCategory;
//!
//! let c = ErrorCategory::classify_message("CUDA out of memory").unwrap();
//! assert_eq!(c, ErrorCategory::Memory);
//! assert_eq!(c.name(), "memory");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection refused/reset, DNS, transport IO
    Network,
    /// Attempt timeout or call deadline exceeded
    Timeout,
    /// Host or device memory exhaustion
    Memory,
    /// Model loading or inference backend failures
    Model,
    /// Invalid input or configuration
    Validation,
    /// Rejected by an open circuit breaker, no downstream call made
    CircuitOpen,
    /// Could not be classified
    Other,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        Self::Network,
        Self::Timeout,
        Self::Memory,
        Self::Model,
        Self::Validation,
        Self::CircuitOpen,
        Self::Other,
    ];

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Memory => "memory",
            Self::Model => "model",
            Self::Validation => "validation",
            Self::CircuitOpen => "circuit_open",
            Self::Other => "other",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let c = match name {
            "network" => Self::Network,
            "timeout" => Self::Timeout,
            "memory" => Self::Memory,
            "model" => Self::Model,
            "validation" => Self::Validation,
            "circuit_open" => Self::CircuitOpen,
            "other" => Self::Other,
            _ => return None,
        };
        Some(c)
    }

    /// Keyword heuristic for messages that carry no structured category.
    ///
    /// Order matters: "model load timed out" is a timeout, not a model failure.
    pub fn classify_message(message: &str) -> Option<Self> {
        let m = message.to_lowercase();
        if m.contains("memory") || m.contains("oom-kill") {
            Some(Self::Memory)
        } else if m.contains("timeout") || m.contains("timed out") || m.contains("deadline") {
            Some(Self::Timeout)
        } else if m.contains("connection")
            || m.contains("network")
            || m.contains("unreachable")
            || m.contains("dns")
            || m.contains("socket")
        {
            Some(Self::Network)
        } else if m.contains("model") || m.contains("checkpoint") || m.contains("inference") {
            Some(Self::Model)
        } else if m.contains("invalid") || m.contains("validation") || m.contains("malformed") {
            Some(Self::Validation)
        } else {
            None
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
