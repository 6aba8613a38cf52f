//! Dispatch outcomes
//!
//! Every dispatch attempt yields exactly one [`Outcome`]. Retry, drop and
//! route-scoring decisions branch on its [`OutcomeKind`]; nothing about an
//! HTTP status travels as an error.

use std::fmt;
use std::time::Duration;

/// Classification of a single dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// The origin answered with a usable response
    Success,

    /// Worth retrying: 5xx, request timeout, connection failure
    Transient,

    /// The origin refused us (403/429); counted, never retried in a loop
    PolicyBlocked,

    /// Dropped permanently: malformed URL, disallowed by policy, other 4xx
    Fatal,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Transient => "transient",
            Self::PolicyBlocked => "policy_blocked",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one dispatch attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub kind: OutcomeKind,

    /// Wall time spent in the fetch
    pub latency: Duration,

    /// HTTP status, when the origin answered
    pub status: Option<u16>,

    /// Human-readable detail for anything other than success
    pub error: Option<String>,
}

impl Outcome {
    /// Builds an outcome from an HTTP status
    pub fn from_status(status: u16, latency: Duration) -> Self {
        let kind = classify_status(status);
        let error = match kind {
            OutcomeKind::Success => None,
            _ => Some(format!("HTTP {}", status)),
        };
        Self {
            kind,
            latency,
            status: Some(status),
            error,
        }
    }

    /// A retryable failure that produced no response
    pub fn transient(error: impl Into<String>, latency: Duration) -> Self {
        Self {
            kind: OutcomeKind::Transient,
            latency,
            status: None,
            error: Some(error.into()),
        }
    }

    /// A permanent failure that produced no response
    pub fn fatal(error: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Fatal,
            latency: Duration::ZERO,
            status: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    pub fn latency_ms(&self) -> u64 {
        u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX)
    }

    /// Short description for logs and the recent-error lists
    pub fn describe(&self) -> String {
        match (&self.error, self.status) {
            (Some(error), _) => error.clone(),
            (None, Some(status)) => format!("HTTP {}", status),
            (None, None) => self.kind.to_string(),
        }
    }
}

/// Maps an HTTP status onto an outcome kind
///
/// | Status | Kind |
/// |--------|------|
/// | 2xx, 3xx | Success |
/// | 403, 429 | PolicyBlocked |
/// | 408, 5xx | Transient |
/// | other | Fatal |
pub fn classify_status(status: u16) -> OutcomeKind {
    match status {
        200..=399 => OutcomeKind::Success,
        403 | 429 => OutcomeKind::PolicyBlocked,
        408 | 500..=599 => OutcomeKind::Transient,
        _ => OutcomeKind::Fatal,
    }
}
