use crate::DispatchError;
use std::fmt;

/// Request lifecycle states
///
/// Queued → Dispatched → {Succeeded, Retrying → Queued, PolicyBlocked, Failed}.
/// A dispatched request may also be deferred back to Queued (no route
/// available), dropped by a middleware (Filtered) or Cancelled on stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    // ===== Active States =====
    /// Waiting in a domain queue
    Queued,

    /// Owned by a dispatch unit
    Dispatched,

    /// Waiting out a backoff before being queued again
    Retrying,

    // ===== Terminal States =====
    /// Fetched successfully
    Succeeded,

    /// Blocked by the origin (403/429); never retried automatically
    PolicyBlocked,

    /// Dropped permanently (fatal outcome or retries exhausted)
    Failed,

    /// A request middleware aborted the dispatch
    Filtered,

    /// The coordinator stopped before the request finished
    Cancelled,
}

impl RequestState {
    /// Returns true if no further processing will happen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Dispatched | Self::Retrying)
    }

    /// Returns true if the lifecycle allows moving to `next`
    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        match (self, next) {
            (Queued, Dispatched) | (Queued, Cancelled) => true,
            (Dispatched, Succeeded)
            | (Dispatched, Retrying)
            | (Dispatched, PolicyBlocked)
            | (Dispatched, Failed)
            | (Dispatched, Filtered)
            | (Dispatched, Cancelled)
            | (Dispatched, Queued) => true,
            (Retrying, Queued) | (Retrying, Cancelled) | (Retrying, Failed) => true,
            _ => false,
        }
    }

    /// Moves to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(self, next: RequestState) -> Result<RequestState, DispatchError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DispatchError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::PolicyBlocked => "policy_blocked",
            Self::Failed => "failed",
            Self::Filtered => "filtered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!RequestState::Queued.is_terminal());
        assert!(!RequestState::Dispatched.is_terminal());
        assert!(!RequestState::Retrying.is_terminal());

        assert!(RequestState::Succeeded.is_terminal());
        assert!(RequestState::PolicyBlocked.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(RequestState::Filtered.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
    }

    #[test]
    fn test_retry_loop() {
        let state = RequestState::Queued
            .transition(RequestState::Dispatched)
            .and_then(|s| s.transition(RequestState::Retrying))
            .and_then(|s| s.transition(RequestState::Queued))
            .unwrap();
        assert_eq!(state, RequestState::Queued);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            RequestState::Succeeded,
            RequestState::PolicyBlocked,
            RequestState::Failed,
            RequestState::Filtered,
            RequestState::Cancelled,
        ] {
            assert!(!terminal.can_transition_to(RequestState::Queued));
            assert!(!terminal.can_transition_to(RequestState::Dispatched));
        }
    }

    #[test]
    fn test_invalid_transition_error() {
        let result = RequestState::Queued.transition(RequestState::Succeeded);
        assert!(matches!(
            result,
            Err(DispatchError::InvalidTransition {
                from: RequestState::Queued,
                to: RequestState::Succeeded
            })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(RequestState::PolicyBlocked.to_string(), "policy_blocked");
    }
}
