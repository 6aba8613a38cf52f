//! Page actions for browser-backed fetchers
//!
//! Requests may carry a list of actions for fetch backends that drive a real
//! browser. The set is closed: backends dispatch on it with an exhaustive
//! `match`, so adding a variant is a compile error everywhere it is unhandled.

use std::time::Duration;

/// Longest wait a single action may ask for
pub const MAX_ACTION_WAIT: Duration = Duration::from_secs(60);

/// One step a browser backend performs after the page loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    /// Click the first element matching a CSS selector
    Click { selector: String },

    /// Type text into the first element matching a CSS selector
    Type { selector: String, text: String },

    /// Pause for a fixed duration
    Wait { duration: Duration },

    /// Evaluate a script in the page context
    Evaluate { script: String },
}

impl PageAction {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Wait { .. } => "wait",
            Self::Evaluate { .. } => "evaluate",
        }
    }

    /// Checks the action is well formed before it reaches a backend
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Click { selector } | Self::Type { selector, .. } if selector.trim().is_empty() => {
                Err(format!("{} action has an empty selector", self.kind()))
            }
            Self::Wait { duration } if *duration > MAX_ACTION_WAIT => Err(format!(
                "wait of {:?} exceeds the {:?} limit",
                duration, MAX_ACTION_WAIT
            )),
            Self::Evaluate { script } if script.trim().is_empty() => {
                Err("evaluate action has an empty script".to_string())
            }
            Self::Click { .. } | Self::Type { .. } | Self::Wait { .. } | Self::Evaluate { .. } => {
                Ok(())
            }
        }
    }

    /// Upper bound on the time this action adds to a fetch
    pub fn budget(&self) -> Duration {
        match self {
            Self::Wait { duration } => *duration,
            Self::Click { .. } | Self::Type { .. } | Self::Evaluate { .. } => {
                Duration::from_millis(500)
            }
        }
    }
}

/// Validates a whole action list, reporting the first bad step
pub fn validate_actions(actions: &[PageAction]) -> Result<(), String> {
    for (index, action) in actions.iter().enumerate() {
        action
            .validate()
            .map_err(|reason| format!("action {}: {}", index, reason))?;
    }
    Ok(())
}
