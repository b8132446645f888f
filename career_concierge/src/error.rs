//! Error taxonomy for the coordination core.
//!
//! Tool failures and timeouts are absorbed at the agent-invocation boundary
//! and folded into failed `AgentResult`s; they never cross the execution
//! engine. Validation errors short-circuit planning, and storage errors are
//! fatal to the current `process` call.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConciergeError {
    /// An external capability (model, search, summarizer) failed.
    #[error("tool failure: {0}")]
    Tool(String),

    /// An invocation exceeded its bounded wait.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed request or plan.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Memory bank I/O failure. Memory consistency cannot be guaranteed, so
    /// this surfaces to the caller instead of being swallowed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ConciergeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConciergeError::Tool(_) | ConciergeError::Timeout(_))
    }
}

impl From<sled::Error> for ConciergeError {
    fn from(err: sled::Error) -> Self {
        ConciergeError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ConciergeError {
    fn from(err: serde_json::Error) -> Self {
        ConciergeError::Storage(format!("state (de)serialization: {err}"))
    }
}

pub type Result<T, E = ConciergeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_and_timeout_are_retryable() {
        assert!(ConciergeError::Tool("rate limit".into()).is_retryable());
        assert!(ConciergeError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ConciergeError::Validation("empty".into()).is_retryable());
        assert!(!ConciergeError::Storage("disk".into()).is_retryable());
    }
}
