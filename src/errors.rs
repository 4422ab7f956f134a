// src/errors.rs
//! Error types for the capture agent
//!
//! Nothing in this crate may propagate a failure back into the host
//! application's instrumented call: boundary entry points catch every
//! variant, log it, and degrade to dropping the affected record or batch.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error taxonomy
#[derive(Debug, Error)]
pub enum AgentError {
    /// Invalid collector credentials. Terminal for the session: once seen,
    /// the agent stops posting and fetching entirely.
    #[error("unauthorized: invalid client id or secret")]
    Unauthorized,

    /// Remote policy fetch failed. Transient when a prior document exists,
    /// fatal-for-capture when none has been obtained yet.
    #[error("failed to fetch remote policy: {0}")]
    ConfigFetch(String),

    /// Remote policy document could not be parsed. The previously-installed
    /// document stays active.
    #[error("failed to parse remote policy: {0}")]
    PolicyParse(String),

    /// Failure while building a pending request or a record.
    #[error("failed to cache call: {0}")]
    Caching(String),

    /// Failure while redacting a batch. Aborts the flush attempt so that no
    /// partially-redacted payload is ever posted.
    #[error("failed to redact sensitive keys: {0}")]
    Redaction(String),

    /// Event export was rejected or could not be delivered. The batch is
    /// dropped after a single attempt.
    #[error("failed to post events: {0}")]
    PostingEvents(String),

    /// Configuration rejected at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport-level failure talking to the collector.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AgentError {
    /// Short stage tag used when reporting to the collector's error sink.
    pub fn stage(&self) -> &'static str {
        match self {
            AgentError::Unauthorized => "unauthorized",
            AgentError::ConfigFetch(_) => "fetching_config",
            AgentError::PolicyParse(_) => "parsing_config",
            AgentError::Caching(_) => "caching",
            AgentError::Redaction(_) => "redaction",
            AgentError::PostingEvents(_) => "posting_events",
            AgentError::InvalidConfig(_) => "invalid_config",
            AgentError::Transport(_) => "transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tags() {
        assert_eq!(AgentError::Unauthorized.stage(), "unauthorized");
        assert_eq!(
            AgentError::Redaction("boom".to_string()).stage(),
            "redaction"
        );
    }

    #[test]
    fn test_display() {
        let err = AgentError::PostingEvents("503".to_string());
        assert!(err.to_string().contains("post events"));
    }
}
