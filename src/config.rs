// src/config.rs
//! Agent configuration
//!
//! An explicit, typed configuration struct with documented defaults,
//! validated once at initialization. Redaction mode flags are evaluated in
//! priority order: `force_redact_all` > `redact_by_default` > policy-driven
//! > `ignore_redaction`.

use crate::errors::{AgentError, Result};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Batch drain period for the background worker (milliseconds)
    pub flush_interval_ms: u64,

    /// Remote policy refresh period (milliseconds)
    pub config_interval_ms: u64,

    /// Collector path records are posted to
    pub event_sink_endpoint: String,

    /// Collector path failures are reported to (best effort)
    pub error_sink_endpoint: String,

    /// Collector path the policy document is pulled from
    pub remote_config_endpoint: String,

    /// Static host denylist. Matching hosts bypass policy entirely and are
    /// never captured.
    pub ignored_domains: Vec<String>,

    /// Redact every leaf value in bodies and headers, ignoring per-key
    /// policy. Highest-priority redaction flag.
    pub force_redact_all: bool,

    /// Redact every leaf unless its key path is explicitly marked ALLOW for
    /// the matched endpoint.
    pub redact_by_default: bool,

    /// Skip redaction entirely. Lowest-priority flag.
    pub ignore_redaction: bool,

    /// When false, no policy gating applies: only `ignored_domains` is
    /// consulted and every other call is captured.
    pub use_remote_config: bool,

    /// When false, no background threads are spawned; the caller drives
    /// `refresh_config()` and `flush()` manually (serverless mode).
    pub run_threads: bool,

    /// Per-field inclusion toggles, independent of redaction. A disabled
    /// field is recorded as JSON null at capture time.
    pub log_request_headers: bool,
    pub log_request_body: bool,
    pub log_response_headers: bool,
    pub log_response_body: bool,

    /// Records flushed early once a drained batch reaches this size
    pub batch_size: usize,

    /// Bound on the worker queue. A full queue drops the newest record.
    pub max_queue_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1000,
            config_interval_ms: 10_000,
            event_sink_endpoint: "/events".to_string(),
            error_sink_endpoint: "/errors".to_string(),
            remote_config_endpoint: "/config".to_string(),
            ignored_domains: Vec::new(),
            force_redact_all: false,
            redact_by_default: false,
            ignore_redaction: false,
            use_remote_config: true,
            run_threads: true,
            log_request_headers: true,
            log_request_body: true,
            log_response_headers: true,
            log_response_body: true,
            batch_size: 10,
            max_queue_size: 256,
        }
    }
}

impl AgentConfig {
    /// Validate the configuration at construction
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval_ms == 0 {
            return Err(AgentError::InvalidConfig(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.config_interval_ms == 0 {
            return Err(AgentError::InvalidConfig(
                "config_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AgentError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(AgentError::InvalidConfig(
                "max_queue_size must be greater than zero".to_string(),
            ));
        }
        for endpoint in [
            &self.event_sink_endpoint,
            &self.error_sink_endpoint,
            &self.remote_config_endpoint,
        ] {
            if !endpoint.starts_with('/') {
                return Err(AgentError::InvalidConfig(format!(
                    "endpoint path must start with '/': {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}
