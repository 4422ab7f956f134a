// src/capture/mod.rs
//! Capture surface: adapter trait, handle, records, and correlation

pub mod correlator;
pub mod record;

pub use correlator::Correlator;
pub use record::{PendingRequest, Record, RecordMetadata, RequestLog, ResponseLog, SensitiveKeyMeta};

use crate::errors::Result;
use std::collections::HashMap;
use std::sync::Arc;
use ulid::Ulid;

/// Integration point for HTTP client libraries. An adapter hooks the
/// library's request/response path and reports both halves through the
/// [`CaptureHandle`] it is installed with.
pub trait Adapter: Send + Sync {
    /// Stable name for logs
    fn name(&self) -> &'static str;

    /// Install the library hooks. Called once per agent.
    fn install(&self, handle: CaptureHandle) -> Result<()>;
}

/// Cheaply cloneable handle adapters use to report traffic
#[derive(Clone)]
pub struct CaptureHandle {
    correlator: Arc<Correlator>,
}

impl CaptureHandle {
    pub(crate) fn new(correlator: Arc<Correlator>) -> Self {
        Self { correlator }
    }

    /// Fresh unique id correlating the two halves of one call
    pub fn next_request_id(&self) -> String {
        Ulid::new().to_string()
    }

    pub fn cache_request(
        &self,
        request_id: &str,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        headers: &HashMap<String, String>,
    ) {
        self.correlator
            .cache_request(request_id, method, url, body, headers);
    }

    pub fn cache_response(
        &self,
        request_id: &str,
        body: &[u8],
        headers: &HashMap<String, String>,
        status: u16,
        status_text: Option<&str>,
    ) {
        self.correlator
            .cache_response(request_id, body, headers, status, status_text);
    }
}
