// src/capture/correlator.rs
//! Request/response correlation
//!
//! Adapters report the two halves of a call separately; the correlator
//! holds the request half keyed by request id until the response half
//! arrives, then hands the paired record to the batch worker. Every entry
//! point is a boundary: failures are logged and reported to the error sink,
//! never surfaced to the host application.
//!
//! A request is dropped before it is ever stored when any of these hold, in
//! this order: remote policy is expected but not yet loaded, the call
//! targets the collector itself, the host is explicitly ignored, or the
//! matched endpoint is marked Ignore.

use crate::agent::tags;
use crate::agent::FlushPipeline;
use crate::capture::record::{
    headers_to_value, parse_body, PendingRequest, Record, RecordMetadata, RequestLog, ResponseLog,
};
use crate::config::AgentConfig;
use crate::errors::{AgentError, Result};
use crate::policy::{matcher, EndpointAction, PolicyStore};
use crate::worker::BatchWorker;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use url::Url;

pub struct Correlator {
    config: Arc<AgentConfig>,
    policy: Arc<PolicyStore>,
    worker: Arc<BatchWorker>,
    pipeline: Arc<FlushPipeline>,
    pending: DashMap<String, PendingRequest>,
    self_hosts: Vec<String>,
    boot_pid: u32,
    disabled: Arc<AtomicBool>,
}

impl Correlator {
    pub(crate) fn new(
        config: Arc<AgentConfig>,
        policy: Arc<PolicyStore>,
        worker: Arc<BatchWorker>,
        pipeline: Arc<FlushPipeline>,
        self_hosts: Vec<String>,
        boot_pid: u32,
        disabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            policy,
            worker,
            pipeline,
            pending: DashMap::new(),
            self_hosts,
            boot_pid,
            disabled,
        }
    }

    /// Record the request half of an outbound call. Never fails the caller.
    pub fn cache_request(
        &self,
        request_id: &str,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        headers: &HashMap<String, String>,
    ) {
        if self.disabled.load(Ordering::Relaxed) {
            return;
        }
        if let Err(err) = self.try_cache_request(request_id, method, url, body, headers) {
            error!(request_id, url, error = %err, "failed to cache request");
            self.pipeline.report_error(
                json!({"requestId": request_id, "url": url, "method": method}),
                &err,
            );
        }
    }

    fn try_cache_request(
        &self,
        request_id: &str,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let parsed_url = Url::parse(url)
            .map_err(|err| AgentError::Caching(format!("unparseable url {:?}: {}", url, err)))?;
        let host = parsed_url.host_str().unwrap_or_default().to_string();

        if self.config.use_remote_config && !self.policy.is_loaded() {
            debug!(request_id, "policy not loaded yet, skipping request");
            return Ok(());
        }
        if self.self_hosts.iter().any(|h| h == &host) {
            return Ok(());
        }
        if self.is_ignored_host(&host) {
            debug!(request_id, host = %host, "host explicitly ignored");
            return Ok(());
        }

        let parsed_body = parse_body(body);
        let header_value = headers_to_value(headers);

        let mut metadata = RecordMetadata {
            tags: tags::merged(),
            ..RecordMetadata::default()
        };

        if self.config.use_remote_config {
            if let Some(doc) = self.policy.load() {
                let body_ref = (!parsed_body.is_null()).then_some(&parsed_body);
                if let Some((vendor, endpoint)) =
                    matcher::match_vendor_endpoint(&doc, &parsed_url, body_ref, &header_value)
                {
                    if endpoint.action == EndpointAction::Ignore {
                        debug!(request_id, host = %host, "endpoint marked ignore");
                        return Ok(());
                    }
                    metadata.vendor_id = vendor.vendor_id.clone();
                    metadata.endpoint_id = endpoint.endpoint_id.clone();
                }
            }
        }

        let request = RequestLog {
            id: request_id.to_string(),
            method: method.to_string(),
            url: url.to_string(),
            path: parsed_url.path().to_string(),
            search: parsed_url.query().unwrap_or_default().to_string(),
            body: if self.config.log_request_body {
                parsed_body
            } else {
                Value::Null
            },
            headers: if self.config.log_request_headers {
                header_value
            } else {
                Value::Null
            },
            requested_at: Utc::now(),
        };

        self.pending
            .insert(request_id.to_string(), PendingRequest { request, metadata });
        Ok(())
    }

    /// Record the response half. Unknown request ids are a silent no-op:
    /// the request half was filtered or never captured.
    pub fn cache_response(
        &self,
        request_id: &str,
        body: &[u8],
        headers: &HashMap<String, String>,
        status: u16,
        status_text: Option<&str>,
    ) {
        if self.disabled.load(Ordering::Relaxed) {
            return;
        }
        let Some((_, pending)) = self.pending.remove(request_id) else {
            debug!(request_id, "response without a cached request");
            return;
        };

        let response = ResponseLog {
            body: if self.config.log_response_body {
                parse_body(Some(body))
            } else {
                Value::Null
            },
            headers: if self.config.log_response_headers {
                headers_to_value(headers)
            } else {
                Value::Null
            },
            status,
            status_text: status_text.map(|s| s.to_string()),
            responded_at: Utc::now(),
        };
        let record = pending.into_record(response);

        // A forked child inherits pending requests but no drain thread for
        // them; export synchronously instead of queueing.
        if process::id() != self.boot_pid {
            self.pipeline.flush_single(request_id.to_string(), record);
        } else {
            self.worker.append(request_id.to_string(), record);
        }
    }

    /// Take every unpaired request as a request-only record (forced flush)
    pub fn drain_pending(&self) -> HashMap<String, Record> {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut drained = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some((id, pending)) = self.pending.remove(&id) {
                drained.insert(id, pending.into_unpaired_record());
            }
        }
        drained
    }

    /// Discard every unpaired request
    pub fn clear_pending(&self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn is_ignored_host(&self, host: &str) -> bool {
        self.config
            .ignored_domains
            .iter()
            .any(|domain| host == domain || host.ends_with(&format!(".{}", domain)))
    }
}
