// src/agent/mod.rs
//! Agent lifecycle and the flush pipeline
//!
//! The [`Agent`] wires the capture, policy, worker, and transport layers
//! together and owns the background threads. The [`FlushPipeline`] is the
//! single exit path for records: it gates on policy availability, redacts,
//! and ships, serialized under a flush lock so concurrent flushes never
//! interleave a batch.
//!
//! A 401 from the collector permanently disables the agent: capture becomes
//! a no-op and no further collector traffic is attempted.

pub mod tags;

pub use tags::TagGuard;

use crate::capture::record::Record;
use crate::capture::{Adapter, CaptureHandle, Correlator};
use crate::config::AgentConfig;
use crate::errors::{AgentError, Result};
use crate::policy::PolicyStore;
use crate::redact::Redactor;
use crate::transport::{Api, Credentials, HttpApi};
use crate::worker::{BatchWorker, FlushFn, QueueStats, RepeatingTimer};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Gate, redact, and ship batches to the collector
pub(crate) struct FlushPipeline {
    config: Arc<AgentConfig>,
    api: Arc<dyn Api>,
    policy: Arc<PolicyStore>,
    flush_lock: Mutex<()>,
    disabled: Arc<AtomicBool>,
}

impl FlushPipeline {
    /// Redact and post a batch. `force` waits for the flush lock. A
    /// non-forced attempt that finds another flush in progress is skipped
    /// and hands the untouched entries back to the caller, which must
    /// requeue them.
    pub(crate) fn flush_entries(
        &self,
        entries: HashMap<String, Record>,
        force: bool,
    ) -> Option<HashMap<String, Record>> {
        if entries.is_empty() || self.disabled.load(Ordering::Relaxed) {
            return None;
        }
        let guard = if force {
            Some(self.flush_lock.lock())
        } else {
            self.flush_lock.try_lock()
        };
        let Some(_guard) = guard else {
            debug!("flush already in progress, skipping");
            return Some(entries);
        };

        let policy_doc = self.policy.load();
        if policy_doc.is_none() && self.config.use_remote_config {
            info!(dropped = entries.len(), "no policy loaded, dropping batch");
            return None;
        }

        let records: Vec<Record> = entries.into_values().collect();
        let count = records.len();
        let redactor = Redactor::new(&self.config, policy_doc.as_deref());
        let kept = match redactor.redact_batch(records) {
            Ok(kept) => kept,
            Err(err) => {
                // Nothing from a partially redacted batch ever leaves.
                error!(count, error = %err, "redaction failed, aborting flush");
                self.report_error(json!({"recordCount": count}), &err);
                return None;
            }
        };
        if kept.is_empty() {
            return None;
        }

        let mut events = Vec::with_capacity(kept.len());
        for record in &kept {
            match serde_json::to_value(record) {
                Ok(value) => events.push(value),
                Err(err) => error!(error = %err, "unserializable record, skipping"),
            }
        }

        match self.api.post_events(&events) {
            Ok(()) => debug!(count = events.len(), "shipped batch"),
            Err(AgentError::Unauthorized) => {
                error!("collector rejected credentials, disabling agent");
                self.disable();
            }
            Err(err) => {
                error!(count = events.len(), error = %err, "failed to ship batch");
                self.report_error(json!({"recordCount": events.len()}), &err);
            }
        }
        None
    }

    /// Synchronous single-record export, used from forked children
    pub(crate) fn flush_single(&self, id: String, record: Record) {
        let mut entries = HashMap::with_capacity(1);
        entries.insert(id, record);
        let _ = self.flush_entries(entries, true);
    }

    /// Fetch and install the remote policy. A failure after a document has
    /// been installed keeps the stale document; a failure before then is
    /// reported to the error sink.
    pub(crate) fn refresh_policy(&self) {
        if self.disabled.load(Ordering::Relaxed) {
            return;
        }
        let result = self
            .api
            .fetch_config()
            .and_then(|raw| self.policy.install_raw(&raw));
        match result {
            Ok(()) => debug!("policy refreshed"),
            Err(AgentError::Unauthorized) => {
                error!("collector rejected credentials, disabling agent");
                self.disable();
            }
            Err(err) => {
                if self.policy.is_loaded() {
                    warn!(error = %err, "policy refresh failed, keeping stale document");
                } else {
                    error!(error = %err, "initial policy fetch failed");
                    self.report_error(json!({"operation": "refresh_policy"}), &err);
                }
            }
        }
    }

    /// Best-effort report to the error sink. Failures here are only logged.
    pub(crate) fn report_error(&self, context: Value, err: &AgentError) {
        if self.disabled.load(Ordering::Relaxed) {
            return;
        }
        if matches!(err, AgentError::Unauthorized) {
            self.disable();
            return;
        }
        let payload = json!({"stage": err.stage(), "context": context});
        match self.api.post_errors(payload, &err.to_string()) {
            Ok(()) => {}
            Err(AgentError::Unauthorized) => self.disable(),
            Err(post_err) => warn!(error = %post_err, "failed to report error"),
        }
    }

    fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }
}

struct AgentInner {
    config: Arc<AgentConfig>,
    pipeline: Arc<FlushPipeline>,
    worker: Arc<BatchWorker>,
    correlator: Arc<Correlator>,
    refresher: Mutex<Option<RepeatingTimer>>,
    disabled: Arc<AtomicBool>,
    closed: AtomicBool,
}

/// The traffic-capture agent. Cheap to clone; all clones share one
/// pipeline.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl Agent {
    /// Build an agent talking to a real collector
    pub fn initialize(
        credentials: Credentials,
        base_url: &str,
        config: AgentConfig,
    ) -> Result<Agent> {
        let base = Url::parse(base_url)
            .map_err(|err| AgentError::InvalidConfig(format!("bad base url: {}", err)))?;
        let api = Arc::new(HttpApi::new(
            &base,
            credentials,
            &config.event_sink_endpoint,
            &config.error_sink_endpoint,
            &config.remote_config_endpoint,
        )?);
        Self::with_api(api, &base, config)
    }

    /// Build an agent over a custom transport
    pub fn with_api(api: Arc<dyn Api>, base_url: &Url, config: AgentConfig) -> Result<Agent> {
        config.validate()?;
        let config = Arc::new(config);
        let disabled = Arc::new(AtomicBool::new(false));
        let policy = Arc::new(PolicyStore::new());

        let pipeline = Arc::new(FlushPipeline {
            config: config.clone(),
            api,
            policy: policy.clone(),
            flush_lock: Mutex::new(()),
            disabled: disabled.clone(),
        });

        let flush_pipeline = pipeline.clone();
        let flush_fn: FlushFn = Arc::new(move |batch| {
            let _ = flush_pipeline.flush_entries(batch, true);
        });
        let worker = Arc::new(BatchWorker::new(
            Duration::from_millis(config.flush_interval_ms),
            config.batch_size,
            config.max_queue_size,
            config.run_threads,
            flush_fn,
        ));

        let self_hosts = base_url
            .host_str()
            .map(|host| vec![host.to_string()])
            .unwrap_or_default();
        let correlator = Arc::new(Correlator::new(
            config.clone(),
            policy,
            worker.clone(),
            pipeline.clone(),
            self_hosts,
            process::id(),
            disabled.clone(),
        ));

        let refresher = if config.use_remote_config {
            if config.run_threads {
                let refresh_pipeline = pipeline.clone();
                Some(RepeatingTimer::start(
                    "config-refresh",
                    Duration::from_millis(config.config_interval_ms),
                    move || refresh_pipeline.refresh_policy(),
                ))
            } else {
                // No background threads: fetch once now, callers refresh
                // explicitly afterwards.
                pipeline.refresh_policy();
                None
            }
        } else {
            None
        };

        info!(
            run_threads = config.run_threads,
            use_remote_config = config.use_remote_config,
            "agent initialized"
        );

        Ok(Agent {
            inner: Arc::new(AgentInner {
                config,
                pipeline,
                worker,
                correlator,
                refresher: Mutex::new(refresher),
                disabled,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Handle for adapters to report traffic through
    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle::new(self.inner.correlator.clone())
    }

    /// Install an adapter's hooks
    pub fn register_adapter(&self, adapter: &dyn Adapter) -> Result<()> {
        adapter.install(self.handle())?;
        info!(adapter = adapter.name(), "adapter registered");
        Ok(())
    }

    /// Fetch and install the remote policy now
    pub fn refresh_config(&self) {
        self.inner.pipeline.refresh_policy();
    }

    /// Push a tag layer for the current thread. Requests captured while the
    /// returned guard is live carry the merged tags.
    pub fn tagging(&self, layer: Map<String, Value>) -> TagGuard {
        tags::push_layer(layer)
    }

    /// Flush buffered records. `force` also exports unpaired requests as
    /// request-only records. A non-forced flush that loses the race to a
    /// flush already in progress leaves every record buffered.
    pub fn flush(&self, force: bool) {
        let mut entries = HashMap::new();
        if force {
            entries.extend(self.inner.correlator.drain_pending());
        }
        if !self.inner.config.run_threads {
            entries.extend(self.inner.worker.take_buffered());
        }
        if !entries.is_empty() {
            if let Some(unflushed) = self.inner.pipeline.flush_entries(entries, force) {
                self.inner.worker.restore(unflushed);
            }
        }
        if self.inner.config.run_threads {
            self.inner.worker.flush();
        }
    }

    /// Graceful shutdown: stop the refresher, drain the queue, and export
    /// unpaired requests. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(timer) = self.inner.refresher.lock().take() {
            timer.cancel();
        }
        let mut entries = self.inner.correlator.drain_pending();
        if !self.inner.config.run_threads {
            entries.extend(self.inner.worker.take_buffered());
        }
        self.inner.worker.shutdown(true);
        if !entries.is_empty() {
            let _ = self.inner.pipeline.flush_entries(entries, true);
        }
        info!("agent closed");
    }

    /// Immediate shutdown: stop everything and discard unexported data.
    /// Idempotent.
    pub fn kill(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(timer) = self.inner.refresher.lock().take() {
            timer.cancel();
        }
        self.inner.correlator.clear_pending();
        let _ = self.inner.worker.take_buffered();
        self.inner.worker.shutdown(false);
        info!("agent killed");
    }

    /// Queue pressure counters
    pub fn queue_stats(&self) -> &QueueStats {
        self.inner.worker.stats()
    }

    /// Whether the collector has rejected this agent's credentials
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::Relaxed)
    }
}
