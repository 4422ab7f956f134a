// src/worker/batch.rs
//! Batching worker
//!
//! Owns the bounded queue between capture and export. In threaded mode a
//! dedicated drain thread coalesces entries into batches and hands them to
//! the flush callback when the batch size is reached, the flush interval
//! elapses, or a flush sentinel arrives. In non-threaded mode entries are
//! buffered in-process and drained only by explicit flush calls.
//!
//! The drain thread does not survive a fork: `append` in a child process
//! detects the pid change and respawns the thread with a fresh channel, so
//! the child never enqueues into a channel nobody drains.

use crate::capture::record::Record;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Callback invoked with each drained batch, keyed by request id
pub type FlushFn = Arc<dyn Fn(HashMap<String, Record>) + Send + Sync>;

enum WorkerMessage {
    Entry(String, Record),
    Flush,
    Shutdown { flush: bool },
}

/// Counters for queue pressure, readable without locking
#[derive(Debug, Default)]
pub struct QueueStats {
    pushed: AtomicU64,
    dropped: AtomicU64,
    rejected_flushes: AtomicU64,
}

impl QueueStats {
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Explicit flush requests that could not be queued
    pub fn rejected_flushes(&self) -> u64 {
        self.rejected_flushes.load(Ordering::Relaxed)
    }
}

struct Inner {
    tx: Option<Sender<WorkerMessage>>,
    thread: Option<JoinHandle<()>>,
    pid: u32,
    buffer: HashMap<String, Record>,
}

pub struct BatchWorker {
    flush_interval: Duration,
    batch_size: usize,
    queue_capacity: usize,
    threaded: bool,
    flush_fn: FlushFn,
    inner: Mutex<Inner>,
    stats: QueueStats,
}

impl BatchWorker {
    pub fn new(
        flush_interval: Duration,
        batch_size: usize,
        queue_capacity: usize,
        threaded: bool,
        flush_fn: FlushFn,
    ) -> Self {
        Self {
            flush_interval,
            batch_size,
            queue_capacity,
            threaded,
            flush_fn,
            inner: Mutex::new(Inner {
                tx: None,
                thread: None,
                pid: process::id(),
                buffer: HashMap::new(),
            }),
            stats: QueueStats::default(),
        }
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Enqueue a record. Never blocks the caller: when the queue or buffer
    /// is full the newest record is dropped and counted.
    pub fn append(&self, id: String, record: Record) {
        let mut inner = self.inner.lock();

        if !self.threaded {
            if inner.buffer.len() >= self.queue_capacity {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(request_id = %id, "buffer full, dropping record");
                return;
            }
            inner.buffer.insert(id, record);
            self.stats.pushed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.ensure_running(&mut inner);
        let Some(tx) = inner.tx.as_ref() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match tx.try_send(WorkerMessage::Entry(id, record)) {
            Ok(()) => {
                self.stats.pushed.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("queue full, dropping record");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!("drain thread gone, dropping record");
            }
        }
    }

    /// Ask the drain thread to flush whatever it is holding. Rejected when
    /// the queue is full; the interval drain still picks the records up.
    pub fn flush(&self) {
        let inner = self.inner.lock();
        if let Some(tx) = inner.tx.as_ref() {
            if tx.try_send(WorkerMessage::Flush).is_err() {
                self.stats.rejected_flushes.fetch_add(1, Ordering::Relaxed);
                warn!("queue full, flush request dropped");
            }
        }
    }

    /// Take the non-threaded buffer contents
    pub fn take_buffered(&self) -> HashMap<String, Record> {
        std::mem::take(&mut self.inner.lock().buffer)
    }

    /// Put records from a skipped flush attempt back into the buffer.
    /// A record captured since the take wins over its returned copy.
    pub fn restore(&self, entries: HashMap<String, Record>) {
        let mut inner = self.inner.lock();
        for (id, record) in entries {
            inner.buffer.entry(id).or_insert(record);
        }
    }

    /// Stop the drain thread, optionally flushing what remains first.
    /// In a forked child the parent's thread does not exist here, so the
    /// handle is discarded without joining.
    pub fn shutdown(&self, flush: bool) {
        let mut inner = self.inner.lock();
        let tx = inner.tx.take();
        let thread = inner.thread.take();

        if inner.pid != process::id() {
            return;
        }
        if let Some(tx) = tx {
            let _ = tx.send(WorkerMessage::Shutdown { flush });
        }
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("drain thread panicked during shutdown");
            }
        }
    }

    /// Spawn or respawn the drain thread when missing, finished, or
    /// inherited across a fork.
    fn ensure_running(&self, inner: &mut Inner) {
        let current_pid = process::id();
        let alive = inner.pid == current_pid
            && inner.tx.is_some()
            && inner
                .thread
                .as_ref()
                .map(|t| !t.is_finished())
                .unwrap_or(false);
        if alive {
            return;
        }

        if inner.pid != current_pid {
            debug!(parent = inner.pid, child = current_pid, "respawning drain thread after fork");
        }

        let (tx, rx) = bounded(self.queue_capacity);
        let interval = self.flush_interval;
        let batch_size = self.batch_size;
        let flush_fn = self.flush_fn.clone();
        let spawned = thread::Builder::new()
            .name("wiretap-drain".to_string())
            .spawn(move || run_loop(rx, interval, batch_size, flush_fn));

        match spawned {
            Ok(thread) => {
                inner.tx = Some(tx);
                inner.thread = Some(thread);
                inner.pid = current_pid;
            }
            Err(err) => {
                error!(error = %err, "failed to spawn drain thread");
                inner.tx = None;
                inner.thread = None;
                inner.pid = current_pid;
            }
        }
    }
}

fn run_loop(
    rx: Receiver<WorkerMessage>,
    flush_interval: Duration,
    batch_size: usize,
    flush_fn: FlushFn,
) {
    let mut batch: HashMap<String, Record> = HashMap::new();
    loop {
        match rx.recv_timeout(flush_interval) {
            Ok(WorkerMessage::Entry(id, record)) => {
                batch.insert(id, record);
                let mut force = false;
                let mut terminate = None;
                // Coalesce whatever is already queued before flushing.
                while batch.len() < batch_size {
                    match rx.try_recv() {
                        Ok(WorkerMessage::Entry(id, record)) => {
                            batch.insert(id, record);
                        }
                        Ok(WorkerMessage::Flush) => {
                            force = true;
                            break;
                        }
                        Ok(WorkerMessage::Shutdown { flush }) => {
                            terminate = Some(flush);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                if let Some(flush) = terminate {
                    if flush && !batch.is_empty() {
                        flush_fn(std::mem::take(&mut batch));
                    }
                    return;
                }
                if force || batch.len() >= batch_size {
                    flush_fn(std::mem::take(&mut batch));
                }
            }
            Ok(WorkerMessage::Flush) => {
                if !batch.is_empty() {
                    flush_fn(std::mem::take(&mut batch));
                }
            }
            Ok(WorkerMessage::Shutdown { flush }) => {
                if flush {
                    while let Ok(message) = rx.try_recv() {
                        if let WorkerMessage::Entry(id, record) = message {
                            batch.insert(id, record);
                        }
                    }
                    if !batch.is_empty() {
                        flush_fn(std::mem::take(&mut batch));
                    }
                }
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !batch.is_empty() {
                    flush_fn(std::mem::take(&mut batch));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if !batch.is_empty() {
                    flush_fn(std::mem::take(&mut batch));
                }
                return;
            }
        }
    }
}
