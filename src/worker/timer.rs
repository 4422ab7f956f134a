// src/worker/timer.rs
//! Repeating background timer
//!
//! Runs a closure immediately on start and then once per interval on a
//! dedicated thread until cancelled. Cancellation is idempotent and joins
//! the thread so no tick runs after `cancel` returns.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

pub struct RepeatingTimer {
    name: &'static str,
    inner: Mutex<Option<TimerHandle>>,
}

struct TimerHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl RepeatingTimer {
    /// Spawn the timer thread. The closure runs once immediately, then once
    /// per interval.
    pub fn start<F>(name: &'static str, interval: Duration, tick: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let spawned = thread::Builder::new()
            .name(format!("wiretap-{}", name))
            .spawn(move || {
                tick();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            });

        let inner = match spawned {
            Ok(thread) => Some(TimerHandle { stop_tx, thread }),
            Err(err) => {
                error!(timer = name, error = %err, "failed to spawn timer thread");
                None
            }
        };

        Self {
            name,
            inner: Mutex::new(inner),
        }
    }

    /// Stop the timer and join its thread. Safe to call more than once.
    pub fn cancel(&self) {
        let handle = self.inner.lock().take();
        let Some(TimerHandle { stop_tx, thread }) = handle else {
            return;
        };
        let _ = stop_tx.send(());
        if thread.join().is_err() {
            error!(timer = self.name, "timer thread panicked");
        } else {
            debug!(timer = self.name, "timer cancelled");
        }
    }
}

impl Drop for RepeatingTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
