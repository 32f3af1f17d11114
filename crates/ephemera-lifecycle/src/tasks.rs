//! Task registry for one epoch monitor.
//!
//! Tracks the monitor's timer and event tasks and the shutdown signal they
//! share. Tasks race the signal only while idle, waiting on a sleep or the
//! next event. A transition already in progress is not raced, so a running
//! purge completes before the task exits.
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::Mutex` for JoinHandle storage because:
//! 1. Operations are O(1) push or O(n) drain (shutdown only)
//! 2. Lock is never held across `.await` points
//! 3. No I/O or async work inside lock scope

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub(crate) struct MonitorTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorTasks {
    pub(crate) fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.handles.lock().push(handle);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown. Safe to call repeatedly and from the monitor's own
    /// tasks.
    pub(crate) fn cancel(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Abort every task without waiting. Used from `Drop`.
    pub(crate) fn abort(&self) {
        self.cancel();
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }

    /// Abort every task and wait until each has stopped.
    ///
    /// Must not be called from one of the monitor's own tasks.
    pub(crate) async fn abort_and_join(&self) {
        self.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub(crate) fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl Default for MonitorTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MonitorTasks {
    fn drop(&mut self) {
        self.abort();
    }
}
