// Per-session liveness monitor.
//
// Transports do not always report abrupt network loss as a close, so each
// open session gets a small thread that polls its connection's status at a
// fixed interval. When the status reads `Disconnected` or `Failed` the
// monitor calls its `on_lost` callback once (the relay posts a
// `RelayEvent::LivenessLost`, which runs the normal close path) and exits.
//
// Cancellation: the monitor owns the receiving end of a channel whose sender
// lives in `LivenessMonitor`. Dropping or cancelling the monitor drops the
// sender, which wakes the thread's `recv_timeout` with `Disconnected`
// immediately, and then joins the thread. Once `cancel` returns no further
// checks can run.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::transport::{ConnectionStatus, ConnectivityProbe};

/// Handle to a running monitor thread. Owned by its `Session`.
pub struct LivenessMonitor {
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn spawn<P, F>(interval: Duration, probe: P, on_lost: F) -> Self
    where
        P: ConnectivityProbe,
        F: FnOnce(ConnectionStatus) + Send + 'static,
    {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let thread = thread::spawn(move || {
            loop {
                match cancelled.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let status = probe.status();
                        if status.is_lost() {
                            on_lost(status);
                            return;
                        }
                    }
                    // Cancelled, either explicitly or by dropping the handle.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        });
        Self {
            cancel: Some(cancel),
            thread: Some(thread),
        }
    }

    /// Stop the monitor and wait for its thread. Idempotent.
    pub fn cancel(&mut self) {
        drop(self.cancel.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}
