// Relay server: TCP listener plus the single dispatcher loop.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener / connection / writer threads** (`tcp.rs`): accept sockets,
//   run the handshake, post `RelayEvent`s, and drain each connection's
//   outbound queue into its socket.
// - **Liveness monitors** (`liveness.rs`): one per open session, post
//   `LivenessLost` into the same channel.
// - **Relay thread** (`run_relay`): owns the `Relay` and is the only code
//   that touches the registry. Sends only enqueue, so it never blocks on a
//   socket. It waits on the channel with `recv_timeout`, using the next
//   queued departure as the deadline, so grace-delayed `disconnected`
//   broadcasts need no timer thread. Events are handled in bounded batches
//   with a departure check after each.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`; the loop notices
// within `IDLE_WAIT`, closes every session and exits.

use std::iter;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::RelayError;
use crate::observer::{LogObserver, RelayObserver};
use crate::relay::{Relay, RelayTimings};
use crate::tcp::{SocketLimits, spawn_listener};
use crate::transport::RelayEvent;

/// Longest the loop blocks before rechecking `keep_running`.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Events handled back to back before due departures are checked again.
const DISPATCH_BATCH: usize = 64;

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub timings: RelayTimings,
    pub limits: SocketLimits,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7878,
            timings: RelayTimings::default(),
            limits: SocketLimits::default(),
        }
    }
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join_thread();
    }

    /// Block until the relay exits on its own (it only does after `stop`,
    /// so this effectively runs forever for the standalone binary).
    pub fn wait(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Start the relay on a background thread, logging notifications through
/// `tracing`. Returns the bound address (useful with port 0).
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), RelayError> {
    start_relay_with_observer(config, LogObserver)
}

/// Like `start_relay`, with a caller-supplied observer.
pub fn start_relay_with_observer<O>(
    config: RelayConfig,
    observer: O,
) -> Result<(RelayHandle, SocketAddr), RelayError>
where
    O: RelayObserver + 'static,
{
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind_addr).map_err(|source| RelayError::Bind {
        addr: bind_addr.clone(),
        source,
    })?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));

    let (tx, rx) = mpsc::channel();
    spawn_listener(listener, tx.clone(), keep_running.clone(), config.limits)?;
    let relay = Relay::new(config.timings, Box::new(observer), tx);

    let keep_running_loop = keep_running.clone();
    let thread = thread::spawn(move || {
        run_relay(relay, rx, &keep_running_loop);
    });
    info!(%addr, "relay listening");

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(mut relay: Relay, rx: Receiver<RelayEvent>, keep_running: &AtomicBool) {
    while keep_running.load(Ordering::SeqCst) {
        let wait = relay
            .next_deadline()
            .map_or(IDLE_WAIT, |due| {
                due.saturating_duration_since(Instant::now()).min(IDLE_WAIT)
            });

        match rx.recv_timeout(wait) {
            Ok(event) => dispatch_batch(&mut relay, event, &rx),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        relay.fire_due(Instant::now());
    }

    info!("relay stopping");
    relay.shutdown();
}

/// Handle `first` plus at most `DISPATCH_BATCH` events already queued
/// behind it, so a busy queue cannot hold back due departures.
fn dispatch_batch(relay: &mut Relay, first: RelayEvent, rx: &Receiver<RelayEvent>) {
    for event in iter::once(first).chain(rx.try_iter().take(DISPATCH_BATCH)) {
        debug!(?event, "dispatch");
        relay.handle_event(event, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use plaza_protocol::{ClientEvent, Identity, ServerEvent, StateUpdate};

    use super::*;
    use crate::observer::Notification;
    use crate::test_support::MockPeer;
    use crate::transport::ConnectionId;

    #[test]
    fn departures_fire_between_batches_of_a_busy_queue() {
        let (tx, rx) = mpsc::channel();
        let (notify_tx, _notifications) = mpsc::channel::<Notification>();
        let timings = RelayTimings {
            liveness_interval: Duration::from_secs(60),
            disconnect_grace: Duration::ZERO,
        };
        let mut relay = Relay::new(timings, Box::new(notify_tx), tx.clone());

        let watcher = MockPeer::new(1);
        let leaver = MockPeer::new(2);
        for (name, peer) in [("W", &watcher), ("L", &leaver)] {
            relay.admit(name.into(), peer.connection());
            relay.open(&name.into(), peer.id());
        }
        relay.close(&"L".into(), leaver.id(), Instant::now());

        // A backlog far longer than one batch, from a peer that never joined.
        let noise = ClientEvent::Update(StateUpdate::default()).encode().unwrap();
        for _ in 0..DISPATCH_BATCH * 10 {
            tx.send(RelayEvent::Data {
                identity: Identity::from("Z"),
                connection_id: ConnectionId(99),
                payload: noise.clone(),
            })
            .unwrap();
        }

        let first = rx.recv().unwrap();
        dispatch_batch(&mut relay, first, &rx);
        relay.fire_due(Instant::now());

        assert_eq!(
            watcher.take_events(),
            vec![ServerEvent::Disconnected("L".into())]
        );
        assert!(rx.try_recv().is_ok(), "batch drained the whole backlog");
    }
}
