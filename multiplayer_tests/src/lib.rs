// Test-only game client and relay harness for multiplayer integration tests.
//
// `TestGameClient` wraps the real `NetClient` (from `plaza_relay::client`)
// and keeps the same "remote avatars" view a game keeps: every roster
// replaces the set of other players, every `disconnected` removes one. The
// only test-specific code is the blocking poll loops around
// `NetClient::poll()`.
//
// `TestRelay` starts a real relay on a free port with an `mpsc` observer so
// tests can wait for a player to be admitted before exercising it.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use plaza_protocol::{Identity, RosterEntry, ServerEvent};
use plaza_relay::client::NetClient;
use plaza_relay::{Notification, RelayConfig, RelayHandle, RelayTimings, start_relay_with_observer};

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A relay running on localhost plus its notification stream.
pub struct TestRelay {
    handle: Option<RelayHandle>,
    pub addr: SocketAddr,
    notifications: Receiver<Notification>,
}

impl TestRelay {
    pub fn start(timings: RelayTimings) -> Self {
        let config = RelayConfig {
            port: 0,
            timings,
            ..RelayConfig::default()
        };
        let (tx, notifications) = mpsc::channel();
        let (handle, addr) =
            start_relay_with_observer(config, tx).expect("TestRelay::start failed");
        Self {
            handle: Some(handle),
            addr,
            notifications,
        }
    }

    /// Connect a client and block until the relay reports it connected.
    pub fn join(&self, name: &str) -> TestGameClient {
        let client = TestGameClient::connect(self.addr, name);
        self.wait_for(&Notification::Connected(name.into()));
        client
    }

    /// Block until `expected` is observed, skipping anything else.
    pub fn wait_for(&self, expected: &Notification) {
        let start = Instant::now();
        while start.elapsed() < POLL_TIMEOUT {
            match self.notifications.recv_timeout(POLL_INTERVAL) {
                Ok(n) if &n == expected => return,
                _ => {}
            }
        }
        panic!("timed out waiting for {expected:?}");
    }

    /// Everything observed so far that nobody waited for.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.notifications.try_iter().collect()
    }

    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

/// A test game client wrapping a real NetClient.
pub struct TestGameClient {
    client: NetClient,
    avatars: BTreeMap<Identity, RosterEntry>,
    departures: Vec<Identity>,
}

impl TestGameClient {
    pub fn connect(addr: SocketAddr, name: &str) -> Self {
        let client =
            NetClient::connect(&addr.to_string(), name).expect("TestGameClient::connect failed");
        Self {
            client,
            avatars: BTreeMap::new(),
            departures: Vec::new(),
        }
    }

    pub fn move_to(&mut self, x: f64, y: f64, animation: i64) {
        self.client
            .send_update(x, y, animation)
            .expect("send_update failed");
    }

    pub fn face(&mut self, facing: i64) {
        self.client.send_flip(facing).expect("send_flip failed");
    }

    pub fn send_raw(&mut self, payload: &[u8]) {
        self.client.send_raw(payload).expect("send_raw failed");
    }

    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }

    /// Remote avatars as of the last poll.
    pub fn avatars(&self) -> &BTreeMap<Identity, RosterEntry> {
        &self.avatars
    }

    /// Identities announced as departed, in arrival order.
    pub fn departures(&self) -> &[Identity] {
        &self.departures
    }

    /// Apply every pending relay event. Returns how many arrived.
    pub fn drain(&mut self) -> usize {
        let events = self.client.poll();
        let count = events.len();
        for event in events {
            match event {
                ServerEvent::Roster(entries) => {
                    self.avatars = entries
                        .into_iter()
                        .map(|entry| (entry.name.clone(), entry))
                        .collect();
                }
                ServerEvent::Disconnected(identity) => {
                    self.avatars.remove(&identity);
                    self.departures.push(identity);
                }
            }
        }
        count
    }

    /// Blocking poll until `done` holds for this client's view.
    pub fn poll_until(&mut self, what: &str, done: impl Fn(&Self) -> bool) {
        let start = Instant::now();
        loop {
            self.drain();
            if done(self) {
                return;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking poll until `name`'s avatar is at `(x, y)`.
    pub fn poll_until_sees(&mut self, name: &str, x: f64, y: f64) -> RosterEntry {
        let identity = Identity::from(name);
        self.poll_until(&format!("{name} at ({x}, {y})"), |c| {
            c.avatars
                .get(&identity)
                .is_some_and(|e| e.x == x && e.y == y)
        });
        self.avatars[&identity].clone()
    }

    /// Blocking poll until the relay announces `name` left.
    pub fn poll_until_departed(&mut self, name: &str) {
        let identity = Identity::from(name);
        self.poll_until(&format!("{name} to depart"), |c| {
            c.departures.contains(&identity)
        });
    }
}
