// The relay core: admission, lifecycle, state ingestion, fan-out.
//
// `Relay` owns the `Registry` and is driven by one thread (see `server.rs`)
// feeding it `RelayEvent`s one at a time, so nothing in here locks. Each
// handler finishes before the next event is looked at; sends are
// fire-and-forget.
//
// Lifecycle per connection:
// - `Incoming`  → `admit`: an existing session for the identity is closed and
//   replaced (last writer wins). The new session starts `Connecting`.
// - `Opened`    → `open`: only the identity's current session may open. It
//   gets a liveness monitor and observers hear `connected`.
// - `Data`      → `ingest`: `update` overwrites position/animation and fans
//   out rosters; `flip` only overwrites facing. Anything undecodable is
//   dropped and the session stays open.
// - `Closed` / `LivenessLost` → `close`: remove, release, notify, and queue a
//   `disconnected` broadcast after the grace delay so a final in-flight
//   update can land first.
// - `Errored`   → `fail`: remove and release immediately, report the detail,
//   tell the other players right away.
//
// Every removal goes through `Registry::remove_current`, which matches the
// connection id. A second close/error for the same connection, or any event
// from a displaced connection, finds nothing and is a no-op.

use std::collections::VecDeque;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use plaza_protocol::{ClientEvent, Identity, RosterEntry, ServerEvent};
use tracing::{debug, info, warn};

use crate::liveness::LivenessMonitor;
use crate::observer::{Notification, RelayObserver};
use crate::registry::Registry;
use crate::session::{Lifecycle, Session};
use crate::transport::{ConnectionId, PeerConnection, RelayEvent};

/// Timing knobs for the relay core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayTimings {
    /// How often each open session's connectivity is polled.
    pub liveness_interval: Duration,
    /// Delay between a player leaving and the others being told.
    pub disconnect_grace: Duration,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            liveness_interval: Duration::from_millis(500),
            disconnect_grace: Duration::from_millis(500),
        }
    }
}

/// A queued `disconnected` broadcast.
struct Departure {
    due: Instant,
    identity: Identity,
}

pub struct Relay {
    registry: Registry,
    observer: Box<dyn RelayObserver>,
    /// Handed to liveness monitors so they can post back into the queue.
    events: Sender<RelayEvent>,
    timings: RelayTimings,
    departures: VecDeque<Departure>,
}

impl Relay {
    pub fn new(
        timings: RelayTimings,
        observer: Box<dyn RelayObserver>,
        events: Sender<RelayEvent>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            observer,
            events,
            timings,
            departures: VecDeque::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Every open player, for roster displays.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.registry
            .open_sessions()
            .map(Session::roster_entry)
            .collect()
    }

    /// Dispatch one event. `now` anchors any grace timer the event starts.
    pub fn handle_event(&mut self, event: RelayEvent, now: Instant) {
        match event {
            RelayEvent::Incoming {
                identity,
                connection,
            } => self.admit(identity, connection),
            RelayEvent::Opened {
                identity,
                connection_id,
            } => self.open(&identity, connection_id),
            RelayEvent::Data {
                identity,
                connection_id,
                payload,
            } => self.ingest(&identity, connection_id, &payload),
            RelayEvent::Closed {
                identity,
                connection_id,
            } => self.close(&identity, connection_id, now),
            RelayEvent::Errored {
                identity,
                connection_id,
                detail,
            } => self.fail(&identity, connection_id, &detail),
            RelayEvent::LivenessLost {
                identity,
                connection_id,
                status,
            } => {
                if self.registry.current(&identity, connection_id).is_some() {
                    warn!(%identity, connection = %connection_id, ?status, "liveness check failed");
                }
                self.close(&identity, connection_id, now);
            }
        }
    }

    /// Register a new connection for `identity`, closing whatever session
    /// held that identity before. Never fails.
    pub fn admit(&mut self, identity: Identity, connection: Box<dyn PeerConnection>) {
        let connection_id = connection.id();
        if let Some(mut displaced) = self.registry.remove(&identity) {
            if displaced.lifecycle() != Lifecycle::Closed {
                info!(
                    %identity,
                    displaced = %displaced.connection_id(),
                    by = %connection_id,
                    "identity reconnected, closing previous session"
                );
                displaced.close();
            }
        }
        debug!(%identity, connection = %connection_id, "admitted");
        self.registry.insert(Session::new(identity, connection));
    }

    /// Mark the identity's current session open and start its monitor.
    pub fn open(&mut self, identity: &Identity, connection_id: ConnectionId) {
        let Some(session) = self.registry.current_mut(identity, connection_id) else {
            debug!(%identity, connection = %connection_id, "open for a displaced connection ignored");
            return;
        };
        if session.lifecycle() != Lifecycle::Connecting {
            return;
        }

        let events = self.events.clone();
        let owner = identity.clone();
        let monitor = LivenessMonitor::spawn(
            self.timings.liveness_interval,
            session.status(),
            move |status| {
                let _ = events.send(RelayEvent::LivenessLost {
                    identity: owner,
                    connection_id,
                    status,
                });
            },
        );
        session.mark_open(monitor);
        self.observer
            .notify(Notification::Connected(identity.clone()));
    }

    /// Normal close path, shared by transport close and liveness failure.
    /// A session that never opened is released without any announcement.
    pub fn close(&mut self, identity: &Identity, connection_id: ConnectionId, now: Instant) {
        let Some(mut session) = self.registry.remove_current(identity, connection_id) else {
            return;
        };
        let was_open = session.is_open();
        if !session.close() || !was_open {
            return;
        }
        self.observer
            .notify(Notification::Disconnected(identity.clone()));
        self.departures.push_back(Departure {
            due: now + self.timings.disconnect_grace,
            identity: identity.clone(),
        });
    }

    /// Error path: no grace delay.
    pub fn fail(&mut self, identity: &Identity, connection_id: ConnectionId, detail: &str) {
        let Some(mut session) = self.registry.remove_current(identity, connection_id) else {
            debug!(%identity, connection = %connection_id, detail, "error for an inactive connection ignored");
            return;
        };
        let was_open = session.is_open();
        if !session.close() {
            return;
        }
        self.observer.notify(Notification::Diagnostic(format!(
            "connection error for {identity}: {detail}"
        )));
        if was_open {
            self.observer
                .notify(Notification::Disconnected(identity.clone()));
            self.announce_departure(identity);
        }
    }

    /// Apply one inbound payload from `identity`'s current, open session.
    pub fn ingest(&mut self, identity: &Identity, connection_id: ConnectionId, payload: &[u8]) {
        let Some(session) = self.registry.current_mut(identity, connection_id) else {
            return;
        };
        if !session.is_open() {
            return;
        }
        match ClientEvent::decode(payload) {
            Ok(Some(ClientEvent::Update(update))) => {
                session.state.apply_update(&update);
                self.broadcast(identity);
            }
            Ok(Some(ClientEvent::Flip(facing))) => session.state.flip = facing,
            Ok(Some(ClientEvent::Hello(_))) | Ok(None) => {
                debug!(%identity, "ignoring message without a state event");
            }
            Err(e) => debug!(%identity, error = %e, "dropping malformed message"),
        }
    }

    /// Push rosters after `origin` changed: the origin learns about every
    /// other player, and every other open player receives its own view,
    /// which now includes the origin's new state. No recipient ever appears
    /// in its own roster.
    pub fn broadcast(&mut self, origin: &Identity) {
        let recipients = self.registry.open_identities();
        debug!(%origin, recipients = recipients.len(), "fanning out rosters");
        for recipient in recipients {
            let roster = ServerEvent::Roster(self.registry.roster_excluding(&recipient));
            self.send_to(&recipient, &roster);
        }
    }

    /// When the next queued departure is due, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.departures.front().map(|d| d.due)
    }

    /// Send every departure broadcast that is due at `now`.
    pub fn fire_due(&mut self, now: Instant) {
        while self.departures.front().is_some_and(|d| d.due <= now) {
            let Some(departure) = self.departures.pop_front() else {
                break;
            };
            if self
                .registry
                .get(&departure.identity)
                .is_some_and(Session::is_open)
            {
                debug!(identity = %departure.identity, "player back before grace expired, not announcing departure");
                continue;
            }
            self.announce_departure(&departure.identity);
        }
    }

    /// Close every session. Used when the relay stops. Only sessions that
    /// were open produce a `disconnected` notification.
    pub fn shutdown(&mut self) {
        for mut session in self.registry.drain() {
            let was_open = session.is_open();
            if session.close() && was_open {
                self.observer
                    .notify(Notification::Disconnected(session.identity().clone()));
            }
        }
        self.departures.clear();
    }

    fn announce_departure(&mut self, departed: &Identity) {
        let event = ServerEvent::Disconnected(departed.clone());
        for recipient in self.registry.open_identities() {
            if &recipient != departed {
                self.send_to(&recipient, &event);
            }
        }
    }

    fn send_to(&mut self, recipient: &Identity, event: &ServerEvent) {
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%recipient, error = %e, "could not encode outbound event");
                return;
            }
        };
        if let Some(session) = self.registry.get_mut(recipient) {
            session.send(&payload);
        }
    }
}
