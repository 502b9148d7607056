// Server-side record of one connected player.
//
// A `Session` pairs an identity with the connection it arrived on, the
// player's last-known `PlayerState`, its lifecycle, and (while open) its
// liveness monitor. It is created `Connecting` on admission, becomes `Open`
// when the transport confirms the connection, and is `Closed` exactly once.
//
// Teardown is tied to ownership: `close` cancels the monitor and releases the
// connection, and `Drop` calls `close`, so a session that leaves the registry
// by any path cannot leave a monitor thread or socket behind.

use plaza_protocol::{Identity, PlayerState, RosterEntry};
use tracing::debug;

use crate::liveness::LivenessMonitor;
use crate::transport::{ConnectionId, PeerConnection, StatusCell};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Connecting,
    Open,
    Closing,
    Closed,
}

pub struct Session {
    identity: Identity,
    connection: Box<dyn PeerConnection>,
    pub state: PlayerState,
    lifecycle: Lifecycle,
    monitor: Option<LivenessMonitor>,
}

impl Session {
    pub fn new(identity: Identity, connection: Box<dyn PeerConnection>) -> Self {
        Self {
            identity,
            connection,
            state: PlayerState::default(),
            lifecycle: Lifecycle::Connecting,
            monitor: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle == Lifecycle::Open
    }

    pub fn status(&self) -> StatusCell {
        self.connection.status()
    }

    /// Connecting → Open, taking ownership of the liveness monitor.
    pub fn mark_open(&mut self, monitor: LivenessMonitor) {
        debug_assert_eq!(self.lifecycle, Lifecycle::Connecting);
        self.lifecycle = Lifecycle::Open;
        self.monitor = Some(monitor);
    }

    /// Send a payload without waiting on the peer. Failures are only logged;
    /// the transport reports the broken connection through its own events
    /// or the liveness monitor.
    pub fn send(&mut self, payload: &[u8]) {
        if let Err(e) = self.connection.send(payload) {
            debug!(identity = %self.identity, connection = %self.connection.id(), error = %e, "send failed");
        }
    }

    /// Cancel the monitor and release the connection. Returns false if the
    /// session was already closed.
    pub fn close(&mut self) -> bool {
        if self.lifecycle == Lifecycle::Closed {
            return false;
        }
        self.lifecycle = Lifecycle::Closing;
        if let Some(mut monitor) = self.monitor.take() {
            monitor.cancel();
        }
        self.connection.close();
        self.lifecycle = Lifecycle::Closed;
        true
    }

    pub fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            x: self.state.x,
            y: self.state.y,
            animation: self.state.animation,
            flip: self.state.flip,
            name: self.identity.clone(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
