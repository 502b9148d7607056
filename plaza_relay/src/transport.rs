// Transport abstraction consumed by the relay core.
//
// The core never touches sockets. It holds one boxed `PeerConnection` per
// session (send, close, connectivity status) and receives `RelayEvent`s
// describing connection lifecycle and inbound payloads. `tcp.rs` is the
// bundled implementation; tests use in-memory connections.
//
// Every connection carries a `ConnectionId` assigned by its transport. Events
// are routed by `(identity, connection_id)` so that late events from a
// displaced connection can be told apart from the identity's current one.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use plaza_protocol::Identity;

/// Transport-assigned connection number, unique per transport instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Low-level connectivity as last observed by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionStatus {
    /// True for the states the liveness monitor evicts on.
    pub fn is_lost(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Disconnected => 2,
            Self::Failed => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Disconnected,
            _ => Self::Failed,
        }
    }
}

/// Something the liveness monitor can poll from its own thread.
pub trait ConnectivityProbe: Send + 'static {
    fn status(&self) -> ConnectionStatus;
}

/// Shared, lock-free connectivity cell. The transport's reader and writer
/// update it; the liveness monitor reads it.
#[derive(Clone, Debug)]
pub struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub fn new(status: ConnectionStatus) -> Self {
        Self(Arc::new(AtomicU8::new(status.to_u8())))
    }

    pub fn get(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, status: ConnectionStatus) {
        self.0.store(status.to_u8(), Ordering::SeqCst);
    }

    /// Move to `Disconnected` unless the connection already failed.
    pub fn mark_disconnected(&self) {
        self.settle(ConnectionStatus::Disconnected);
    }

    /// Move to `Failed` unless the connection was already lost. A write
    /// that breaks because the relay closed the socket stays `Disconnected`.
    pub fn mark_failed(&self) {
        self.settle(ConnectionStatus::Failed);
    }

    fn settle(&self, lost: ConnectionStatus) {
        for live in [ConnectionStatus::Connecting, ConnectionStatus::Connected] {
            let _ = self.0.compare_exchange(
                live.to_u8(),
                lost.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }
}

impl ConnectivityProbe for StatusCell {
    fn status(&self) -> ConnectionStatus {
        self.get()
    }
}

/// Exclusively owned handle to one peer connection.
pub trait PeerConnection: Send {
    fn id(&self) -> ConnectionId;

    /// Fire-and-forget send of one payload.
    fn send(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Release the underlying connection. Must be idempotent.
    fn close(&mut self);

    /// Cell the liveness monitor polls.
    fn status(&self) -> StatusCell;
}

/// Everything the relay's dispatcher reacts to.
pub enum RelayEvent {
    /// A peer started connecting under `identity`.
    Incoming {
        identity: Identity,
        connection: Box<dyn PeerConnection>,
    },
    /// The transport confirmed the connection is ready.
    Opened {
        identity: Identity,
        connection_id: ConnectionId,
    },
    Data {
        identity: Identity,
        connection_id: ConnectionId,
        payload: Vec<u8>,
    },
    Closed {
        identity: Identity,
        connection_id: ConnectionId,
    },
    Errored {
        identity: Identity,
        connection_id: ConnectionId,
        detail: String,
    },
    /// Posted by a session's liveness monitor.
    LivenessLost {
        identity: Identity,
        connection_id: ConnectionId,
        status: ConnectionStatus,
    },
}

impl fmt::Debug for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incoming {
                identity,
                connection,
            } => write!(f, "Incoming({identity}, {})", connection.id()),
            Self::Opened {
                identity,
                connection_id,
            } => write!(f, "Opened({identity}, {connection_id})"),
            Self::Data {
                identity,
                connection_id,
                payload,
            } => write!(
                f,
                "Data({identity}, {connection_id}, {} bytes)",
                payload.len()
            ),
            Self::Closed {
                identity,
                connection_id,
            } => write!(f, "Closed({identity}, {connection_id})"),
            Self::Errored {
                identity,
                connection_id,
                detail,
            } => write!(f, "Errored({identity}, {connection_id}, {detail})"),
            Self::LivenessLost {
                identity,
                connection_id,
                status,
            } => write!(f, "LivenessLost({identity}, {connection_id}, {status:?})"),
        }
    }
}
