// In-memory connections for unit tests.
//
// `MockPeer` is the test's view of one connection: it can mint the boxed
// `PeerConnection` handed to the relay, then inspect what the relay sent and
// whether it closed the connection, and flip the connectivity status the
// liveness monitor sees.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use plaza_protocol::ServerEvent;

use crate::transport::{ConnectionId, ConnectionStatus, PeerConnection, StatusCell};

#[derive(Clone)]
pub struct MockPeer {
    id: ConnectionId,
    outbox: Arc<Mutex<Vec<Vec<u8>>>>,
    closes: Arc<AtomicUsize>,
    status: StatusCell,
}

impl MockPeer {
    pub fn new(id: u64) -> Self {
        Self {
            id: ConnectionId(id),
            outbox: Arc::default(),
            closes: Arc::default(),
            status: StatusCell::new(ConnectionStatus::Connecting),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connection(&self) -> Box<dyn PeerConnection> {
        Box::new(self.clone())
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.set(status);
    }

    pub fn is_closed(&self) -> bool {
        self.closes.load(Ordering::SeqCst) > 0
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Everything sent so far, decoded. Clears the outbox.
    pub fn take_events(&self) -> Vec<ServerEvent> {
        let frames = std::mem::take(&mut *self.outbox.lock().unwrap());
        frames
            .iter()
            .filter_map(|frame| ServerEvent::decode(frame).unwrap())
            .collect()
    }
}

impl PeerConnection for MockPeer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.outbox.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.status.mark_disconnected();
    }

    fn status(&self) -> StatusCell {
        self.status.clone()
    }
}
