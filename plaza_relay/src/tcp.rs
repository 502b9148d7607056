// TCP implementation of the peer transport.
//
// Threads:
// - **Listener** (`spawn_listener`): non-blocking `accept()` loop that checks
//   `keep_running` between polls and hands each socket to its own
//   connection thread.
// - **Connection thread** (one per socket): reads the `hello` handshake
//   under a timeout, posts `Incoming` then `Opened`, and turns into the
//   reader loop, posting `Data` per frame and `Closed` (EOF) or `Errored`
//   (any other I/O error) when the socket ends.
// - **Writer thread** (one per socket): drains the connection's bounded
//   outbox into the socket. The dispatcher only ever enqueues, so a peer
//   that stops reading cannot stall anyone else.
//
// All three share a `StatusCell`. The reader marks it on EOF/error. The
// writer marks it `Failed` when a write breaks or outlasts the write
// timeout, and the liveness monitor evicts the session from there. While a
// write is stuck, frames beyond `OUTBOX_CAPACITY` are dropped; rosters are
// snapshots, so the next one supersedes anything lost.

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use plaza_protocol::{
    ClientEvent, Identity, MAX_FRAME_SIZE, MAX_IDENTITY_LEN, ProtocolError, read_frame,
    write_frame,
};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::transport::{ConnectionId, ConnectionStatus, PeerConnection, RelayEvent, StatusCell};

/// Sleep between non-blocking accept polls.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Frames queued per connection before sends start dropping.
const OUTBOX_CAPACITY: usize = 256;

/// Per-socket limits applied to every accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketLimits {
    /// How long a new socket may take to send its `hello`.
    pub handshake_timeout: Duration,
    /// How long one outbound write may block before the peer counts as failed.
    pub write_timeout: Duration,
}

impl Default for SocketLimits {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake read failed: {0}")]
    Io(#[from] io::Error),
    #[error("handshake undecodable: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("first message was not a hello")]
    NotHello,
    #[error("player name of {0} bytes exceeds {MAX_IDENTITY_LEN}")]
    NameTooLong(usize),
}

/// Write side of an accepted socket. `send` only enqueues; the writer
/// thread does the blocking I/O.
pub struct TcpConnection {
    id: ConnectionId,
    outbox: Option<SyncSender<Vec<u8>>>,
    socket: TcpStream,
    status: StatusCell,
}

impl TcpConnection {
    /// Split off a writer thread for `socket`. Writes that block longer than
    /// `write_timeout` fail the connection.
    fn spawn(
        id: ConnectionId,
        socket: TcpStream,
        status: StatusCell,
        write_timeout: Duration,
    ) -> io::Result<Self> {
        let write_half = socket.try_clone()?;
        write_half.set_write_timeout(Some(write_timeout))?;
        let (outbox, frames) = mpsc::sync_channel(OUTBOX_CAPACITY);
        let writer_status = status.clone();
        thread::spawn(move || write_loop(write_half, frames, &writer_status, id));
        Ok(Self {
            id,
            outbox: Some(outbox),
            socket,
            status,
        })
    }
}

impl PeerConnection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds {MAX_FRAME_SIZE}", payload.len()),
            ));
        }
        let Some(outbox) = &self.outbox else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed"));
        };
        match outbox.try_send(payload.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "outbox full, frame dropped",
            )),
            Err(TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer stopped",
            )),
        }
    }

    fn close(&mut self) {
        self.status.mark_disconnected();
        // Dropping the outbox ends the writer once it is idle; the shutdown
        // unblocks a stuck write and the reader thread, which exits on EOF.
        self.outbox = None;
        let _ = self.socket.shutdown(Shutdown::Both);
    }

    fn status(&self) -> StatusCell {
        self.status.clone()
    }
}

fn write_loop(
    socket: TcpStream,
    frames: Receiver<Vec<u8>>,
    status: &StatusCell,
    connection_id: ConnectionId,
) {
    let mut writer = BufWriter::new(socket);
    for frame in frames {
        if let Err(e) = write_frame(&mut writer, &frame) {
            if !status.get().is_lost() {
                debug!(connection = %connection_id, error = %e, "write failed, marking connection failed");
            }
            status.mark_failed();
            return;
        }
    }
}

/// Accept connections until `keep_running` is cleared.
pub fn spawn_listener(
    listener: TcpListener,
    events: Sender<RelayEvent>,
    keep_running: Arc<AtomicBool>,
    limits: SocketLimits,
) -> io::Result<JoinHandle<()>> {
    listener.set_nonblocking(true)?;
    Ok(thread::spawn(move || {
        let mut next_id = 0u64;
        while keep_running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    next_id += 1;
                    let id = ConnectionId(next_id);
                    let events = events.clone();
                    thread::spawn(move || {
                        serve_connection(stream, peer, id, &events, limits);
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed, listener stopping");
                    break;
                }
            }
        }
    }))
}

fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    events: &Sender<RelayEvent>,
    limits: SocketLimits,
) {
    stream.set_nonblocking(false).ok();
    stream.set_read_timeout(Some(limits.handshake_timeout)).ok();
    let mut reader = match stream.try_clone() {
        Ok(s) => BufReader::new(s),
        Err(e) => {
            debug!(%peer, error = %e, "could not split socket");
            return;
        }
    };

    let identity = match handshake(&mut reader, peer) {
        Ok(identity) => identity,
        Err(e) => {
            debug!(%peer, error = %e, "dropping connection before admission");
            return;
        }
    };
    reader.get_ref().set_read_timeout(None).ok();
    debug!(%peer, %identity, connection = %id, "handshake complete");

    let status = StatusCell::new(ConnectionStatus::Connecting);
    let connection = match TcpConnection::spawn(id, stream, status.clone(), limits.write_timeout) {
        Ok(connection) => connection,
        Err(e) => {
            debug!(%peer, error = %e, "could not start writer");
            return;
        }
    };
    let incoming = RelayEvent::Incoming {
        identity: identity.clone(),
        connection: Box::new(connection),
    };
    if events.send(incoming).is_err() {
        return;
    }
    status.set(ConnectionStatus::Connected);
    let opened = RelayEvent::Opened {
        identity: identity.clone(),
        connection_id: id,
    };
    if events.send(opened).is_err() {
        return;
    }

    read_loop(reader, identity, id, &status, events);
}

/// The identity is the hello's name, or the peer address when it is blank.
/// Names longer than `MAX_IDENTITY_LEN` bytes are refused.
fn handshake(
    reader: &mut BufReader<TcpStream>,
    peer: SocketAddr,
) -> Result<Identity, HandshakeError> {
    let frame = read_frame(reader)?;
    match ClientEvent::decode(&frame)? {
        Some(ClientEvent::Hello(name)) if name.trim().is_empty() => Ok(Identity(peer.to_string())),
        Some(ClientEvent::Hello(name)) if name.len() > MAX_IDENTITY_LEN => {
            Err(HandshakeError::NameTooLong(name.len()))
        }
        Some(ClientEvent::Hello(name)) => Ok(Identity(name)),
        _ => Err(HandshakeError::NotHello),
    }
}

fn read_loop(
    mut reader: BufReader<TcpStream>,
    identity: Identity,
    connection_id: ConnectionId,
    status: &StatusCell,
    events: &Sender<RelayEvent>,
) {
    loop {
        match read_frame(&mut reader) {
            Ok(payload) => {
                trace!(%identity, bytes = payload.len(), "frame received");
                let data = RelayEvent::Data {
                    identity: identity.clone(),
                    connection_id,
                    payload,
                };
                if events.send(data).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                status.mark_disconnected();
                let _ = events.send(RelayEvent::Closed {
                    identity,
                    connection_id,
                });
                break;
            }
            Err(e) => {
                status.set(ConnectionStatus::Failed);
                let _ = events.send(RelayEvent::Errored {
                    identity,
                    connection_id,
                    detail: e.to_string(),
                });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::mpsc::{self, Receiver};
    use std::time::Instant;

    use plaza_protocol::StateUpdate;

    use super::*;

    struct Listening {
        addr: SocketAddr,
        events: Receiver<RelayEvent>,
        keep_running: Arc<AtomicBool>,
    }

    impl Drop for Listening {
        fn drop(&mut self) {
            self.keep_running.store(false, Ordering::SeqCst);
        }
    }

    fn listen() -> Listening {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, events) = mpsc::channel();
        let keep_running = Arc::new(AtomicBool::new(true));
        let limits = SocketLimits {
            handshake_timeout: Duration::from_millis(300),
            write_timeout: Duration::from_millis(300),
        };
        spawn_listener(listener, tx, keep_running.clone(), limits).unwrap();
        Listening {
            addr,
            events,
            keep_running,
        }
    }

    fn hello(stream: &mut TcpStream, name: &str) {
        let frame = ClientEvent::Hello(name.into()).encode().unwrap();
        write_frame(stream, &frame).unwrap();
    }

    fn next(events: &Receiver<RelayEvent>) -> RelayEvent {
        events.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn handshake_posts_incoming_then_opened() {
        let listening = listen();
        let mut client = TcpStream::connect(listening.addr).unwrap();
        hello(&mut client, "Rowan");

        let RelayEvent::Incoming {
            identity,
            connection,
        } = next(&listening.events)
        else {
            panic!("expected Incoming");
        };
        assert_eq!(identity.as_str(), "Rowan");
        let id = connection.id();
        assert!(matches!(
            next(&listening.events),
            RelayEvent::Opened { connection_id, .. } if connection_id == id
        ));
        assert_eq!(connection.status().get(), ConnectionStatus::Connected);
    }

    #[test]
    fn blank_name_falls_back_to_peer_address() {
        let listening = listen();
        let mut client = TcpStream::connect(listening.addr).unwrap();
        let local = client.local_addr().unwrap();
        hello(&mut client, "  ");

        let RelayEvent::Incoming { identity, .. } = next(&listening.events) else {
            panic!("expected Incoming");
        };
        assert_eq!(identity.as_str(), local.to_string());
    }

    #[test]
    fn frames_become_data_and_eof_becomes_closed() {
        let listening = listen();
        let mut client = TcpStream::connect(listening.addr).unwrap();
        hello(&mut client, "Rowan");
        let RelayEvent::Incoming { connection, .. } = next(&listening.events) else {
            panic!("expected Incoming");
        };
        let _opened = next(&listening.events);

        let update = ClientEvent::Update(StateUpdate {
            x: 1.0,
            y: 2.0,
            animation: 3,
        })
        .encode()
        .unwrap();
        write_frame(&mut client, &update).unwrap();
        match next(&listening.events) {
            RelayEvent::Data { payload, .. } => assert_eq!(payload, update),
            other => panic!("expected Data, got {other:?}"),
        }

        drop(client);
        assert!(matches!(next(&listening.events), RelayEvent::Closed { .. }));
        assert_eq!(connection.status().get(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn non_hello_first_message_is_dropped() {
        let listening = listen();
        let mut client = TcpStream::connect(listening.addr).unwrap();
        let flip = ClientEvent::Flip(1).encode().unwrap();
        write_frame(&mut client, &flip).unwrap();

        assert!(
            listening
                .events
                .recv_timeout(Duration::from_millis(300))
                .is_err()
        );
    }

    #[test]
    fn silent_client_times_out_without_admission() {
        let listening = listen();
        let mut client = TcpStream::connect(listening.addr).unwrap();
        client.write_all(&[0, 0]).unwrap();

        assert!(
            listening
                .events
                .recv_timeout(Duration::from_millis(800))
                .is_err()
        );
    }

    #[test]
    fn overlong_name_is_refused() {
        let listening = listen();
        let mut client = TcpStream::connect(listening.addr).unwrap();
        hello(&mut client, &"n".repeat(MAX_IDENTITY_LEN + 1));

        assert!(
            listening
                .events
                .recv_timeout(Duration::from_millis(300))
                .is_err()
        );
    }

    #[test]
    fn stalled_peer_fails_without_blocking_sends() {
        let listening = listen();
        let mut client = TcpStream::connect(listening.addr).unwrap();
        hello(&mut client, "Rowan");
        let RelayEvent::Incoming { mut connection, .. } = next(&listening.events) else {
            panic!("expected Incoming");
        };
        let _opened = next(&listening.events);

        // The client never reads, so the socket buffers fill and the writer
        // thread's write times out.
        let frame = vec![b'x'; 32 * 1024];
        let deadline = Instant::now() + Duration::from_secs(20);
        while connection.status().get() != ConnectionStatus::Failed {
            assert!(Instant::now() < deadline, "stalled peer never failed");
            let started = Instant::now();
            let sent = connection.send(&frame);
            assert!(
                started.elapsed() < Duration::from_millis(100),
                "send blocked for {:?}",
                started.elapsed()
            );
            if sent.is_err() {
                thread::sleep(Duration::from_millis(5));
            }
        }
        assert!(connection.send(&frame).is_err());
        drop(client);
    }

    #[test]
    fn closing_the_connection_ends_the_reader() {
        let listening = listen();
        let mut client = TcpStream::connect(listening.addr).unwrap();
        hello(&mut client, "Rowan");
        let RelayEvent::Incoming { mut connection, .. } = next(&listening.events) else {
            panic!("expected Incoming");
        };
        let _opened = next(&listening.events);

        connection.close();
        assert!(matches!(
            next(&listening.events),
            RelayEvent::Closed { .. } | RelayEvent::Errored { .. }
        ));
        assert!(connection.status().get().is_lost());
        assert!(connection.send(b"late").is_err());
    }
}
