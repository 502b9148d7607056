// TCP client for connecting a game to the relay.
//
// Provides a non-blocking interface for the game loop:
// - `connect()` performs the TCP connect and sends `hello` on the calling
//   thread, then spawns a background reader thread.
// - The reader thread reads frames in a loop, decodes `ServerEvent`s, and
//   pushes them into an `mpsc` channel.
// - The game thread holds a `BufWriter<TcpStream>` for sending.
// - `poll()` drains the inbox without blocking.
//
// There is no acknowledgement of the handshake: the relay admits the
// connection as soon as it reads `hello`, so the first roster arrives after
// this client (or anyone else) sends an update.

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use plaza_protocol::{ClientEvent, ProtocolError, ServerEvent, StateUpdate, read_frame, write_frame};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
    #[error("could not encode message: {0}")]
    Protocol(#[from] ProtocolError),
}

/// TCP client for relay communication.
pub struct NetClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerEvent>,
    _reader_thread: Option<JoinHandle<()>>,
}

impl NetClient {
    /// Connect and announce `player_name`. An empty name lets the relay
    /// identify this client by its socket address.
    pub fn connect(addr: &str, player_name: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        let reader_stream = stream.try_clone()?;
        let mut writer = BufWriter::new(stream);

        let hello = ClientEvent::Hello(player_name.into()).encode()?;
        write_frame(&mut writer, &hello)?;

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            reader_loop(BufReader::new(reader_stream), tx);
        });

        Ok(Self {
            writer,
            inbox: rx,
            _reader_thread: Some(reader_thread),
        })
    }

    /// Report position and animation. The relay answers with a roster.
    pub fn send_update(&mut self, x: f64, y: f64, animation: i64) -> Result<(), ClientError> {
        self.send(&ClientEvent::Update(StateUpdate { x, y, animation }))
    }

    /// Report facing. Delivered to others with the next update.
    pub fn send_flip(&mut self, facing: i64) -> Result<(), ClientError> {
        self.send(&ClientEvent::Flip(facing))
    }

    /// Send an already-encoded frame as-is.
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        write_frame(&mut self.writer, payload)?;
        Ok(())
    }

    /// Close the connection; the relay sees EOF.
    pub fn disconnect(&mut self) {
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }

    /// Drain all queued relay events (non-blocking).
    pub fn poll(&self) -> Vec<ServerEvent> {
        self.inbox.try_iter().collect()
    }

    fn send(&mut self, event: &ClientEvent) -> Result<(), ClientError> {
        let payload = event.encode()?;
        self.send_raw(&payload)
    }
}

/// Reader thread: read frames in a loop, push decoded events to the channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerEvent>) {
    while let Ok(frame) = read_frame(&mut reader) {
        match ServerEvent::decode(&frame) {
            Ok(Some(event)) => {
                if tx.send(event).is_err() {
                    break; // Game thread dropped the client
                }
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "ignoring undecodable relay frame"),
        }
    }
}
