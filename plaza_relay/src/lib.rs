// plaza_relay: avatar state relay for Plaza multiplayer sessions.
//
// Game clients connect, announce an identity, and stream their avatar state
// (position, animation, facing). The relay keeps the latest state per
// identity and pushes every player a roster of everyone else whenever
// someone moves. It never validates or persists state.
//
// Module overview:
// - `relay.rs`:     The core. Admission with last-writer-wins dedup, the
//                   open/close/error lifecycle, state ingestion, roster
//                   fan-out, grace-delayed departure broadcasts.
// - `registry.rs`:  Identity → `Session` map with connection-checked lookups.
// - `session.rs`:   One player's connection, state, lifecycle and monitor.
// - `liveness.rs`:  Per-session cancellable connectivity poll.
// - `observer.rs`:  `connected` / `disconnected` / `diagnostic` notifications.
// - `transport.rs`: `PeerConnection`, `RelayEvent`, connectivity status.
// - `tcp.rs`:       The bundled TCP transport (listener, handshake, reader
//                   and writer threads per socket).
// - `server.rs`:    `start_relay`, config, and the single dispatcher loop
//                   that owns the `Relay`.
// - `client.rs`:    `NetClient`, the game-side TCP client.
//
// Dependencies: `plaza_protocol` (messages and framing), `tracing` for logs,
// `thiserror` for error enums. No async runtime; threads and `mpsc` only.
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in a
// game process via the library API (`start_relay`).

pub mod client;
pub mod error;
pub mod liveness;
pub mod observer;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod tcp;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use error::RelayError;
pub use observer::{LogObserver, Notification, RelayObserver};
pub use relay::{Relay, RelayTimings};
pub use server::{RelayConfig, RelayHandle, start_relay, start_relay_with_observer};
pub use tcp::SocketLimits;
