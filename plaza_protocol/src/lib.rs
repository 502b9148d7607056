// plaza_protocol: wire protocol between game clients and the Plaza relay.
//
// Shared by the relay (`plaza_relay`) and by game clients. No dependency on
// any transport or runtime.
//
// Module overview:
// - `types.rs`:    `Identity`, `PlayerState`, `StateUpdate`.
// - `message.rs`:  The JSON `Envelope` plus typed `ClientEvent` /
//                  `ServerEvent` views and the roster entry shape.
// - `framing.rs`:  4-byte length-prefixed frames over any `Read`/`Write`.
// - `error.rs`:    `ProtocolError`.
//
// Design decisions:
// - **JSON envelopes with string-encoded data.** Matches what existing game
//   clients send, so the relay accepts both raw and string-encoded payloads.
// - **Lenient fields, strict shapes.** Missing or non-numeric state fields
//   decode to zero instead of failing; only a wrong overall shape is an
//   error. The relay drops erroring messages without touching the session.

pub mod error;
pub mod framing;
pub mod message;
pub mod types;

pub use error::ProtocolError;
pub use framing::{MAX_FRAME_SIZE, read_frame, write_frame};
pub use message::{ClientEvent, Envelope, RosterEntry, ServerEvent};
pub use types::{Identity, MAX_IDENTITY_LEN, PlayerState, StateUpdate};
