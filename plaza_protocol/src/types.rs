// Core value types shared by the relay and game clients.
//
// `Identity` is the string a peer is known by. The transport supplies it
// (player name from the handshake, or the socket address) and the relay keys
// its registry on it. `PlayerState` is the last-known avatar state the relay
// holds per identity and echoes back to the other players.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest identity, in bytes, the relay admits. Keeps a roster of a full
/// room well under `MAX_FRAME_SIZE` even when every name needs escaping.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Stable identity of a connected peer. Registry key on the relay side.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Last-known avatar state of one player. All zero until the first update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub x: f64,
    pub y: f64,
    /// Animation code; the relay never interprets it.
    pub animation: i64,
    /// Facing. Booleans on the wire map to 0/1.
    pub flip: i64,
}

impl PlayerState {
    /// Overwrite position and animation, leaving facing untouched.
    pub fn apply_update(&mut self, update: &StateUpdate) {
        self.x = update.x;
        self.y = update.y;
        self.animation = update.animation;
    }
}

/// Position/animation part of an `update` event, after defaulting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub x: f64,
    pub y: f64,
    pub animation: i64,
}
