// Wire messages exchanged between game clients and the relay.
//
// Every frame carries one JSON `Envelope`: `{"eventName": ..., "data": ...}`.
// `data` is either a raw JSON value or a string holding JSON-encoded text;
// browser-era clients double-encode, so decoding strips one level of string
// encoding where the event expects structured data.
//
// Two typed views sit on top of the envelope:
// - `ClientEvent`: what a client sends (`hello`, `update`, `flip`).
// - `ServerEvent`: what the relay sends (`update` roster, `disconnected`).
//
// Decoding is lenient per field and strict per shape. An `update` object with
// a missing or non-numeric field resolves that field to 0, while a payload
// that is not an object at all is a `ProtocolError`. Unrecognized event names
// decode to `Ok(None)` so callers can ignore them without treating them as
// errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{Identity, StateUpdate};

pub const EVENT_HELLO: &str = "hello";
pub const EVENT_UPDATE: &str = "update";
pub const EVENT_FLIP: &str = "flip";
pub const EVENT_DISCONNECTED: &str = "disconnected";

/// Outer shape of every frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "eventName")]
    pub event_name: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event_name: &str, data: Value) -> Self {
        Self {
            event_name: event_name.to_owned(),
            data,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// `data` with one level of string encoding removed. Raw values are
    /// returned as-is.
    pub fn structured_data(&self) -> Result<Value, ProtocolError> {
        match &self.data {
            Value::String(text) => Ok(serde_json::from_str(text)?),
            other => Ok(other.clone()),
        }
    }
}

/// Messages sent by a game client to the relay.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// Handshake; carries the requested identity (may be empty).
    Hello(String),
    /// New position and animation.
    Update(StateUpdate),
    /// New facing.
    Flip(i64),
}

impl ClientEvent {
    /// Decode one frame. `Ok(None)` means the event name is not one a client
    /// sends and the frame should be ignored.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, ProtocolError> {
        let envelope = Envelope::from_slice(bytes)?;
        match envelope.event_name.as_str() {
            EVENT_HELLO => match &envelope.data {
                Value::String(name) => Ok(Some(Self::Hello(name.clone()))),
                Value::Null => Ok(Some(Self::Hello(String::new()))),
                _ => Err(ProtocolError::MalformedPayload {
                    event: EVENT_HELLO,
                    reason: "expected a string",
                }),
            },
            EVENT_UPDATE => parse_update(&envelope.structured_data()?).map(|u| Some(Self::Update(u))),
            EVENT_FLIP => parse_facing(&envelope.structured_data()?).map(|f| Some(Self::Flip(f))),
            _ => Ok(None),
        }
    }

    /// Encode the way game clients do: structured payloads are sent as
    /// JSON-encoded strings.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let envelope = match self {
            Self::Hello(name) => Envelope::new(EVENT_HELLO, Value::String(name.clone())),
            Self::Update(update) => {
                Envelope::new(EVENT_UPDATE, Value::String(serde_json::to_string(update)?))
            }
            Self::Flip(facing) => Envelope::new(EVENT_FLIP, Value::String(facing.to_string())),
        };
        envelope.to_vec()
    }
}

/// One player as seen by the other players.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub x: f64,
    pub y: f64,
    pub animation: i64,
    pub flip: i64,
    pub name: Identity,
}

/// Messages sent by the relay to a game client.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    /// Snapshot of every other open player.
    Roster(Vec<RosterEntry>),
    /// A player left; remove their avatar.
    Disconnected(Identity),
}

impl ServerEvent {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let envelope = match self {
            Self::Roster(entries) => {
                Envelope::new(EVENT_UPDATE, Value::String(serde_json::to_string(entries)?))
            }
            // Sent unencoded: the identity string is the data itself.
            Self::Disconnected(identity) => {
                Envelope::new(EVENT_DISCONNECTED, Value::String(identity.0.clone()))
            }
        };
        envelope.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, ProtocolError> {
        let envelope = Envelope::from_slice(bytes)?;
        match envelope.event_name.as_str() {
            EVENT_UPDATE => {
                let entries = serde_json::from_value(envelope.structured_data()?)?;
                Ok(Some(Self::Roster(entries)))
            }
            EVENT_DISCONNECTED => match envelope.data {
                Value::String(identity) => Ok(Some(Self::Disconnected(Identity(identity)))),
                _ => Err(ProtocolError::MalformedPayload {
                    event: EVENT_DISCONNECTED,
                    reason: "expected an identity string",
                }),
            },
            _ => Ok(None),
        }
    }
}

fn parse_update(data: &Value) -> Result<StateUpdate, ProtocolError> {
    let Value::Object(fields) = data else {
        return Err(ProtocolError::MalformedPayload {
            event: EVENT_UPDATE,
            reason: "expected an object",
        });
    };
    Ok(StateUpdate {
        x: number_or_zero(fields.get("x")),
        y: number_or_zero(fields.get("y")),
        animation: integer_or_zero(fields.get("animation")),
    })
}

fn parse_facing(data: &Value) -> Result<i64, ProtocolError> {
    match data {
        Value::Bool(flipped) => Ok(i64::from(*flipped)),
        Value::Number(_) => Ok(integer_or_zero(Some(data))),
        _ => Err(ProtocolError::MalformedPayload {
            event: EVENT_FLIP,
            reason: "expected a boolean or number",
        }),
    }
}

/// Absent or non-numeric resolves to 0; a present zero stays zero.
fn number_or_zero(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(0.0)
}

fn integer_or_zero(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        _ => 0,
    }
}
