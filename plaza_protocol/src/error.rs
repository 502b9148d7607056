// Error type for decoding and encoding wire messages.
//
// The relay treats every `ProtocolError` on inbound data as "drop the
// message": none of these variants ever closes a connection. Clients use the
// same type when decoding relay payloads.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame or its encoded `data` field is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope decoded but the payload has the wrong shape for its event.
    #[error("malformed `{event}` payload: {reason}")]
    MalformedPayload {
        event: &'static str,
        reason: &'static str,
    },
}
