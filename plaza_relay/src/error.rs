// Errors surfaced by the relay's public entry points.
//
// Per-connection failures never show up here: they are reported through the
// observer channel and only ever close the affected session.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listener setup failed: {0}")]
    Listener(#[from] io::Error),
}
