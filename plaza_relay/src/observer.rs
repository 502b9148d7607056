// Lifecycle notifications for whatever renders the relay's log and roster.
//
// The relay reports `connected`, `disconnected` and `diagnostic` through a
// `RelayObserver`. The standalone binary uses `LogObserver`, which turns them
// into `tracing` events; embedders and tests can pass an
// `mpsc::Sender<Notification>` and consume them on their own thread.

use std::sync::mpsc::Sender;

use plaza_protocol::Identity;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Connected(Identity),
    Disconnected(Identity),
    /// Human-readable detail about a transport failure.
    Diagnostic(String),
}

pub trait RelayObserver: Send {
    fn notify(&mut self, notification: Notification);
}

/// Writes notifications to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct LogObserver;

impl RelayObserver for LogObserver {
    fn notify(&mut self, notification: Notification) {
        match notification {
            Notification::Connected(identity) => info!(%identity, "player connected"),
            Notification::Disconnected(identity) => info!(%identity, "player disconnected"),
            Notification::Diagnostic(message) => warn!("{message}"),
        }
    }
}

impl RelayObserver for Sender<Notification> {
    fn notify(&mut self, notification: Notification) {
        // A dropped receiver just means nobody is watching any more.
        let _ = self.send(notification);
    }
}
