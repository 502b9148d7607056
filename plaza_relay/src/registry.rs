// Registry of sessions keyed by identity.
//
// Holds at most one session per identity: the one most recently admitted.
// Lookups that act on behalf of a transport event go through `current` /
// `current_mut` / `remove_current`, which also match the `ConnectionId`, so
// an event from a displaced connection never reaches its successor.
//
// Backed by a `BTreeMap` so listings (rosters, shutdown order) are sorted by
// identity and therefore deterministic.

use std::collections::BTreeMap;

use plaza_protocol::{Identity, RosterEntry};

use crate::session::Session;
use crate::transport::ConnectionId;

#[derive(Default)]
pub struct Registry {
    sessions: BTreeMap<Identity, Session>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session`, returning whatever was registered under its
    /// identity before.
    pub fn insert(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.identity().clone(), session)
    }

    pub fn get(&self, identity: &Identity) -> Option<&Session> {
        self.sessions.get(identity)
    }

    pub fn get_mut(&mut self, identity: &Identity) -> Option<&mut Session> {
        self.sessions.get_mut(identity)
    }

    pub fn remove(&mut self, identity: &Identity) -> Option<Session> {
        self.sessions.remove(identity)
    }

    /// The session for `identity`, only if it is bound to `connection_id`.
    pub fn current(&self, identity: &Identity, connection_id: ConnectionId) -> Option<&Session> {
        self.sessions
            .get(identity)
            .filter(|s| s.connection_id() == connection_id)
    }

    pub fn current_mut(
        &mut self,
        identity: &Identity,
        connection_id: ConnectionId,
    ) -> Option<&mut Session> {
        self.sessions
            .get_mut(identity)
            .filter(|s| s.connection_id() == connection_id)
    }

    pub fn remove_current(
        &mut self,
        identity: &Identity,
        connection_id: ConnectionId,
    ) -> Option<Session> {
        self.current(identity, connection_id)?;
        self.sessions.remove(identity)
    }

    pub fn open_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| s.is_open())
    }

    pub fn open_identities(&self) -> Vec<Identity> {
        self.open_sessions().map(|s| s.identity().clone()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.open_sessions().count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Roster of every open session except `viewer`.
    pub fn roster_excluding(&self, viewer: &Identity) -> Vec<RosterEntry> {
        self.open_sessions()
            .filter(|s| s.identity() != viewer)
            .map(Session::roster_entry)
            .collect()
    }

    /// Take every session out, in identity order.
    pub fn drain(&mut self) -> Vec<Session> {
        std::mem::take(&mut self.sessions).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::liveness::LivenessMonitor;
    use crate::test_support::MockPeer;

    fn open_session(identity: &str, peer: &MockPeer) -> Session {
        let mut session = Session::new(identity.into(), peer.connection());
        let monitor = LivenessMonitor::spawn(Duration::from_secs(60), session.status(), |_| {});
        session.mark_open(monitor);
        session
    }

    #[test]
    fn current_requires_matching_connection() {
        let first = MockPeer::new(1);
        let second = MockPeer::new(2);
        let mut registry = Registry::new();
        registry.insert(open_session("A", &first));

        let identity = Identity::from("A");
        assert!(registry.current(&identity, first.id()).is_some());
        assert!(registry.current(&identity, second.id()).is_none());
        assert!(registry.remove_current(&identity, second.id()).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove_current(&identity, first.id()).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn insert_returns_previous_session_for_identity() {
        let first = MockPeer::new(1);
        let second = MockPeer::new(2);
        let mut registry = Registry::new();
        assert!(registry.insert(open_session("A", &first)).is_none());

        let previous = registry.insert(open_session("A", &second)).unwrap();
        assert_eq!(previous.connection_id(), first.id());
        assert_eq!(registry.len(), 1);

        drop(previous);
        assert!(first.is_closed());
        assert!(!second.is_closed());
    }

    #[test]
    fn roster_excludes_viewer_and_connecting_sessions() {
        let a = MockPeer::new(1);
        let b = MockPeer::new(2);
        let c = MockPeer::new(3);
        let mut registry = Registry::new();
        registry.insert(open_session("B", &b));
        registry.insert(open_session("A", &a));
        registry.insert(Session::new("C".into(), c.connection()));

        let names: Vec<_> = registry
            .roster_excluding(&"A".into())
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec![Identity::from("B")]);
        assert_eq!(
            registry.open_identities(),
            vec![Identity::from("A"), Identity::from("B")]
        );
        assert_eq!(registry.open_count(), 2);
    }
}
