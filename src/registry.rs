//! Endpoint-keyed session registry.
//!
//! The registry maps each client endpoint to its one live [`Session`]. It is
//! owned exclusively by the multiplexer's event loop, so it needs no locks
//! and no shared state. Lookup is a hash-map probe, so dispatching a datagram
//! costs O(1) on average regardless of how many transfers are in flight.
//!
//! Lifecycle rules the multiplexer relies on: a session enters the registry
//! once its request has been accepted and its file opened, and leaves it on,
//! and only on, a terminal transition. A second request from an endpoint
//! that already has a session is a [`TftpError::DuplicateSession`]; the
//! caller rejects it instead of overwriting the live transfer.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::time::Instant;

use crate::error::TftpError;
use crate::session::Session;

/// All live sessions, keyed by client endpoint.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SocketAddr, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.sessions.contains_key(peer)
    }

    pub fn find_mut(&mut self, peer: &SocketAddr) -> Option<&mut Session> {
        self.sessions.get_mut(peer)
    }

    /// Register a freshly created session.
    ///
    /// # Errors
    ///
    /// Fails with [`TftpError::DuplicateSession`] when the endpoint already
    /// has a live transfer; the existing session is left untouched.
    pub fn insert(&mut self, session: Session) -> Result<(), TftpError> {
        match self.sessions.entry(session.peer()) {
            Entry::Occupied(entry) => Err(TftpError::DuplicateSession(*entry.key())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Drop a session out of the registry, closing its file.
    pub fn remove(&mut self, peer: &SocketAddr) -> Option<Session> {
        self.sessions.remove(peer)
    }

    /// The earliest retransmit deadline across all live sessions, which is
    /// how long the event loop may sleep before something needs resending.
    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.sessions.values().filter_map(|s| s.deadline()).min()
    }

    /// Endpoints whose retransmit deadline has passed.
    pub fn expired(&self, now: Instant) -> Vec<SocketAddr> {
        self.sessions
            .iter()
            .filter(|(_, session)| session.deadline().is_some_and(|d| d <= now))
            .map(|(peer, _)| *peer)
            .collect()
    }
}
