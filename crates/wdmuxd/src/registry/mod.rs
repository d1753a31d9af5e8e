//! Session registry: the set of connected clients.
//!
//! The registry is the single source of truth for "is anyone relying on the
//! watchdog right now". It owns the [`ActiveMarker`] so that the marker can
//! only change on the empty/non-empty edges of the session set.
//!
//! # Ownership
//!
//! The run loop owns the registry and mutates it sequentially; nothing here
//! is shared between tasks, so there is no locking.
//!
//! The registry is generic over the connection handle `C` each session
//! owns. The server stores a handle that closes the client stream when
//! dropped; tests use `()`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use wdmux_core::ClientId;

use crate::marker::ActiveMarker;

mod session;

pub use session::ClientSession;

/// Live client sessions, keyed by id.
#[derive(Debug)]
pub struct SessionRegistry<C> {
    sessions: BTreeMap<ClientId, ClientSession<C>>,
    next_id: ClientId,
    marker: ActiveMarker,
}

impl<C> SessionRegistry<C> {
    /// Creates an empty registry that drives `marker`.
    pub fn new(marker: ActiveMarker) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: ClientId::FIRST,
            marker,
        }
    }

    /// Admits a new client and returns its id.
    ///
    /// `connect` receives the id before the session is stored, so that the
    /// connection handle can be tagged with it. The marker is asserted if
    /// this is the only session.
    pub fn admit<F>(&mut self, connect: F, now: Instant) -> ClientId
    where
        F: FnOnce(ClientId) -> C,
    {
        let id = self.next_id;
        self.next_id = id.next();

        let was_empty = self.sessions.is_empty();
        let session = ClientSession::new(id, connect(id), now);
        self.sessions.insert(id, session);

        info!(
            client = %id,
            total_clients = self.sessions.len(),
            "New client connection {id}"
        );

        if was_empty {
            self.marker.assert();
        }

        id
    }

    /// Removes a session, retracting the marker if it was the last one.
    ///
    /// Returns `None` if no such session is live.
    pub fn remove(&mut self, id: ClientId) -> Option<ClientSession<C>> {
        let session = self.sessions.remove(&id)?;

        debug!(
            client = %id,
            total_clients = self.sessions.len(),
            "Session removed"
        );

        if self.sessions.is_empty() {
            self.marker.retract();
        }

        Some(session)
    }

    /// Ids of sessions silent for longer than `window`, in id order.
    pub fn expired(&self, now: Instant, window: Duration) -> Vec<ClientId> {
        self.sessions
            .values()
            .filter(|session| session.is_expired(now, window))
            .map(ClientSession::id)
            .collect()
    }

    /// Removes every session and retracts the marker unconditionally.
    pub fn shutdown(&mut self) -> Vec<ClientSession<C>> {
        let sessions = std::mem::take(&mut self.sessions);
        self.marker.retract();
        sessions.into_values().collect()
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientSession<C>> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientSession<C>> {
        self.sessions.get_mut(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Number of ids handed out so far.
    pub fn admitted(&self) -> u64 {
        self.next_id.get()
    }

    pub fn marker(&self) -> &ActiveMarker {
        &self.marker
    }
}
