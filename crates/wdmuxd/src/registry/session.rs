//! Per-client session state.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use wdmux_core::{ClientId, Departure};
use wdmux_protocol::ClientMessage;

/// One connected client.
///
/// A session in the registry is always connected; closing consumes it, so
/// no operation can reach a closed session or its connection.
#[derive(Debug)]
pub struct ClientSession<C> {
    id: ClientId,
    connection: C,
    going_away: bool,
    connected_at: Instant,
    last_check_in: Instant,
}

impl<C> ClientSession<C> {
    /// Creates a freshly connected session.
    ///
    /// Connecting counts as the first check-in.
    pub fn new(id: ClientId, connection: C, now: Instant) -> Self {
        Self {
            id,
            connection,
            going_away: false,
            connected_at: now,
            last_check_in: now,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Returns true once the client has announced it is leaving.
    pub fn is_going_away(&self) -> bool {
        self.going_away
    }

    pub fn last_check_in(&self) -> Instant {
        self.last_check_in
    }

    /// Time since the last check-in, saturating at zero.
    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_check_in)
    }

    /// Returns true if the client has been silent longer than `window`.
    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        self.silent_for(now) > window
    }

    /// Applies one message from the client.
    pub fn handle_message(&mut self, message: ClientMessage, now: Instant) {
        match message {
            ClientMessage::Departing => {
                self.going_away = true;
                info!(client = %self.id, "Client {} said it might go away soon", self.id);
            }
            ClientMessage::CheckIn(byte) => {
                self.last_check_in = now;
                debug!(client = %self.id, byte, "Client {} checked in", self.id);
            }
        }
    }

    /// How the client is leaving if its connection closes now.
    pub fn departure(&self) -> Departure {
        Departure::from_going_away(self.going_away)
    }

    /// Ends the session and drops its connection.
    pub fn close(self, now: Instant) {
        debug!(
            client = %self.id,
            connected_for = ?now.saturating_duration_since(self.connected_at),
            going_away = self.going_away,
            "Session closed"
        );
        drop(self.connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: Instant) -> ClientSession<()> {
        ClientSession::new(ClientId::new(0), (), now)
    }

    #[test]
    fn test_new_session_is_connected_and_fresh() {
        let now = Instant::now();
        let s = session(now);
        assert!(!s.is_going_away());
        assert_eq!(s.last_check_in(), now);
        assert_eq!(s.silent_for(now), Duration::ZERO);
    }

    #[test]
    fn test_check_in_resets_silence() {
        let start = Instant::now();
        let mut s = session(start);
        let later = start + Duration::from_secs(30);

        assert_eq!(s.silent_for(later), Duration::from_secs(30));
        s.handle_message(ClientMessage::CheckIn(0), later);
        assert_eq!(s.last_check_in(), later);
        assert_eq!(s.silent_for(later), Duration::ZERO);
        assert!(!s.is_going_away());
    }

    #[test]
    fn test_departing_sets_going_away_only() {
        let start = Instant::now();
        let mut s = session(start);
        let later = start + Duration::from_secs(5);

        s.handle_message(ClientMessage::Departing, later);
        assert!(s.is_going_away());
        assert_eq!(s.last_check_in(), start);
    }

    #[test]
    fn test_going_away_is_sticky() {
        let now = Instant::now();
        let mut s = session(now);
        s.handle_message(ClientMessage::Departing, now);
        s.handle_message(ClientMessage::CheckIn(1), now);
        assert!(s.is_going_away());
    }

    #[test]
    fn test_departure_classification() {
        let now = Instant::now();

        let silent = session(now);
        assert_eq!(silent.departure(), Departure::Unexpected);

        let mut polite = session(now);
        polite.handle_message(ClientMessage::Departing, now);
        assert_eq!(polite.departure(), Departure::Graceful);
    }

    #[test]
    fn test_close_drops_the_connection() {
        let now = Instant::now();
        let connection = std::rc::Rc::new(());
        let s = ClientSession::new(ClientId::new(3), connection.clone(), now);
        assert_eq!(std::rc::Rc::strong_count(&connection), 2);

        s.close(now + Duration::from_secs(1));
        assert_eq!(std::rc::Rc::strong_count(&connection), 1);
    }

    #[test]
    fn test_expiry() {
        let start = Instant::now();
        let s = session(start);
        let window = Duration::from_secs(10);

        assert!(!s.is_expired(start + Duration::from_secs(10), window));
        assert!(s.is_expired(start + Duration::from_secs(11), window));
    }
}
