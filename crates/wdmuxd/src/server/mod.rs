//! Unix socket server and run loop for the watchdog multiplexer.
//!
//! The server:
//! - Listens on a Unix socket for client connections
//! - Tracks each client in the [`SessionRegistry`]
//! - Pets the watchdog device on every tick unless panic mode is active
//! - Escalates unexpected disconnects and silent clients to panic mode
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  accept()   ┌───────────────────────────────────┐
//! │ UnixListener │────────────▶│             run loop              │
//! └──────────────┘             │                                   │
//! ┌──────────────┐  events     │  SessionRegistry ──▶ ActiveMarker │
//! │ reader tasks │────────────▶│  PanicController                  │
//! │ (per client) │   (mpsc)    │  WatchdogDevice                   │
//! └──────────────┘             │                                   │
//! ┌──────────────┐  tick()     │                                   │
//! │   interval   │────────────▶│                                   │
//! └──────────────┘             └───────────────────────────────────┘
//! ```
//!
//! Every state change happens inside the run loop, one event at a time.
//! Reader tasks only forward bytes and closures.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Runtime I/O errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionEvent, ConnectionHandle};

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wdmux_core::{ClientId, Departure, PanicController, PanicReason};
use wdmux_protocol::ClientMessage;

use crate::config::Config;
use crate::device::WatchdogDevice;
use crate::marker::ActiveMarker;
use crate::registry::{ClientSession, SessionRegistry};

/// What the daemon did during its run, returned on graceful shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The cause of panic mode, if it was entered.
    pub panic: Option<PanicReason>,

    /// How many escalations were requested in total.
    pub escalations: usize,

    /// How many client connections were admitted.
    pub clients_admitted: u64,

    /// How many times the watchdog device was petted.
    pub pets: u64,
}

/// The watchdog multiplexer server.
pub struct MuxServer {
    /// Path to the Unix socket
    listen_path: PathBuf,

    /// Path to the active marker
    active_path: PathBuf,

    tick_interval: Duration,
    liveness_timeout: Option<Duration>,

    /// The watchdog device, owned exclusively by the run loop
    device: Box<dyn WatchdogDevice>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,
}

impl MuxServer {
    /// Creates a new server.
    ///
    /// # Arguments
    ///
    /// * `config` - Paths and timing
    /// * `device` - The already opened watchdog device
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        config: &Config,
        device: Box<dyn WatchdogDevice>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            listen_path: config.paths.listen.clone(),
            active_path: config.paths.active.clone(),
            tick_interval: config.tick_interval,
            liveness_timeout: config.liveness_timeout,
            device,
            cancel_token,
        }
    }

    /// Logs what a real run would do without touching anything.
    pub fn dry_run(config: &Config) {
        info!("Would listen on {}", config.paths.listen.display());
        info!(
            "Would use {} as the active marker",
            config.paths.active.display()
        );
        match &config.paths.device {
            Some(device) => info!("Would open the watchdog device {}", device.display()),
            None => info!("Would not open a real watchdog device"),
        }
        info!(
            tick_interval = ?config.tick_interval,
            liveness_timeout = ?config.liveness_timeout,
            "Would tick every {:?}",
            config.tick_interval
        );
    }

    /// Runs the server until the cancellation token is triggered.
    ///
    /// Binding the socket is the only fatal error: an existing entry at
    /// the socket path is never removed, so a second daemon cannot steal
    /// the endpoint from a running one.
    pub async fn run(mut self) -> Result<ShutdownReport, ServerError> {
        info!("Starting up to listen on {}", self.listen_path.display());

        if let Some(parent) = self.listen_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| ServerError::SocketSetup {
                    path: self.listen_path.clone(),
                    source,
                })?;
            }
        }

        let listener = UnixListener::bind(&self.listen_path).map_err(|source| ServerError::Bind {
            path: self.listen_path.clone(),
            source,
        })?;

        info!("Listening on {}", self.listen_path.display());

        let mut state = RunState::new(ActiveMarker::new(&self.active_path));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            info!("New connection");
                            let events = event_tx.clone();
                            state.registry.admit(
                                |id| ConnectionHandle::spawn(id, stream, events),
                                Instant::now().into_std(),
                            );
                        }
                        Err(e) => {
                            // Retried on the next readiness event
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }

                Some(event) = event_rx.recv() => {
                    state.handle_event(event);
                }

                _ = ticker.tick() => {
                    self.handle_tick(&mut state);
                }
            }
        }

        drop(listener);
        Ok(self.shutdown(state))
    }

    /// Services the watchdog once.
    fn handle_tick(&mut self, state: &mut RunState) {
        debug!("Tick!");

        if let Some(window) = self.liveness_timeout {
            state.expire_silent_clients(Instant::now().into_std(), window);
        }

        if state.panic.is_triggered() {
            warn!(
                reason = ?state.panic.reason().map(|r| r.to_string()),
                "Panic mode: not petting the watchdog"
            );
            return;
        }

        match self.device.pet() {
            Ok(()) => state.pets = state.pets.saturating_add(1),
            Err(e) => error!(
                device = %self.device.describe(),
                error = %e,
                "Could not pet the watchdog device"
            ),
        }
    }

    /// Closes everything down.
    ///
    /// Client connections closed here are not departures of any kind and
    /// are never escalated.
    fn shutdown(mut self, mut state: RunState) -> ShutdownReport {
        let now = Instant::now().into_std();
        for session in state.registry.shutdown() {
            info!(
                client = %session.id(),
                "Closing the connection to client {}",
                session.id()
            );
            session.close(now);
        }

        let disarm = !state.panic.is_triggered();
        if let Err(e) = self.device.release(disarm) {
            error!(
                device = %self.device.describe(),
                error = %e,
                "Could not release the watchdog device"
            );
        }

        if let Err(e) = std::fs::remove_file(&self.listen_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    socket = %self.listen_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        let report = ShutdownReport {
            panic: state.panic.reason(),
            escalations: state.panic.escalations(),
            clients_admitted: state.registry.admitted(),
            pets: state.pets,
        };

        info!(
            clients_admitted = report.clients_admitted,
            panic = ?report.panic.map(|r| r.to_string()),
            "Server cleanup complete"
        );
        report
    }
}

/// Daemon state owned by the run loop.
struct RunState {
    registry: SessionRegistry<ConnectionHandle>,
    panic: PanicController,
    pets: u64,
}

impl RunState {
    fn new(marker: ActiveMarker) -> Self {
        // A marker left behind by an earlier run must not claim we are armed.
        marker.retract();

        Self {
            registry: SessionRegistry::new(marker),
            panic: PanicController::new(),
            pets: 0,
        }
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        let id = event.id();
        if self.registry.get(id).is_none() {
            debug!(client = %id, "Ignoring event for a client that is already gone");
            return;
        }

        match event {
            ConnectionEvent::Received { id, data } => self.handle_data(id, &data),
            ConnectionEvent::Closed { id, error } => {
                if let Some(e) = error {
                    debug!(client = %id, error = %e, "Client connection failed");
                }
                self.handle_closed(id);
            }
        }
    }

    fn handle_data(&mut self, id: ClientId, data: &[u8]) {
        info!(client = %id, "Client {id} said {data:?}");

        let now = Instant::now().into_std();
        if let Some(session) = self.registry.get_mut(id) {
            for message in ClientMessage::parse_all(data) {
                session.handle_message(message, now);
            }
        }
    }

    fn handle_closed(&mut self, id: ClientId) {
        let Some(departure) = self.registry.get(id).map(ClientSession::departure) else {
            return;
        };

        match departure {
            Departure::Graceful => info!(client = %id, "Client {id} went away gracefully"),
            Departure::Unexpected => {
                warn!(client = %id, "Client {id} went away without saying goodbye")
            }
        }

        // The marker is re-evaluated before any escalation is reported.
        if let Some(session) = self.registry.remove(id) {
            session.close(Instant::now().into_std());
        }

        if departure.is_anomalous() {
            self.panic.trigger(PanicReason::UnexpectedDisconnect(id));
        }

        info!(
            client = %id,
            remaining_clients = self.registry.len(),
            "Cleaned up after client {id}"
        );
    }

    /// Treats every client silent for longer than `window` as disconnected.
    fn expire_silent_clients(&mut self, now: std::time::Instant, window: Duration) {
        for id in self.registry.expired(now, window) {
            let Some(silent_for) = self.registry.get(id).map(|s| s.silent_for(now)) else {
                continue;
            };
            warn!(
                client = %id,
                silent_for = ?silent_for,
                "Client {id} has not checked in for {silent_for:?}"
            );

            if let Some(session) = self.registry.remove(id) {
                session.close(now);
            }
            self.panic.trigger(PanicReason::CheckInTimeout(id));

            info!(
                client = %id,
                remaining_clients = self.registry.len(),
                "Cleaned up after client {id}"
            );
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Could not listen on {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to setup socket at {path}: {source}")]
    SocketSetup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_state() -> (TempDir, RunState) {
        let temp = tempfile::tempdir().unwrap();
        let state = RunState::new(ActiveMarker::new(temp.path().join("active")));
        (temp, state)
    }

    /// Admits a client and returns the id along with the client's end.
    fn admit_with_peer(state: &mut RunState) -> (ClientId, tokio::net::UnixStream) {
        let (client, server) = tokio::net::UnixStream::pair().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = state.registry.admit(
            |id| ConnectionHandle::spawn(id, server, tx),
            Instant::now().into_std(),
        );
        (id, client)
    }

    fn admit(state: &mut RunState) -> ClientId {
        admit_with_peer(state).0
    }

    #[tokio::test]
    async fn test_graceful_departure_does_not_panic() {
        let (_temp, mut state) = create_state();
        let id = admit(&mut state);

        state.handle_event(ConnectionEvent::Received { id, data: vec![0, b'V'] });
        state.handle_event(ConnectionEvent::Closed { id, error: None });

        assert!(state.registry.is_empty());
        assert!(!state.registry.marker().is_present());
        assert!(!state.panic.is_triggered());
    }

    #[tokio::test]
    async fn test_closing_a_session_closes_its_connection() {
        use tokio::io::AsyncReadExt;

        let (_temp, mut state) = create_state();
        let (id, mut peer) = admit_with_peer(&mut state);

        state.handle_event(ConnectionEvent::Received { id, data: vec![b'V'] });
        state.handle_event(ConnectionEvent::Closed { id, error: None });
        assert!(!state.panic.is_triggered());
        assert_eq!(state.registry.len(), 0);

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), peer.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_unexpected_disconnect_panics_once() {
        let (_temp, mut state) = create_state();
        let first = admit(&mut state);
        let second = admit(&mut state);

        state.handle_event(ConnectionEvent::Received { id: second, data: vec![0] });
        state.handle_event(ConnectionEvent::Closed { id: second, error: None });

        assert!(state.registry.marker().is_present());
        assert_eq!(
            state.panic.reason(),
            Some(PanicReason::UnexpectedDisconnect(second))
        );

        state.handle_event(ConnectionEvent::Closed {
            id: first,
            error: Some(io::Error::from(io::ErrorKind::ConnectionReset)),
        });
        assert!(!state.registry.marker().is_present());
        assert_eq!(
            state.panic.reason(),
            Some(PanicReason::UnexpectedDisconnect(second))
        );
        assert_eq!(state.panic.escalations(), 2);
    }

    #[tokio::test]
    async fn test_events_for_removed_clients_are_ignored() {
        let (_temp, mut state) = create_state();
        let id = admit(&mut state);

        state.handle_event(ConnectionEvent::Received { id, data: vec![b'V'] });
        state.handle_event(ConnectionEvent::Closed { id, error: None });
        state.handle_event(ConnectionEvent::Closed { id, error: None });
        state.handle_event(ConnectionEvent::Received { id, data: vec![0] });

        assert!(!state.panic.is_triggered());
        assert_eq!(state.registry.admitted(), 1);
    }

    #[tokio::test]
    async fn test_silent_client_expires_into_panic() {
        let (_temp, mut state) = create_state();
        let id = admit(&mut state);

        let window = Duration::from_secs(60);
        let now = std::time::Instant::now();

        state.expire_silent_clients(now, window);
        assert!(!state.panic.is_triggered());
        assert!(state.registry.marker().is_present());

        state.expire_silent_clients(now + Duration::from_secs(61), window);
        assert!(state.registry.is_empty());
        assert_eq!(state.panic.reason(), Some(PanicReason::CheckInTimeout(id)));
        assert!(!state.registry.marker().is_present());
    }

    #[test]
    fn test_stale_marker_removed_on_startup() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("active");
        std::fs::create_dir(&path).unwrap();

        let state = RunState::new(ActiveMarker::new(&path));
        assert!(!path.exists());
        assert!(state.registry.is_empty());
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            path: PathBuf::from("/tmp/test.sock"),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("/tmp/test.sock"));
    }
}
