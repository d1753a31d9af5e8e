//! Reading from individual client connections.
//!
//! Each accepted stream is handed to a small reader task that forwards
//! whatever it reads to the run loop as [`ConnectionEvent`]s. The reader
//! never touches daemon state; the run loop applies the events in the
//! order they arrive.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A closed event channel simply ends the reader

use std::io;

use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use wdmux_core::ClientId;

/// Read buffer size; clients send single bytes, this only bounds bursts.
const READ_BUFFER_SIZE: usize = 64;

/// Something that happened on a client connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The client sent some bytes.
    Received { id: ClientId, data: Vec<u8> },

    /// The stream reached end-of-file or failed.
    Closed {
        id: ClientId,
        error: Option<io::Error>,
    },
}

impl ConnectionEvent {
    pub fn id(&self) -> ClientId {
        match self {
            Self::Received { id, .. } | Self::Closed { id, .. } => *id,
        }
    }
}

/// The run loop's handle on one client connection.
///
/// Dropping the handle stops the reader task, which drops the stream and
/// thereby closes the connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Starts reading from `stream` on behalf of client `id`.
    pub fn spawn(
        id: ClientId,
        stream: UnixStream,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let task = tokio::spawn(read_client(id, stream, events));
        Self { task }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Reader loop for one client.
async fn read_client(
    id: ClientId,
    mut stream: UnixStream,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    let error = loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                debug!(client = %id, "Client sent EOF");
                break None;
            }
            Ok(n) => {
                let data = buf.get(..n).map(<[u8]>::to_vec).unwrap_or_default();
                trace!(client = %id, bytes = n, "Read from client");
                if events.send(ConnectionEvent::Received { id, data }).is_err() {
                    debug!(client = %id, "Run loop gone, stopping reader");
                    return;
                }
            }
            Err(e) if is_transient(&e) => {
                debug!(client = %id, error = %e, "Transient read error, retrying");
            }
            Err(e) => break Some(e),
        }
    };

    // Ignore send error - the run loop may already be shutting down
    let _ = events.send(ConnectionEvent::Closed { id, error });
}

/// Read errors that do not mean the peer is gone.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}
