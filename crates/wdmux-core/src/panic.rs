//! Panic mode: the one-way escalation entered when a client misbehaves.
//!
//! Once triggered, the daemon stops petting the hardware watchdog for the
//! rest of its run. Recovery is external: either the hardware timer fires
//! and reboots the host, or an operator restarts the daemon.

use std::fmt;

use tracing::error;

use crate::ClientId;

/// Why panic mode was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicReason {
    /// A client closed its connection without announcing it first.
    UnexpectedDisconnect(ClientId),

    /// A client stopped checking in within the liveness window.
    CheckInTimeout(ClientId),
}

impl PanicReason {
    /// Returns the client that caused the escalation.
    pub fn client(&self) -> ClientId {
        match self {
            Self::UnexpectedDisconnect(id) | Self::CheckInTimeout(id) => *id,
        }
    }
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedDisconnect(id) => write!(f, "unexpected disconnect from client {id}"),
            Self::CheckInTimeout(id) => write!(f, "check-in timeout for client {id}"),
        }
    }
}

/// Tracks whether panic mode has been entered and why.
///
/// The first reason wins; later triggers are logged and counted but never
/// overwrite it, and nothing resets the controller.
#[derive(Debug, Default)]
pub struct PanicController {
    reason: Option<PanicReason>,
    escalations: usize,
}

impl PanicController {
    /// Creates a controller that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Escalates because of `reason`.
    ///
    /// Returns true only for the call that actually entered panic mode.
    pub fn trigger(&mut self, reason: PanicReason) -> bool {
        self.escalations = self.escalations.saturating_add(1);

        match self.reason {
            None => {
                error!(
                    client = %reason.client(),
                    "Triggering panic mode due to {reason}"
                );
                self.reason = Some(reason);
                true
            }
            Some(first) => {
                error!(
                    client = %reason.client(),
                    first = %first,
                    "Already in panic mode, also got {reason}"
                );
                false
            }
        }
    }

    /// Returns true once panic mode has been entered.
    pub fn is_triggered(&self) -> bool {
        self.reason.is_some()
    }

    /// Returns the cause of the first escalation, if any.
    pub fn reason(&self) -> Option<PanicReason> {
        self.reason
    }

    /// Returns how many times `trigger` has been called.
    pub fn escalations(&self) -> usize {
        self.escalations
    }
}
