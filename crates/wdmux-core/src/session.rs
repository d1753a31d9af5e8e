//! Client session identifiers and outcomes.

use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier of one client connection.
///
/// Issued in strictly increasing connection order starting at 0 and never
/// reused within a daemon run. Displays as the bare number, which is what
/// the log lines ("New client connection 0") rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClientId(u64);

impl ClientId {
    /// The first identifier handed out by a fresh registry.
    pub const FIRST: ClientId = ClientId(0);

    /// Creates a ClientId from its numeric value.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the identifier that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ClientId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ============================================================================
// Session Outcome
// ============================================================================

/// How a client connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The client announced it was leaving before closing.
    Graceful,

    /// The connection closed with no prior notice; the client may have crashed.
    Unexpected,
}

impl Departure {
    /// Classifies a closure by whether the client had announced it.
    pub fn from_going_away(going_away: bool) -> Self {
        if going_away {
            Self::Graceful
        } else {
            Self::Unexpected
        }
    }

    /// Returns true if this departure must be escalated.
    pub fn is_anomalous(&self) -> bool {
        matches!(self, Self::Unexpected)
    }
}
