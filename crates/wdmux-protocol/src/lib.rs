//! wdmux Protocol - What clients send, and how documents are versioned
//!
//! Clients talk to the daemon with single bytes; there is no framing and
//! no reply. This crate classifies those bytes and carries the format
//! version stamped on the configuration document.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DEPARTING_BYTE};
pub use version::{FormatVersion, VersionError};
