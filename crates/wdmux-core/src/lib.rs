//! wdmux Core - Shared types for the watchdog multiplexer
//!
//! This crate provides the domain types shared between the daemon's
//! registry, its run loop, and its tests.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod panic;
pub mod session;

// Re-exports for convenience
pub use panic::{PanicController, PanicReason};
pub use session::{ClientId, Departure};
