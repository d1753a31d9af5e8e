//! wdmux Daemon - Shares one hardware watchdog among local clients
//!
//! This crate provides the core infrastructure for the `wdmuxd` daemon:
//! - `config` - Paths and timing, and the "show config" document
//! - `device` - The hardware watchdog and its no-op stand-in
//! - `features` - Supported-feature metadata
//! - `marker` - The filesystem-visible "armed" marker
//! - `registry` - Connected client sessions
//! - `server` - Unix socket server and the run loop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        wdmuxd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   MuxServer     │────▶│     SessionRegistry         │    │
//! │  │ (Unix Socket)   │     │  (client session owner)     │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │                   │
//! │           │ ticks                       │ empty/non-empty   │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │ WatchdogDevice  │     │       ActiveMarker          │    │
//! │  │ (pet / release) │     │  (directory on disk)        │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod device;
pub mod features;
pub mod marker;
pub mod registry;
pub mod server;
