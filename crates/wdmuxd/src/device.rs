//! Access to the hardware watchdog timer.
//!
//! The daemon is the only user of the device. It pets it on every tick
//! unless panic mode has been entered, and releases it once at shutdown.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use wdmux_protocol::DEPARTING_BYTE;

/// Byte written to reset the countdown; any value other than the magic one works.
const PET_BYTE: u8 = 0;

/// A watchdog timer the daemon can service.
pub trait WatchdogDevice: Send {
    /// Resets the device countdown.
    fn pet(&mut self) -> io::Result<()>;

    /// Gives up the device.
    ///
    /// With `disarm` set, the driver is asked to stop the countdown first;
    /// otherwise the timer keeps running and fires if nobody takes over.
    fn release(&mut self, disarm: bool) -> io::Result<()>;

    /// Human-readable description for log messages.
    fn describe(&self) -> String;
}

/// Opens the device named by the configuration, or the no-op stand-in.
pub fn open(path: Option<&Path>) -> Result<Box<dyn WatchdogDevice>, DeviceError> {
    match path {
        Some(path) => Ok(Box::new(DevWatchdog::open(path)?)),
        None => Ok(Box::new(NoopWatchdog::new())),
    }
}

// ============================================================================
// Character device
// ============================================================================

/// A Linux-style watchdog character device such as `/dev/watchdog`.
///
/// Opening the device arms it; every write resets the countdown; writing
/// the magic character right before closing disarms it (if the driver
/// allows that).
#[derive(Debug)]
pub struct DevWatchdog {
    path: PathBuf,
    file: Option<File>,
}

impl DevWatchdog {
    /// Opens and thereby arms the device.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DeviceError> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| DeviceError::Open {
                path: path.clone(),
                source,
            })?;

        info!(device = %path.display(), "Opened the watchdog device");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "watchdog device already released")
        })
    }
}

impl WatchdogDevice for DevWatchdog {
    fn pet(&mut self) -> io::Result<()> {
        let file = self.file()?;
        file.write_all(&[PET_BYTE])?;
        file.flush()?;
        debug!(device = %self.path.display(), "Petted the watchdog device");
        Ok(())
    }

    fn release(&mut self, disarm: bool) -> io::Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };

        if disarm {
            file.write_all(&[DEPARTING_BYTE])?;
            file.flush()?;
            info!(device = %self.path.display(), "Disarmed the watchdog device");
        } else {
            warn!(
                device = %self.path.display(),
                "Releasing the watchdog device without disarming it"
            );
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// No-op stand-in
// ============================================================================

/// Performs no I/O and only logs what it would have done.
#[derive(Debug, Default)]
pub struct NoopWatchdog {
    pets: u64,
}

impl NoopWatchdog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatchdogDevice for NoopWatchdog {
    fn pet(&mut self) -> io::Result<()> {
        self.pets = self.pets.saturating_add(1);
        debug!("Would pet the watchdog device");
        Ok(())
    }

    fn release(&mut self, disarm: bool) -> io::Result<()> {
        info!(
            disarm,
            pets = self.pets,
            "Would release the watchdog device"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        "no-op watchdog".to_string()
    }
}

/// Errors while acquiring the watchdog device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Could not open the watchdog device {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
