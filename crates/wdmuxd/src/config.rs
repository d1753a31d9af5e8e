//! Runtime configuration for the daemon.
//!
//! The values are resolved by the command line (with environment variable
//! fallbacks) and consumed read-only by the server at startup.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use wdmux_protocol::FormatVersion;

/// Default path of the multiplexing socket.
pub const DEFAULT_LISTEN_PATH: &str = "/run/wdmux/listen.sock";

/// Default path of the active marker directory.
pub const DEFAULT_ACTIVE_PATH: &str = "/run/wdmux/active";

/// Default interval between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Default liveness window for connected clients.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Filesystem locations the daemon works with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paths {
    /// The Unix socket clients connect to.
    pub listen: PathBuf,

    /// The directory whose presence says "armed on behalf of a client".
    pub active: PathBuf,

    /// The watchdog character device; `None` selects the no-op device.
    pub device: Option<PathBuf>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            listen: PathBuf::from(DEFAULT_LISTEN_PATH),
            active: PathBuf::from(DEFAULT_ACTIVE_PATH),
            device: None,
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub paths: Paths,

    /// How often the watchdog is serviced.
    pub tick_interval: Duration,

    /// How long a client may stay silent; `None` disables the check.
    pub liveness_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            liveness_timeout: Some(DEFAULT_LIVENESS_TIMEOUT),
        }
    }
}

impl Config {
    /// Creates a configuration for the given socket and marker paths.
    pub fn new(listen: impl Into<PathBuf>, active: impl Into<PathBuf>) -> Self {
        Self {
            paths: Paths {
                listen: listen.into(),
                active: active.into(),
                device: None,
            },
            ..Self::default()
        }
    }

    /// Checks that the timing values make sense together.
    ///
    /// Stale clients are only noticed on ticks, so the liveness window has
    /// to be longer than one tick.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }

        if let Some(liveness) = self.liveness_timeout {
            if liveness <= self.tick_interval {
                return Err(ConfigError::LivenessNotLongerThanTick {
                    liveness,
                    tick: self.tick_interval,
                });
            }
        }

        Ok(())
    }

    /// Builds the "show config" document.
    pub fn document(&self) -> ConfigDocument<'_> {
        ConfigDocument {
            format: FormatSection {
                version: FormatVersion::CURRENT,
            },
            config: ConfigSection {
                paths: &self.paths,
                timing: TimingSection {
                    tick_interval_ms: duration_ms(self.tick_interval),
                    liveness_timeout_ms: self.liveness_timeout.map(duration_ms),
                },
            },
        }
    }

    /// Renders the "show config" document as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(&self.document())?)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Top level of the "show config" document.
#[derive(Debug, Serialize)]
pub struct ConfigDocument<'a> {
    pub format: FormatSection,
    pub config: ConfigSection<'a>,
}

#[derive(Debug, Serialize)]
pub struct FormatSection {
    pub version: FormatVersion,
}

#[derive(Debug, Serialize)]
pub struct ConfigSection<'a> {
    pub paths: &'a Paths,
    pub timing: TimingSection,
}

#[derive(Debug, Serialize)]
pub struct TimingSection {
    pub tick_interval_ms: u64,
    pub liveness_timeout_ms: Option<u64>,
}

/// Errors in the daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("The tick interval must not be zero")]
    ZeroTickInterval,

    #[error("The liveness timeout ({liveness:?}) must be longer than the tick interval ({tick:?})")]
    LivenessNotLongerThanTick { liveness: Duration, tick: Duration },

    #[error("Could not serialize the configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}
