//! wdmux Daemon - Watchdog multiplexer
//!
//! This binary owns the hardware watchdog device and keeps petting it on
//! behalf of any number of local clients connected over a Unix socket.
//!
//! # Usage
//!
//! ```bash
//! # Run in the foreground with the no-op device
//! wdmuxd -l /run/wdmux/listen.sock -a /run/wdmux/active run
//!
//! # Run against the real device, detached from the terminal
//! wdmuxd -w /dev/watchdog run --daemon
//!
//! # Check what would happen without binding or opening anything
//! wdmuxd run --noop
//!
//! # Print the resolved configuration as JSON
//! wdmuxd show config
//!
//! # Print the supported features
//! wdmuxd --features
//!
//! # Enable debug logging (ticks, check-ins, pets)
//! wdmuxd -d run
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown
//! - A second SIGTERM/SIGINT during shutdown: immediate exit

use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wdmuxd::config::{Config, Paths, DEFAULT_ACTIVE_PATH, DEFAULT_LISTEN_PATH};
use wdmuxd::device::{self, WatchdogDevice};
use wdmuxd::features::format_features;
use wdmuxd::server::MuxServer;

/// Watchdog multiplexer - share one hardware watchdog among local services
#[derive(Parser, Debug)]
#[command(name = "wdmuxd", version, about)]
struct Args {
    /// The Unix socket to listen on for client connections
    #[arg(short = 'l', long, global = true, env = "WDMUX_LISTEN", default_value = DEFAULT_LISTEN_PATH)]
    listen: PathBuf,

    /// The directory to create while any client is connected
    #[arg(short = 'a', long, global = true, env = "WDMUX_ACTIVE", default_value = DEFAULT_ACTIVE_PATH)]
    active: PathBuf,

    /// The watchdog device to pet; without it nothing is written anywhere
    #[arg(short = 'w', long, global = true, env = "WDMUX_DEVICE")]
    device: Option<PathBuf>,

    /// Seconds between watchdog pets
    #[arg(long, global = true, default_value_t = 5)]
    tick_interval: u64,

    /// Seconds a client may stay silent before it is treated as crashed (0 disables)
    #[arg(long, global = true, default_value_t = 60)]
    liveness_timeout: u64,

    /// Debug mode; display diagnostic output
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    /// Print the supported features and exit
    #[arg(long)]
    features: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the multiplexer
    Run {
        /// Only report what would be done; do not listen or open the device
        #[arg(long)]
        noop: bool,

        /// Run as a background daemon (fork to background)
        #[arg(long)]
        daemon: bool,

        /// Where the daemon's output goes when running in the background
        #[arg(long, requires = "daemon")]
        log_file: Option<PathBuf>,
    },
    /// Display information about the daemon
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ShowCommand {
    /// Print the resolved configuration as JSON
    Config,
}

impl Args {
    /// Assembles the daemon configuration from the command line.
    fn config(&self) -> Config {
        Config {
            paths: Paths {
                listen: self.listen.clone(),
                active: self.active.clone(),
                device: self.device.clone(),
            },
            tick_interval: Duration::from_secs(self.tick_interval),
            liveness_timeout: match self.liveness_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Returns the default path of the log file used in daemon mode.
fn log_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("wdmux");
    state_dir.join("wdmuxd.log")
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.features {
        println!("{}", format_features());
        return Ok(());
    }

    let mut config = args.config();
    config.validate().context("Invalid configuration")?;

    match args.command {
        None => bail!("No command specified; see 'wdmuxd --help'"),
        Some(Command::Show {
            what: ShowCommand::Config,
        }) => {
            println!("{}", config.to_json()?);
            Ok(())
        }
        Some(Command::Run {
            noop,
            daemon,
            log_file,
        }) => {
            init_tracing(args.debug, !daemon && io::stdout().is_terminal())?;

            if noop {
                MuxServer::dry_run(&config);
                return Ok(());
            }

            // Opened before detaching so that a missing device fails the
            // command the operator actually ran.
            let device =
                device::open(config.paths.device.as_deref()).context("Could not start up")?;

            if daemon {
                config.paths = absolute_paths(&config.paths)?;
                daemonize(&log_file.unwrap_or_else(log_file_path))?;
            }

            run_daemon(config, device)
        }
    }
}

/// Initializes the `tracing` subscriber.
///
/// RUST_LOG is honoured; our own crates log at info level, or at debug
/// level with "--debug".
fn init_tracing(debug: bool, ansi: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("wdmuxd={level}").parse()?)
                .add_directive(format!("wdmux_core={level}").parse()?),
        )
        .with_writer(io::stdout)
        .with_ansi(ansi)
        .try_init()
        .map_err(|e| anyhow!(e))
        .context("Could not initialize the tracing subscriber")
}

/// Makes relative paths absolute; the daemon changes to `/` when detaching.
fn absolute_paths(paths: &Paths) -> Result<Paths> {
    let cwd = std::env::current_dir().context("Could not determine the current directory")?;
    let absolute = |path: &Path| cwd.join(path);

    Ok(Paths {
        listen: absolute(&paths.listen),
        active: absolute(&paths.active),
        device: paths.device.as_deref().map(absolute),
    })
}

/// Daemonizes the current process.
fn daemonize(log_path: &Path) -> Result<()> {
    use daemonize::Daemonize;

    // Ensure log directory exists
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .context("Failed to open log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to open log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
///
/// A single-threaded runtime: every state transition happens on one thread.
#[tokio::main(flavor = "current_thread")]
async fn run_daemon(config: Config, device: Box<dyn WatchdogDevice>) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        device = %device.describe(),
        "wdmuxd starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Register the handlers up front so a failure is a startup error
    let mut signals = ShutdownSignals::new().context("Could not set up signal handlers")?;
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        loop {
            signals.recv().await;
            match on_shutdown_signal(&shutdown_token) {
                SignalAction::Shutdown => info!("Shutdown signal received"),
                SignalAction::Exit => {
                    warn!("Second shutdown signal received, exiting immediately");
                    process::exit(1);
                }
            }
        }
    });

    let server = MuxServer::new(&config, device, cancel_token);

    match server.run().await {
        Ok(report) => {
            if let Some(reason) = report.panic {
                warn!(%reason, "Shutting down while in panic mode");
            }
            info!("wdmuxd stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Server error");
            Err(e.into())
        }
    }
}

/// What a shutdown signal asks of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    /// Stop the server gracefully.
    Shutdown,
    /// Shutdown is already under way; leave now.
    Exit,
}

/// The first signal cancels `token`; any later one escalates to an exit.
fn on_shutdown_signal(token: &CancellationToken) -> SignalAction {
    if token.is_cancelled() {
        SignalAction::Exit
    } else {
        token.cancel();
        SignalAction::Shutdown
    }
}

/// SIGTERM and SIGINT listeners.
struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Waits for the next shutdown signal.
    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_global_options_before_subcommand() {
        let args =
            Args::try_parse_from(["wdmuxd", "-l", "/tmp/l.sock", "-a", "/tmp/a", "-d", "run"])
                .unwrap();
        assert!(args.debug);
        assert_eq!(args.listen, PathBuf::from("/tmp/l.sock"));
        assert_eq!(args.active, PathBuf::from("/tmp/a"));
        assert!(matches!(
            args.command,
            Some(Command::Run {
                noop: false,
                daemon: false,
                ..
            })
        ));
    }

    #[test]
    fn test_run_noop() {
        let args = Args::try_parse_from(["wdmuxd", "run", "--noop"]).unwrap();
        assert!(matches!(args.command, Some(Command::Run { noop: true, .. })));
    }

    #[test]
    fn test_zero_liveness_disables_check() {
        let args = Args::try_parse_from(["wdmuxd", "--liveness-timeout", "0", "run"]).unwrap();
        assert_eq!(args.config().liveness_timeout, None);
    }

    #[test]
    fn test_show_config_parses() {
        let args = Args::try_parse_from(["wdmuxd", "show", "config"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Show {
                what: ShowCommand::Config
            })
        ));
    }

    #[test]
    fn test_second_signal_forces_exit() {
        let token = CancellationToken::new();

        assert_eq!(on_shutdown_signal(&token), SignalAction::Shutdown);
        assert!(token.is_cancelled());

        assert_eq!(on_shutdown_signal(&token), SignalAction::Exit);
        assert_eq!(on_shutdown_signal(&token), SignalAction::Exit);
    }

    #[test]
    fn test_signal_reaches_the_server_token() {
        let token = CancellationToken::new();
        let server_token = token.clone();

        on_shutdown_signal(&token);
        assert!(server_token.is_cancelled());
    }

    #[test]
    fn test_absolute_paths() {
        let paths = Paths {
            listen: PathBuf::from("listen.sock"),
            active: PathBuf::from("/run/active"),
            device: Some(PathBuf::from("dev")),
        };
        let absolute = absolute_paths(&paths).unwrap();
        assert!(absolute.listen.is_absolute());
        assert_eq!(absolute.active, PathBuf::from("/run/active"));
        assert!(absolute.device.unwrap().is_absolute());
    }
}
