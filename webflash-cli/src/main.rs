//! webflash CLI - terminal host for flashing firmware onto ESP boards.
//!
//! ## Features
//!
//! - Check whether serial access is available
//! - Download firmware images from the asset server
//! - Probe, flash and erase a board through the session controller
//! - Interactive session with live status, log and progress
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use webflash::{Failure, FailureKind};

mod backend;
mod commands;
mod config;
mod esp;
mod serial;

use commands::completions::cmd_completions;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors that decide the process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or an environment that cannot serve the request.
    #[error("{0}")]
    Usage(String),
    /// The operator cancelled.
    #[error("{0}")]
    Cancelled(String),
    /// The operation was attempted and failed.
    #[error("{0}")]
    Runtime(String),
}

impl CliError {
    /// Exit code reported for this error.
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
            Self::Runtime(_) => 1,
        }
    }

    /// Map a reported session failure onto an exit class.
    pub(crate) fn from_failure(failure: Failure) -> Self {
        match failure.kind {
            FailureKind::UserCancelled => Self::Cancelled(failure.message),
            FailureKind::EnvironmentUnsupported | FailureKind::Precondition => {
                Self::Usage(failure.message)
            },
            _ => Self::Runtime(failure.message),
        }
    }
}

/// webflash - flash ESP boards from the terminal.
///
/// Environment variables:
///   WEBFLASH_PORT              - Serial port to use
///   WEBFLASH_ASSET_URL         - Base URL of the firmware asset server
///   WEBFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "webflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (chosen interactively if not specified).
    #[arg(short, long, global = true, env = "WEBFLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Base URL of the firmware asset server.
    #[arg(long, global = true, env = "WEBFLASH_ASSET_URL", value_name = "URL")]
    pub(crate) asset_url: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "WEBFLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Rehearse device operations against a simulated board.
    #[arg(long, global = true)]
    pub(crate) dry_run: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Check whether serial access is available.
    Check {
        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Download a firmware image from the asset server.
    Fetch {
        /// Image name (defaults to the configured default firmware).
        name: Option<String>,

        /// Where to save the image (defaults to its name).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Connect to a board and report its chip.
    Probe,

    /// Flash a firmware image.
    Flash {
        /// Firmware file to flash.
        #[arg(conflicts_with = "remote")]
        firmware: Option<PathBuf>,

        /// Flash offset (e.g. 0x1000).
        #[arg(short, long, default_value = "0x1000")]
        address: String,

        /// Erase the whole flash before writing.
        #[arg(long)]
        erase_all: bool,

        /// Download this image from the asset server instead of a file.
        #[arg(long, value_name = "NAME")]
        remote: Option<String>,
    },

    /// Erase the whole flash.
    Erase,

    /// Interactive flashing session.
    Session {
        /// Connect right after the default firmware is loaded.
        #[arg(long)]
        auto_connect: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate the script for.
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Status and log lines are rendered by the terminal listener, so the
    // logger stays at warn unless asked for more.
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    webflash::set_interrupt_checker(was_interrupted);

    debug!(
        "webflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<CliError>()
                .map_or(1, CliError::exit_code);
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli);

    match &cli.command {
        Commands::Check { json } => commands::check::cmd_check(cli, *json),
        Commands::ListPorts { json } => serial::cmd_list_ports(*json),
        Commands::Fetch { name, output } => {
            commands::fetch::cmd_fetch(cli, &config, name.as_deref(), output.as_deref())
        },
        Commands::Probe => commands::flash::cmd_probe(cli, &config),
        Commands::Flash {
            firmware,
            address,
            erase_all,
            remote,
        } => {
            let source = match (firmware, remote) {
                (Some(path), _) => commands::flash::Source::File(path.clone()),
                (None, Some(name)) => commands::flash::Source::Remote(name.clone()),
                (None, None) => commands::flash::Source::Default,
            };
            commands::flash::cmd_flash(cli, &config, &source, address, *erase_all)
        },
        Commands::Erase => commands::flash::cmd_erase(cli, &config),
        Commands::Session { auto_connect } => {
            let mut config = config;
            config.flasher.auto_connect |= *auto_connect;
            commands::session::cmd_session(cli, &config)
        },
        Commands::Completions { shell } => match shell {
            Some(shell) => {
                cmd_completions(*shell);
                Ok(())
            },
            None => Err(CliError::Usage(
                "specify a shell, e.g.: webflash completions bash".to_string(),
            )
            .into()),
        },
    }
}

/// Resolve the configuration: files first, then environment and flags.
fn load_config(cli: &Cli) -> Config {
    let mut config = Config::load_with(cli.config_path.as_deref());

    if let Some(port) = &cli.port {
        config.connection.serial = Some(port.clone());
    }
    if let Some(url) = &cli.asset_url {
        config.flasher.asset_base_url.clone_from(url);
    }
    config
}
