//! bleflash CLI - Command-line tool for updating BL702 firmware over BLE.
//!
//! ## Features
//!
//! - Update firmware from a local file or a firmware server
//! - Inspect the page and packet plan of an image
//! - Interactive serial port selection
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
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use commands::update::FirmwareArg;
use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Baud rate used when neither flag, env nor config sets one.
pub(crate) const DEFAULT_BAUD: u32 = 115200;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration file (exit code 3).
    #[error("{0}")]
    Config(String),
    /// Stopped by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<bleflash::Error>() {
        Some(bleflash::Error::Cancelled) => 130,
        Some(bleflash::Error::Config(_)) => 3,
        Some(bleflash::Error::Serial(_)) => 4,
        _ => 1,
    }
}

/// bleflash - Update BL702 firmware through a BLE UART bridge.
///
/// Environment variables:
///   BLEFLASH_PORT              - Default serial port
///   BLEFLASH_BAUD              - Default baud rate (default: 115200)
///   BLEFLASH_BASE_URL          - Firmware server for `update --url`
///   BLEFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "bleflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port of the BLE bridge (auto-detected if not specified).
    #[arg(short, long, global = true, env = "BLEFLASH_PORT")]
    port: Option<String>,

    /// Baud rate of the bridge.
    #[arg(short, long, global = true, env = "BLEFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "BLEFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Update the device firmware.
    Update {
        /// Path to the firmware image.
        #[arg(required_unless_present = "url")]
        firmware: Option<PathBuf>,

        /// Download this file name from the firmware server instead.
        #[arg(long, value_name = "NAME", conflicts_with = "firmware")]
        url: Option<String>,

        /// Firmware server base URL.
        #[arg(long, value_name = "URL", env = "BLEFLASH_BASE_URL")]
        base_url: Option<String>,

        /// Print progress snapshots as JSON lines to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show the transfer plan of a firmware image.
    Info {
        /// Path to the firmware image.
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;
    if selected.prompted && !cli.non_interactive {
        ask_remember_port(&selected.name, config)?;
    }

    Ok(selected.name)
}

fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            // Second Ctrl-C: stop waiting for the updater to wind down.
            std::process::exit(130);
        }
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    bleflash::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Update {
            firmware,
            url,
            base_url,
            json,
        } => {
            let firmware = match (firmware, url) {
                (Some(path), None) => FirmwareArg::File(path),
                (None, Some(name)) => FirmwareArg::Remote {
                    name,
                    base_url: base_url.as_deref(),
                },
                _ => {
                    return Err(CliError::Usage(
                        "Pass either a firmware file or --url <NAME>".into(),
                    )
                    .into());
                },
            };
            commands::update::cmd_update(cli, &mut config, firmware, *json)
        },
        Commands::Info { firmware, json } => commands::info::cmd_info(firmware, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
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

    debug!(
        "bleflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_update_file() {
        let cli = Cli::try_parse_from([
            "bleflash",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "921600",
            "update",
            "firmware.bin",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, Some(921600));
        if let Commands::Update {
            firmware, url, json, ..
        } = cli.command
        {
            assert_eq!(firmware.unwrap().to_str().unwrap(), "firmware.bin");
            assert!(url.is_none());
            assert!(!json);
        } else {
            panic!("Expected Update command");
        }
    }

    #[test]
    fn test_cli_parse_update_url() {
        let cli = Cli::try_parse_from([
            "bleflash",
            "update",
            "--url",
            "app.bin",
            "--base-url",
            "https://fw.example.com",
            "--json",
        ])
        .unwrap();
        if let Commands::Update {
            firmware,
            url,
            base_url,
            json,
        } = cli.command
        {
            assert!(firmware.is_none());
            assert_eq!(url.as_deref(), Some("app.bin"));
            assert_eq!(base_url.as_deref(), Some("https://fw.example.com"));
            assert!(json);
        } else {
            panic!("Expected Update command");
        }
    }

    #[test]
    fn test_cli_update_requires_a_source() {
        assert!(Cli::try_parse_from(["bleflash", "update"]).is_err());
    }

    #[test]
    fn test_cli_update_file_and_url_conflict() {
        assert!(Cli::try_parse_from(["bleflash", "update", "fw.bin", "--url", "app.bin"]).is_err());
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["bleflash", "info", "fw.bin", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: true, .. }));
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["bleflash", "list-ports"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: false }));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["bleflash", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Zsh }
        ));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["bleflash", "list-ports"]).unwrap();
        assert!(cli.baud.is_none());
        assert!(!cli.quiet);
        assert!(!cli.non_interactive);
        assert!(cli.port.is_none());
        assert!(cli.config_path.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "bleflash",
            "list-ports",
            "-p",
            "COM3",
            "-b",
            "115200",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--config",
            "/tmp/config.toml",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.baud, Some(115200));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert_eq!(
            cli.config_path
                .unwrap()
                .to_str(),
            Some("/tmp/config.toml")
        );
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["bleflash"]).is_err());
    }

    // ---- exit codes ----

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code(&CliError::Config("x".into()).into()), 3);
        assert_eq!(exit_code(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code(&bleflash::Error::Cancelled.into()), 130);
        assert_eq!(
            exit_code(&bleflash::Error::AttemptsExhausted { attempts: 11 }.into()),
            1
        );
        assert_eq!(
            exit_code(&bleflash::Error::ImageUnavailable("gone".into()).into()),
            1
        );
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_exit_code_sees_through_context() {
        let err = anyhow::Error::from(bleflash::Error::Cancelled).context("Update via COM3 failed");
        assert_eq!(exit_code(&err), 130);
    }
}
