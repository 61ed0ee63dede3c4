//! arducam-ctl: query and drive an Arducam camera from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use arducam_ctl::{start_linux, BusEvent, Capability, Command, Config, ControlError, Response};
use clap::{Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Arducam camera control over V4L2 and I2C
#[derive(Parser)]
#[command(name = "arducam-ctl")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, default_value = "/etc/arducam-ctl/config.json")]
    config: PathBuf,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the capability report
    Capabilities,
    /// Re-probe video nodes and print the capability report
    Refresh,
    /// Read a V4L2 control
    Get {
        /// Control id, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_control_id)]
        id: u32,
    },
    /// Write a V4L2 control
    Set {
        /// Control id, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_control_id)]
        id: u32,
        /// New value
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// Drive an I2C axis (pan, tilt, zoom, focus, ircut)
    Ptz {
        /// Axis name
        axis: Capability,
        /// Target position
        value: i64,
    },
    /// Print the stored focus level
    Focus,
    /// Print the legacy camera family id
    Id,
}

impl Commands {
    const fn to_command(&self) -> Command {
        match *self {
            Self::Capabilities => Command::Capabilities,
            Self::Refresh => Command::Refresh,
            Self::Get { id } => Command::GetControl { id },
            Self::Set { id, value } => Command::SetControl { id, value },
            Self::Ptz { axis, value } => Command::Ptz {
                capability: axis,
                value,
            },
            Self::Focus => Command::GetFocus,
            Self::Id => Command::GetId,
        }
    }
}

fn parse_control_id(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("invalid control id '{s}': {err}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            exit_code(&err)
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<(), ControlError> {
    let config = Config::load(&cli.config)?;
    let service = start_linux(&config);

    let events = service.subscribe();
    let watcher = thread::Builder::new()
        .name("bus-events".to_owned())
        .spawn(move || {
            for event in events {
                match event {
                    BusEvent::BusFailure { register, attempts } => {
                        error!(register, attempts, "I2C bus failure, check the camera cable");
                    }
                    BusEvent::BusUnavailable => error!("I2C bus unavailable"),
                }
            }
        });
    if let Err(err) = watcher {
        debug!(%err, "Bus event watcher not started");
    }

    let result = service.execute(cli.command.to_command());
    service.shutdown();
    print_response(result?)
}

fn print_response(response: Response) -> Result<(), ControlError> {
    match response {
        Response::Report(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        Response::Value { control_id, value } => println!(
            "{}",
            serde_json::json!({ "control_id": control_id, "value": value })
        ),
        Response::Focus(value) => println!("{}", serde_json::json!({ "value": value })),
        Response::Id(id) => println!("{id}"),
        Response::Done => println!("ok"),
    }
    Ok(())
}

fn exit_code(err: &ControlError) -> ExitCode {
    match err.status_code() {
        400 => ExitCode::from(2),
        403 | 404 | 409 => ExitCode::from(3),
        429 => ExitCode::from(4),
        _ => ExitCode::FAILURE,
    }
}
