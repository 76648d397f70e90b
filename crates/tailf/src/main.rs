//! tailf: follow files and commands with timestamps and severity highlighting.
//!
//! # Usage
//!
//! ```bash
//! # Follow new lines of a log file
//! tailf file /var/log/app.log --timestamps --severity
//!
//! # Follow a command's output until it exits
//! tailf run --severity -- cargo test
//!
//! # Show the effective configuration
//! tailf config --show
//! ```

#![forbid(unsafe_code)]

mod terminal;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tailf_core::config::{Config, ConfigPatch, resolve_config_path};
use tailf_core::logging::init_logging;
use tailf_core::process::spawn_process;
use tailf_core::registry::SessionRegistry;
use tailf_core::scheduler::{Command, Scheduler, SchedulerHandle};
use tailf_core::source::StdFileSystem;
use tailf_core::surface::SurfaceId;
use tracing::{debug, info};

use crate::terminal::{OutputFormat, TerminalHost};

/// The single surface the CLI renders.
const SURFACE: SurfaceId = SurfaceId(1);

/// Follow growing files and command output.
#[derive(Parser, Debug)]
#[command(name = "tailf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to $TAILF_CONFIG, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit one JSON object per line.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Disable ANSI colors.
    #[arg(long, global = true, default_value_t = false)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow a file as it grows.
    File(FileArgs),
    /// Run a command and follow its output.
    Run(RunArgs),
    /// Show configuration.
    Config {
        /// Print the effective configuration.
        #[arg(long, default_value_t = false)]
        show: bool,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct AnnotationArgs {
    /// Stamp each line with its arrival time.
    #[arg(long, default_value_t = false)]
    timestamps: bool,

    /// Highlight severity keywords.
    #[arg(long, default_value_t = false)]
    severity: bool,
}

#[derive(Args, Debug)]
struct FileArgs {
    /// File to follow.
    path: PathBuf,

    #[command(flatten)]
    annotations: AnnotationArgs,

    /// Poll interval in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Print existing content before following.
    #[arg(long, default_value_t = false)]
    from_start: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    annotations: AnnotationArgs,

    /// Command and arguments, after `--`.
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config: config_path,
        json,
        no_color,
        command,
    } = cli;

    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;
    init_logging(&config.general);

    let format = output_format(json, no_color);
    match command {
        Commands::Config { show } => show_config(&config, config_path.as_deref(), json, show),
        Commands::File(args) => follow_file(config, args, format).await,
        Commands::Run(args) => follow_command(config, args, format).await,
    }
}

fn output_format(json: bool, no_color: bool) -> OutputFormat {
    if json {
        return OutputFormat::Json;
    }
    let color =
        !no_color && std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal();
    OutputFormat::Text { color }
}

fn show_config(config: &Config, explicit: Option<&Path>, json: bool, show: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    if show {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    match resolve_config_path(explicit) {
        Some(path) => println!("config: {}", path.display()),
        None => println!("config: (defaults)"),
    }
    Ok(())
}

/// Build a registry with the requested annotations on, following enabled.
fn prepare(
    config: Config,
    annotations: AnnotationArgs,
    host: &mut TerminalHost<std::io::Stdout>,
) -> Result<SessionRegistry> {
    let mut registry = SessionRegistry::new(config).context("invalid configuration")?;
    if annotations.timestamps {
        registry.timestamps_enable(host, SURFACE, false);
    }
    if annotations.severity {
        registry.severity_hl_enable(host, SURFACE, false);
    }
    registry.enable(host, SURFACE);
    Ok(registry)
}

/// Shut the scheduler down on Ctrl-C.
fn shutdown_on_ctrl_c(handle: SchedulerHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            handle.shutdown().await;
        }
    });
}

async fn follow_file(config: Config, args: FileArgs, format: OutputFormat) -> Result<()> {
    let config = match args.interval_ms {
        Some(ms) => config
            .merged(&ConfigPatch {
                poll_interval_ms: Some(ms),
                ..ConfigPatch::default()
            })
            .context("invalid --interval-ms")?,
        None => config,
    };

    let mut host = TerminalHost::new(std::io::stdout(), format, SURFACE);
    let mut registry = prepare(config, args.annotations, &mut host)?;
    let fs = StdFileSystem;
    registry.attach_file(&fs, SURFACE, &args.path, args.from_start);
    info!(path = %args.path.display(), "Following file");

    let scheduler = Scheduler::new(registry, host, fs);
    shutdown_on_ctrl_c(scheduler.handle());
    scheduler.run().await;
    Ok(())
}

async fn follow_command(config: Config, args: RunArgs, format: OutputFormat) -> Result<()> {
    let mut host = TerminalHost::new(std::io::stdout(), format, SURFACE);
    let registry = prepare(config, args.annotations, &mut host)?;

    let mut scheduler = Scheduler::new(registry, host, StdFileSystem).stop_when_sources_end(true);
    let spawned = spawn_process(&args.command, SURFACE, scheduler.handle().sender())
        .with_context(|| format!("failed to run {}", args.command.join(" ")))?;

    // Bind before the loop drains any output chunk.
    let _ = scheduler.handle_event(
        Command::AttachProcess {
            surface: SURFACE,
            handle: spawned.handle(),
        }
        .into(),
    );

    shutdown_on_ctrl_c(scheduler.handle());
    scheduler.run().await;
    Ok(())
}
