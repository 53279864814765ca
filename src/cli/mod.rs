use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::coordinator::MutationCycle;
use crate::storage;
use crate::timeline::LocalZone;

pub mod commands;

use self::commands::{DeleteArgs, EditArgs, ExportArgs, SendArgs};

const LOG_FILE: &str = "braindump.log";

#[derive(Parser, Debug)]
#[command(
    name = "braindump",
    version,
    about = "A private journal you write to like a chat"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over BRAINDUMP_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over BRAINDUMP_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive journal (default)
    Tui,
    /// Append a message
    Send(SendArgs),
    /// Print every message grouped under its day
    List,
    /// Replace the text of a message
    Edit(EditArgs),
    /// Delete a message
    Delete(DeleteArgs),
    /// Write all messages to a CSV file
    Export(ExportArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);
    let log_target = match command {
        Commands::Tui => LogTarget::File(paths.log_dir.join(LOG_FILE)),
        _ => LogTarget::Stderr,
    };
    init_tracing(&cli.log_level, &log_target)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let zone = LocalZone::system();
    let config = loader.load_or_init()?;
    let storage = storage::init(&paths, &config.storage)?;

    let config = Arc::new(config);
    match command {
        Commands::Tui => {
            let mut app = App::new(config.clone(), storage.clone(), zone)?;
            commands::run_tui(&mut app)
        }
        Commands::Send(args) => {
            let cycle = MutationCycle::new(storage, config.sender_id.clone(), zone);
            commands::send_message(&cycle, args)
        }
        Commands::List => {
            let cycle = MutationCycle::new(storage, config.sender_id.clone(), zone);
            commands::list_messages(&cycle)
        }
        Commands::Edit(args) => {
            let cycle = MutationCycle::new(storage, config.sender_id.clone(), zone);
            commands::edit_message(&cycle, args)
        }
        Commands::Delete(args) => {
            let cycle = MutationCycle::new(storage, config.sender_id.clone(), zone);
            commands::delete_message(&cycle, args)
        }
        Commands::Export(args) => commands::export_messages(&config, &storage, &zone, args),
    }
}

enum LogTarget {
    Stderr,
    /// The interactive view owns the terminal, so logs go to a file.
    File(PathBuf),
}

fn init_tracing(level: &str, target: &LogTarget) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| -> Result<()> {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match target {
            LogTarget::Stderr => fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init(),
            LogTarget::File(path) => {
                let file = open_log_file(path)?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
        }
        Ok(())
    })
    .map(|_| ())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
