use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, StorageBackend, CONFIG_ENV, DATA_ENV};
use crate::phrases::PhraseStore;
use crate::storage;

pub mod commands;

use self::commands::{AddArgs, DeleteArgs, EditArgs, ListArgs};

#[derive(Parser, Debug)]
#[command(
    name = "phrasecards",
    version,
    about = "English/Chinese phrase flashcards, filtered by scene"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over PHRASECARDS_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over PHRASECARDS_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Keep phrases in memory only; nothing is written to disk
    #[arg(long, global = true)]
    pub ephemeral: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Add a phrase
    Add(AddArgs),
    /// Print phrases, optionally filtered by scene
    List(ListArgs),
    /// Change fields of an existing phrase
    Edit(EditArgs),
    /// Delete a phrase after confirmation
    Delete(DeleteArgs),
}

enum LogTarget<'a> {
    Stderr,
    File(&'a Path),
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
    let log_file = paths.log_file();
    let target = match command {
        Commands::Tui => LogTarget::File(&log_file),
        _ => LogTarget::Stderr,
    };
    init_tracing(&cli.log_level, target)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let mut config = loader.load_or_init()?;
    if cli.ephemeral {
        config.storage.backend = StorageBackend::Memory;
    }
    let storage = storage::init(&config.storage)?;
    let (mut store, report) = PhraseStore::open(storage, &config.storage);
    if let Some(warning) = report.warning() {
        tracing::warn!("{warning}");
    }

    let config = Arc::new(config);
    match command {
        Commands::Tui => commands::run_tui(config, store, &report),
        Commands::Add(args) => commands::print(commands::add_phrase(&mut store, args)),
        Commands::List(args) => {
            print!("{}", commands::list_phrases(&store, &args));
            Ok(())
        }
        Commands::Edit(args) => commands::print(commands::edit_phrase(&mut store, args)),
        Commands::Delete(args) => commands::print(commands::delete_phrase(
            &mut store,
            args,
            commands::confirm_on_terminal,
        )),
    }
}

fn init_tracing(level: &str, target: LogTarget<'_>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match target {
            LogTarget::Stderr => fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init(),
            LogTarget::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
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
