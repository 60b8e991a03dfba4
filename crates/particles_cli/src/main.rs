//! Particle store inspection entry point.
//!
//! # Responsibility
//! - Open a particle store database read-only in intent and print summaries.
//! - Keep output deterministic `key=value` lines for scripting.

use clap::{Parser, Subcommand};
use particles_core::{
    init_logging_from_config, open_db_with_timeout, CoreConfig, NoPipelineParams,
    ParticleListKey, ParticleService, SqliteParticleListRepository, SqliteParticleRepository,
};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Inspect particle lists and particle documents.
#[derive(Parser)]
#[command(name = "particles")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database file; overrides the config file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory holding `particles.json`.
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List an owner's particle lists with particle counts
    Lists {
        /// Owner id (project or user)
        owner: String,
    },
    /// Show one datum's particle document
    Show {
        owner: String,
        list: String,
        datum: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let (config, db_path, busy_timeout) = resolve_store(cli)?;
    let conn = open_db_with_timeout(&db_path, busy_timeout)?;
    let lock = Arc::new(config.id_allocation_lock());
    let service = ParticleService::new(
        SqliteParticleListRepository::try_new(&conn)?,
        SqliteParticleRepository::try_new(&conn, lock)?,
        NoPipelineParams,
    );

    match &cli.command {
        Commands::Lists { owner } => {
            for list in service.lists_for_owner(owner)? {
                println!(
                    "list={} type={} source={} datums={} count={}",
                    list.key,
                    list.list_type.as_db(),
                    list.source,
                    service.datums(&list.key)?.len(),
                    service.count_all(&list.key)?
                );
            }
        }
        Commands::Show { owner, list, datum } => {
            let key = ParticleListKey::new(owner.as_str(), list.as_str())?;
            let particles = service.get_particles(&key, datum)?;
            println!("document={}/{}", key, datum);
            println!("version={}", particles.version);
            println!("count={}", particles.len());
            println!("next_id={}", service.next_id(&key, datum)?);
            println!("thresholds={}", service.get_thresholds(&key, datum)?.len());
        }
    }
    Ok(())
}

fn resolve_store(cli: &Cli) -> Result<(CoreConfig, PathBuf, Duration), Box<dyn Error>> {
    if let Some(path) = &cli.db {
        let config = CoreConfig::default();
        let busy_timeout = config.busy_timeout();
        return Ok((config, path.clone(), busy_timeout));
    }

    let config = CoreConfig::load_or_init(&cli.config_dir)?;
    // Log directories must be absolute.
    let base_dir = std::fs::canonicalize(&cli.config_dir)?;
    init_logging_from_config(&config.logging, &base_dir)?;
    let db_path = config.db_path(&base_dir);
    log::info!(
        "event=cli_start module=cli status=ok db={}",
        db_path.display()
    );
    let busy_timeout = config.busy_timeout();
    Ok((config, db_path, busy_timeout))
}
