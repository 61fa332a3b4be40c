//! Operator CLI over the local landmark store.
//!
//! # Responsibility
//! - Inspect the cached landmark set and the operation queue without a remote.
//! - Run queue housekeeping (purge, recover, retry or discard dead letters).
//!
//! Output is one JSON document per line so it can be piped into other tools.

use clap::{Parser, Subcommand};
use landmark_core::model::operation::OperationId;
use landmark_core::model::wire::{encode_landmark, encode_operation};
use landmark_core::repo::landmark_repo::{LandmarkRepository, SqliteLandmarkRepository};
use landmark_core::{
    core_version, filter_by_distance, init_from_config, open_db, share, Coordinates, CoreConfig,
    Landmark, OperationQueue, QueuedOperation, SharedConnection,
};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "landmark_cli", about = "Inspect the local landmark cache and queue")]
struct Cli {
    /// JSON config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the core version
    Version,
    /// Cached landmarks, newest first
    List,
    /// Title/description substring match
    Search { text: String },
    /// Landmarks in one category
    Category { name: String },
    /// Landmarks within a radius
    Nearby {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        radius_km: f64,
    },
    /// Every queued operation
    Queue,
    /// Operations that exhausted their retries
    DeadLetters,
    /// Queue entry counts per status
    Stats,
    /// Delete completed operations
    Purge,
    /// Reset interrupted operations to pending
    Recover,
    /// Give a dead letter a fresh retry budget
    Retry { id: OperationId },
    /// Drop a dead letter
    Discard { id: OperationId },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::List => "list",
            Self::Search { .. } => "search",
            Self::Category { .. } => "category",
            Self::Nearby { .. } => "nearby",
            Self::Queue => "queue",
            Self::DeadLetters => "dead-letters",
            Self::Stats => "stats",
            Self::Purge => "purge",
            Self::Recover => "recover",
            Self::Retry { .. } => "retry",
            Self::Discard { .. } => "discard",
        }
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    if let Command::Version = cli.cmd {
        println!("landmark_core version={}", core_version());
        return Ok(());
    }

    let config = match cli.config {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::default(),
    };
    init_from_config(&config)?;

    let conn = share(open_db(&config.db_path)?);
    info!(
        "event=cli_command module=cli status=start command={}",
        cli.cmd.name()
    );
    execute(&conn, cli.cmd)
}

fn execute(conn: &SharedConnection, command: Command) -> CliResult<()> {
    let queue = OperationQueue::new(conn.clone());
    match command {
        Command::Version => println!("landmark_core version={}", core_version()),
        Command::List => print_landmarks(&with_store(conn, |repo| repo.get_all())?)?,
        Command::Search { text } => {
            print_landmarks(&with_store(conn, |repo| repo.search_by_text(&text))?)?
        }
        Command::Category { name } => {
            print_landmarks(&with_store(conn, |repo| repo.get_by_category(&name))?)?
        }
        Command::Nearby {
            lat,
            lon,
            radius_km,
        } => {
            let center = Coordinates::new(lat, lon)?;
            let all = with_store(conn, |repo| repo.get_all())?;
            print_landmarks(&filter_by_distance(&all, center, radius_km))?;
        }
        Command::Queue => print_operations(&queue.list_all()?)?,
        Command::DeadLetters => print_operations(&queue.dead_letters()?)?,
        Command::Stats => {
            let counts = queue.counts()?;
            println!(
                "{}",
                serde_json::json!({
                    "pending": counts.pending,
                    "processing": counts.processing,
                    "failedRetryable": counts.failed_retryable,
                    "deadLettered": counts.dead_lettered,
                    "completed": counts.completed,
                })
            );
        }
        Command::Purge => {
            println!(
                "{}",
                serde_json::json!({ "purged": queue.purge_completed()? })
            )
        }
        Command::Recover => {
            println!(
                "{}",
                serde_json::json!({ "recovered": queue.recover_interrupted()? })
            )
        }
        Command::Retry { id } => print_operations(&[queue.retry_dead_letter(id)?])?,
        Command::Discard { id } => print_operations(&[queue.discard_dead_letter(id)?])?,
    }
    Ok(())
}

fn with_store<T>(
    conn: &SharedConnection,
    op: impl FnOnce(&SqliteLandmarkRepository<'_>) -> landmark_core::RepoResult<T>,
) -> CliResult<T> {
    let guard = landmark_core::db::lock(conn)?;
    Ok(op(&SqliteLandmarkRepository::new(&guard))?)
}

fn print_landmarks(landmarks: &[Landmark]) -> CliResult<()> {
    for landmark in landmarks {
        println!("{}", encode_landmark(landmark)?);
    }
    Ok(())
}

fn print_operations(operations: &[QueuedOperation]) -> CliResult<()> {
    for operation in operations {
        println!("{}", encode_operation(operation)?);
    }
    Ok(())
}
