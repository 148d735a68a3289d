//! Command-line front end for finalyze.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use finalyze::analysis::{Analyzer, CommandAnalyzer, DocumentTextExtractor, TextExtractor};
use finalyze::config::{load_config, Config};
use finalyze::db::Database;
use finalyze::dispatcher::{Dispatcher, DispatcherSettings, SubmitRequest};
use finalyze::inline::InlineAnalysis;
use finalyze::logging::init_logging;
use finalyze::queue::{Queue, SqliteQueue};
use finalyze::status::{StatusService, StatusSettings};
use finalyze::storage::ArtifactStore;
use finalyze::worker::{JobProcessor, ProcessorSettings, WorkerPool};

#[derive(Parser)]
#[command(name = "finalyze")]
#[command(about = "Asynchronous financial document analysis")]
#[command(version)]
struct Cli {
    /// JSON config file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and run migrations
    Init,

    /// Queue a document for background analysis
    Submit {
        file: PathBuf,
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Analyse a document immediately and print the report
    Analyze {
        file: PathBuf,
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Process queued jobs until interrupted
    Worker {
        /// Overrides worker.worker_count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show the state of a job
    Status { job_id: String },

    /// Show the result of a completed job
    Result { job_id: String },

    /// List completed analyses, newest first
    History {
        #[arg(short, long)]
        limit: Option<u32>,
        #[arg(short, long)]
        offset: Option<u64>,
    },

    /// Show aggregate statistics
    Stats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    init_logging(&logging)?;

    match cli.command {
        Commands::Init => {
            open_database(&config)?;
            println!("Database ready at {}", config.database_path.display());
        }
        Commands::Submit { file, query } => {
            let db = open_database(&config)?;
            let queue: Arc<dyn Queue> = Arc::new(SqliteQueue::new(
                db.clone(),
                config.worker.visibility_timeout(),
            ));
            let dispatcher = Dispatcher::new(
                db,
                queue,
                ArtifactStore::new(&config.upload_directory),
                DispatcherSettings::from_config(&config),
            );
            let submission = dispatcher.submit(&read_request(&file, query)?)?;
            print_json(&submission)?;
        }
        Commands::Analyze { file, query } => {
            let inline = InlineAnalysis::new(
                ArtifactStore::new(&config.upload_directory),
                build_analyzer(&config)?,
                config.max_upload_bytes,
            );
            let report = inline.analyze(&read_request(&file, query)?)?;
            print_json(&report)?;
        }
        Commands::Worker { workers } => run_workers(&config, workers)?,
        Commands::Status { job_id } => {
            print_json(&status_service(&config)?.get_status(&job_id)?)?;
        }
        Commands::Result { job_id } => {
            print_json(&status_service(&config)?.get_result(&job_id)?)?;
        }
        Commands::History { limit, offset } => {
            print_json(&status_service(&config)?.get_history(limit, offset)?)?;
        }
        Commands::Stats => {
            print_json(&status_service(&config)?.get_stats()?)?;
        }
    }

    Ok(())
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    Database::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database_path.display()
        )
    })
}

fn status_service(config: &Config) -> anyhow::Result<StatusService> {
    Ok(StatusService::new(
        open_database(config)?,
        StatusSettings::from_config(config),
    ))
}

fn read_request(file: &Path, query: Option<String>) -> anyhow::Result<SubmitRequest> {
    let content =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let request = SubmitRequest::new(filename, content);
    Ok(match query {
        Some(q) => request.with_query(q),
        None => request,
    })
}

fn build_analyzer(config: &Config) -> anyhow::Result<Arc<dyn Analyzer>> {
    let Some(program) = config.analyzer.command.as_deref() else {
        bail!("analyzer.command must be set in the config to run analyses");
    };

    let extractor: Arc<dyn TextExtractor> = Arc::new(DocumentTextExtractor::new());
    Ok(Arc::new(
        CommandAnalyzer::new(program, extractor)
            .with_args(config.analyzer.args.clone())
            .with_working_directory(config.analyzer.working_directory.clone()),
    ))
}

fn run_workers(config: &Config, workers: Option<usize>) -> anyhow::Result<()> {
    let worker_count = workers.unwrap_or(config.worker.worker_count);
    if worker_count == 0 {
        bail!("--workers must be at least 1");
    }

    let db = open_database(config)?;
    let queue = SqliteQueue::new(db.clone(), config.worker.visibility_timeout());
    let backlog = queue.depth().context("Failed to read the queue")?;
    let queue: Arc<dyn Queue> = Arc::new(queue);
    let processor = Arc::new(JobProcessor::new(
        db,
        queue,
        ArtifactStore::new(&config.upload_directory),
        build_analyzer(config)?,
        ProcessorSettings::from_config(config),
    ));

    let pool = WorkerPool::start(processor, worker_count, config.worker.poll_interval())?;

    let shutdown = pool.shutdown_handle();
    ctrlc::set_handler(move || {
        log::info!("Received interrupt, finishing in-flight jobs...");
        shutdown.store(true, Ordering::Relaxed);
    })
    .context("Failed to install Ctrl-C handler")?;

    log::info!(
        "Worker pool running with {} workers, {} messages queued",
        worker_count,
        backlog
    );

    while !pool.is_shutdown() {
        if let Some(outcome) = pool.recv_outcome_timeout(Duration::from_millis(500)) {
            log::debug!("Job {}: {:?}", outcome.job_id(), outcome);
        }
    }

    pool.wait();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
