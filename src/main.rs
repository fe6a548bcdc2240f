//! Cendoj discovery main entry point
//!
//! This is the command-line interface for the Cendoj PDF link discovery engine.

use anyhow::{anyhow, Context};
use cendoj_discovery::config::{load_config_with_hash, Config};
use cendoj_discovery::crawler::{
    discover, Orchestrator, OrchestratorParts, RunOptions, RunSummary, SessionTarget,
};
use cendoj_discovery::output::{
    export_links, load_statistics, print_identities, print_sessions, print_statistics,
    ExportFormat,
};
use cendoj_discovery::session::SessionManager;
use cendoj_discovery::storage::{self, open_storage, shared, Storage};
use cendoj_discovery::{CrawlMode, LinkStatus};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Cendoj discovery: finds and catalogs court-decision PDF links
///
/// Crawls the configured site under rate limits and identity rotation,
/// runs pre-crawl discovery strategies, and stores every PDF link it
/// finds in a deduplicated SQLite catalog. Sessions checkpoint as they go
/// and can be resumed after an interruption.
#[derive(Parser, Debug)]
#[command(name = "cendoj-discovery")]
#[command(version)]
#[command(about = "Cendoj PDF link discovery engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new discovery session
    Discover {
        /// Crawl mode: shallow, deep or full
        #[arg(long, value_parser = parse_mode)]
        mode: Option<CrawlMode>,

        /// Maximum number of pages to fetch in this run
        #[arg(long)]
        limit: Option<u64>,

        /// Validate discovered links when the session completes
        #[arg(long, conflicts_with = "no_validate")]
        validate: bool,

        /// Skip validation even if the configuration enables it
        #[arg(long)]
        no_validate: bool,
    },

    /// Resume an interrupted or paused session
    Resume {
        /// Session to resume (default: the latest resumable one)
        session_id: Option<String>,

        /// Maximum number of pages to fetch in this run
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Mark a session left running by a crash as interrupted
    Recover { session_id: String },

    /// Cancel a session so it is never resumed
    Cancel { session_id: String },

    /// Check discovered links that have not been validated yet
    Validate {
        /// Maximum number of links to check
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Export stored links to a file
    Export {
        /// Destination file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format: csv, json or txt
        #[arg(long, default_value = "csv", value_parser = parse_format)]
        format: ExportFormat,

        /// Only export links in this status
        #[arg(long, value_parser = parse_status)]
        status: Option<LinkStatus>,

        /// Maximum number of links to export
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show catalog, session and identity statistics
    Stats,

    /// List recent sessions
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show identity health
    Identities,
}

fn parse_mode(s: &str) -> Result<CrawlMode, String> {
    CrawlMode::from_db_string(&s.to_ascii_lowercase())
        .ok_or_else(|| format!("unknown mode '{}' (expected shallow, deep or full)", s))
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    s.parse::<ExportFormat>().map_err(|e| e.to_string())
}

fn parse_status(s: &str) -> Result<LinkStatus, String> {
    LinkStatus::from_db_string(&s.to_ascii_lowercase()).ok_or_else(|| {
        let known: Vec<String> = LinkStatus::all_states()
            .iter()
            .map(|s| s.to_string())
            .collect();
        format!("unknown status '{}' (expected one of {})", s, known.join(", "))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::debug!("Configuration loaded (hash: {})", hash);

    match cli.command {
        Command::Discover {
            mode,
            limit,
            validate,
            no_validate,
        } => {
            let mut config = config;
            if let Some(mode) = mode {
                config.crawler.mode = mode;
            }
            let validate = if validate {
                Some(true)
            } else if no_validate {
                Some(false)
            } else {
                None
            };
            handle_run(
                config,
                RunOptions {
                    target: SessionTarget::Fresh,
                    max_pages: limit,
                    validate,
                },
            )
            .await
        }
        Command::Resume { session_id, limit } => {
            handle_run(
                config,
                RunOptions {
                    target: SessionTarget::Resume(session_id),
                    max_pages: limit,
                    validate: None,
                },
            )
            .await
        }
        Command::Recover { session_id } => {
            let session = session_manager(&config)?.recover(&session_id)?;
            println!(
                "Session {} recovered ({} pages visited, resumable with `resume {}`)",
                session.id, session.counters.pages_visited, session.id
            );
            Ok(())
        }
        Command::Cancel { session_id } => {
            session_manager(&config)?.cancel(&session_id)?;
            println!("Session {} cancelled", session_id);
            Ok(())
        }
        Command::Validate { limit } => handle_validate(config, limit).await,
        Command::Export {
            output,
            format,
            status,
            limit,
        } => {
            let storage = open_database(&config)?;
            let written = export_links(&storage, &output, format, status, limit)?;
            println!("Exported {} links to {}", written, output.display());
            Ok(())
        }
        Command::Stats => {
            println!("Database: {}\n", config.output.database_path);
            let storage = open_database(&config)?;
            print_statistics(&load_statistics(&storage)?);
            Ok(())
        }
        Command::Sessions { limit } => {
            let storage = open_database(&config)?;
            print_sessions(&storage.list_sessions(limit)?);
            Ok(())
        }
        Command::Identities => {
            let storage = open_database(&config)?;
            print_identities(&storage.load_identities()?);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("cendoj_discovery=info,warn"),
            1 => EnvFilter::new("cendoj_discovery=debug,info"),
            2 => EnvFilter::new("cendoj_discovery=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_database(config: &Config) -> anyhow::Result<storage::SqliteStorage> {
    open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("failed to open {}", config.output.database_path))
}

fn session_manager(config: &Config) -> anyhow::Result<SessionManager> {
    let storage = shared(open_database(config)?);
    Ok(SessionManager::new(storage, &config.session))
}

/// Handles `discover` and `resume`
async fn handle_run(config: Config, options: RunOptions) -> anyhow::Result<()> {
    tracing::info!(
        "Mode: {}, seeds: {}, database: {}",
        config.crawler.mode,
        config.seed_urls().len(),
        config.output.database_path
    );

    match discover(config, options).await {
        Ok(summary) => {
            print_run_summary(&summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Discovery failed: {}", e);
            Err(anyhow!(e))
        }
    }
}

/// Handles `validate`
async fn handle_validate(config: Config, limit: Option<usize>) -> anyhow::Result<()> {
    let storage = shared(open_database(&config)?);
    let orchestrator = Orchestrator::new(OrchestratorParts::from_config(config, storage));
    let report = orchestrator.validate_pending(limit).await?;
    println!(
        "Validated {} links: {} accessible, {} blocked, {} broken",
        report.checked, report.accessible, report.blocked, report.broken
    );
    Ok(())
}

fn print_run_summary(summary: &RunSummary) {
    let c = &summary.counters;
    println!("Session {} {}", summary.session_id, summary.status);
    println!("  Pages visited: {}", c.pages_visited);
    println!(
        "  PDF links: {} found, {} new, {} duplicates",
        c.links_found, c.new_links, c.duplicates
    );
    println!("  Errors: {}, blocked: {}", c.errors, c.blocked);
    if let Some(report) = &summary.validation {
        println!(
            "  Validation: {} checked, {} accessible, {} blocked, {} broken",
            report.checked, report.accessible, report.blocked, report.broken
        );
    }
}
