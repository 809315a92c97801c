//! slotwatch CLI
//!
//! Local entry point: manage tracked subjects and run the watcher.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use slotwatch::{
    error::Result,
    models::Config,
    pipeline::{PollCycle, Registry, Scheduler, purge_unseen},
    services::{LogNotifier, Notifier, PageScraper, PushbulletNotifier},
    storage::{JsonFileStore, StateStore},
};

/// slotwatch - lesson slot availability watcher
#[derive(Parser, Debug)]
#[command(
    name = "slotwatch",
    version,
    about = "Push a notification when a tutor opens new lesson slots"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sweep on a fixed interval until interrupted
    Watch {
        /// Log notifications instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a single sweep and print the report
    Sweep {
        /// Log notifications instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Start tracking a subject (ID or profile URL)
    Register {
        subject_id: String,

        /// Push access token to notify
        #[arg(short, long)]
        target: String,

        /// Owner the registration belongs to
        #[arg(short, long)]
        owner: Option<String>,
    },

    /// Stop tracking a subject
    Remove {
        subject_id: String,

        #[arg(short, long)]
        owner: Option<String>,
    },

    /// List tracked subjects
    List {
        #[arg(short, long)]
        owner: Option<String>,
    },

    /// Delete subjects whose owner has not been seen within the retention window
    Purge,

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn build_notifier(config: &Config, dry_run: bool) -> Result<Arc<dyn Notifier>> {
    if dry_run {
        log::info!("Dry run: notifications will only be logged");
        Ok(Arc::new(LogNotifier))
    } else {
        Ok(Arc::new(PushbulletNotifier::new(config)?))
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };
    config.apply_env_overrides();
    init_logging(cli.verbose, &config.logging.level);

    if !cli.config.exists() {
        log::warn!(
            "No config at {}, using defaults",
            cli.config.display()
        );
    }
    config.validate()?;

    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::open(&config.storage.path).await?);
    let scraper = Arc::new(PageScraper::new(&config)?);

    match cli.command {
        Command::Watch { dry_run } => {
            let notifier = build_notifier(&config, dry_run)?;
            let cycle = PollCycle::new(store, scraper, notifier, &config);
            let scheduler = Scheduler::new(cycle, config.watcher.interval());

            scheduler
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        log::error!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                    log::info!("Shutdown requested");
                })
                .await;
        }

        Command::Sweep { dry_run } => {
            let notifier = build_notifier(&config, dry_run)?;
            let cycle = PollCycle::new(store, scraper, notifier, &config);
            let scheduler = Scheduler::new(cycle, config.watcher.interval());

            match scheduler.run_now().await {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => log::error!("Sweep did not complete"),
            }
        }

        Command::Register {
            subject_id,
            target,
            owner,
        } => {
            let registry = Registry::new(store, scraper, config.registration.clone());
            let subject = registry
                .register(&subject_id, &target, owner.as_deref())
                .await?;
            println!("Now watching {} ({})", subject.label(), subject.subject_id);
        }

        Command::Remove { subject_id, owner } => {
            let registry = Registry::new(store, scraper, config.registration.clone());
            if registry.remove(&subject_id, owner.as_deref()).await? {
                println!("Stopped watching {}", subject_id);
            } else {
                println!("{} was not being watched", subject_id);
            }
        }

        Command::List { owner } => {
            let registry = Registry::new(store, scraper, config.registration.clone());
            let subjects = registry.list(owner.as_deref()).await?;
            if subjects.is_empty() {
                println!("No subjects tracked.");
            }
            for subject in subjects {
                let status = if subject.is_missing() { " [missing]" } else { "" };
                println!(
                    "{:<12} {:<24} slots={:<3} target={}{}",
                    subject.subject_id,
                    subject.label(),
                    subject.last_observed_count,
                    subject.notify_target,
                    status
                );
            }
        }

        Command::Purge => match config.retention.max_age() {
            Some(max_age) => {
                let removed = purge_unseen(store.as_ref(), max_age, chrono::Utc::now()).await?;
                println!("Purged {} subjects", removed);
            }
            None => println!("Retention is disabled"),
        },

        Command::Validate => {
            // Parsing and validation already happened above.
            log::info!("✓ Config OK ({})", cli.config.display());
        }
    }

    Ok(())
}
