//! # plansync CLI
//!
//! The `plansync` binary creates the project database, seeds epics and
//! features, inspects the filename patterns and runs markdown sync.
//!
//! ## Usage
//!
//! ```bash
//! plansync --config ./plansync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `plansync init` | Create the SQLite database and run schema migrations |
//! | `plansync epic add <KEY> --title <T>` | Create an epic row |
//! | `plansync epic list` | List epics |
//! | `plansync feature add <KEY> --title <T>` | Create a feature row under its epic |
//! | `plansync patterns [--validate]` | Show or validate the effective filename patterns |
//! | `plansync sync` | Import task files and reconcile them with the database |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! plansync init --config ./plansync.toml
//!
//! # Seed the hierarchy the task folders live in
//! plansync epic add E04 --title "Search"
//! plansync feature add E04-F02 --title "Cache"
//!
//! # Preview what a sync would do
//! plansync sync --dry-run
//!
//! # Rescan everything and print the JSON report
//! plansync sync --full --json
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use plansync::config::{self, Config};
use plansync::conflict::ConflictStrategy;
use plansync::extract::humanize;
use plansync::path_infer::{parse_epic_folder, parse_feature_folder};
use plansync::patterns::PatternRegistry;
use plansync::progress::ProgressMode;
use plansync::sqlite_store::SqliteStore;
use plansync::store::{ScopeLookup, TaskStore};
use plansync::sync::{SyncEngine, SyncOptions};
use plansync::{db, migrate};

/// plansync keeps markdown task files and a SQLite project database in sync.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with `[db]` and `[sync]` sections.
#[derive(Parser)]
#[command(
    name = "plansync",
    about = "Keep markdown task files and a SQLite project database in sync",
    version,
    long_about = "plansync discovers task documents under a documentation root, assigns \
    stable task keys written back into their YAML frontmatter, and imports or reconciles \
    them with the task rows of a SQLite project database."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./plansync.toml")]
    config: PathBuf,

    /// Debug logging on stderr. `RUST_LOG` takes precedence.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the epics, features, tasks,
    /// task_history and checkpoints tables. Safe to run repeatedly.
    Init,

    /// Manage epics.
    Epic {
        #[command(subcommand)]
        action: EpicAction,
    },

    /// Manage features.
    Feature {
        #[command(subcommand)]
        action: FeatureAction,
    },

    /// Show the effective filename patterns.
    ///
    /// Loads `sync.patterns_file` (or the built-in defaults) and prints each
    /// enabled pattern. Invalid configuration exits non-zero with every
    /// violation listed.
    Patterns {
        /// Only validate; print a one-line result.
        #[arg(long)]
        validate: bool,
    },

    /// Sync task files with the database.
    ///
    /// Files without a `task_key` get one allocated and written into their
    /// frontmatter. Per-file problems are reported and do not fail the run.
    Sync {
        /// Allocate keys and reconcile in memory only. Nothing is written.
        #[arg(long)]
        dry_run: bool,

        /// Ignore the last-sync checkpoint and process every file.
        #[arg(long)]
        full: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        /// Conflict strategy: `file-wins`, `database-wins` or `newer-wins`.
        /// Overrides `sync.strategy`.
        #[arg(long)]
        strategy: Option<String>,

        /// Create missing epic and feature rows instead of skipping files.
        #[arg(long)]
        create_missing: bool,

        /// Register epic and feature folders before syncing tasks.
        /// Overrides `sync.discover_scopes`.
        #[arg(long)]
        discover: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

#[derive(Subcommand)]
enum EpicAction {
    /// Create an epic.
    Add {
        /// Epic key, e.g. `E04`.
        key: String,

        #[arg(long)]
        title: String,
    },
    /// List epics.
    List,
}

#[derive(Subcommand)]
enum FeatureAction {
    /// Create a feature under an existing epic.
    Add {
        /// Feature key, e.g. `E04-F02` or `E04-P01-F02`.
        key: String,

        /// Defaults to the humanized key.
        #[arg(long)]
        title: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "plansync=debug" } else { "plansync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    let pool = db::connect(cfg).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(SqliteStore::new(pool))
}

fn load_registry(cfg: &Config) -> Result<PatternRegistry> {
    let registry = PatternRegistry::load_file(cfg.sync.patterns_file.as_deref())?;
    for warning in registry.warnings() {
        eprintln!("warning: {}", warning);
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Epic { action } => match action {
            EpicAction::Add { key, title } => {
                if parse_epic_folder(&key).as_deref() != Some(key.as_str()) {
                    bail!("Invalid epic key '{}': expected E## (e.g. E04)", key);
                }
                let store = open_store(&cfg).await?;
                if store.epic_id(&key).await?.is_some() {
                    bail!("Epic {} already exists", key);
                }
                let epic = store.create_epic(&key, &title).await?;
                println!("Created epic {} ({})", epic.key, epic.title);
            }
            EpicAction::List => {
                let store = open_store(&cfg).await?;
                let epics = store.list_epics().await?;
                if epics.is_empty() {
                    println!("No epics.");
                }
                for epic in epics {
                    println!("{}  {}", epic.key, epic.title);
                }
            }
        },
        Commands::Feature { action } => match action {
            FeatureAction::Add { key, title } => {
                let Some((feature_key, epic_key)) =
                    parse_feature_folder(&key).filter(|(feature, _)| *feature == key)
                else {
                    bail!("Invalid feature key '{}': expected E##-F## or E##-P##-F##", key);
                };
                let store = open_store(&cfg).await?;
                let epic_id = store
                    .epic_id(&epic_key)
                    .await?
                    .with_context(|| format!("Epic {} does not exist; create it first", epic_key))?;
                if store.feature_id(&feature_key).await?.is_some() {
                    bail!("Feature {} already exists", feature_key);
                }
                let title = title.unwrap_or_else(|| humanize(&feature_key));
                let feature = store.create_feature(epic_id, &feature_key, &title).await?;
                println!(
                    "Created feature {} ({}) in epic {}",
                    feature.key, feature.title, epic_key
                );
            }
        },
        Commands::Patterns { validate } => {
            let registry = load_registry(&cfg)?;
            if validate {
                println!("Pattern configuration OK ({} patterns).", registry.patterns().len());
            } else {
                for pattern in registry.patterns() {
                    println!(
                        "{:<16} {:<8} {}",
                        pattern.name,
                        pattern.entity.to_string(),
                        pattern.source
                    );
                }
            }
        }
        Commands::Sync {
            dry_run,
            full,
            json,
            strategy,
            create_missing,
            discover,
            progress,
        } => {
            let registry = load_registry(&cfg)?;

            let mut options = SyncOptions::from_config(&cfg.sync)?;
            options.dry_run = dry_run;
            options.full = full;
            options.create_missing |= create_missing;
            options.discover_scopes |= discover;
            if let Some(strategy) = strategy {
                options.strategy = strategy.parse::<ConflictStrategy>()?;
            }

            let store = Arc::new(open_store(&cfg).await?);

            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        eprintln!("interrupt: finishing current file");
                        cancel.store(true, Ordering::SeqCst);
                    }
                });
            }

            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let engine = SyncEngine::new(store, registry, options)
                .with_progress(progress.reporter())
                .with_cancel_flag(cancel);
            let report = engine.run().await?;

            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render_text());
            }
        }
    }

    Ok(())
}
