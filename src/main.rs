//! # Schema Scout CLI (`scout`)
//!
//! The `scout` binary is the primary interface for Schema Scout. It
//! provides commands for database initialization, schema metadata import,
//! index lifecycle management, and entity search.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scout init` | Create the SQLite database and run schema migrations |
//! | `scout import <manifest>` | Import a project manifest (tables + glossary) |
//! | `scout index create` | Create and build a dense or sparse index |
//! | `scout index rebuild <id>` | Rebuild an existing index |
//! | `scout index list` | List a project's indexes and their states |
//! | `scout index status <id>` | Show one index's build state |
//! | `scout search "<text>"` | Resolve a text fragment to schema elements |
//! | `scout models` | List known encoder models for the configured provider |
//!
//! ## Examples
//!
//! ```bash
//! scout init --config ./config/scout.toml
//! scout import ./project.json
//! scout index create --project shop --kind dense --target columns --model hash-256
//! scout search "customer total" --project shop --hint column
//! scout search "revenue" --project shop --strategy exact
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use schema_scout::builder::CreateIndexRequest;
use schema_scout::config::{load_config, Config};
use schema_scout::db;
use schema_scout::encoder::available_models;
use schema_scout::engine::Engine;
use schema_scout::ingest;
use schema_scout::migrate;
use schema_scout::models::{
    EntityHint, IndexDescriptor, IndexKind, IndexState, Strategy, TargetType,
};

/// Schema Scout — schema entity resolution and multi-strategy search for
/// natural-language data querying.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/scout.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "scout",
    about = "Schema Scout — schema entity resolution and multi-strategy search",
    version,
    long_about = "Schema Scout resolves free-text query fragments to tables, columns, and \
    glossary terms by combining semantic, keyword, fuzzy, and exact search over per-project \
    indexes, fused into one deduplicated ranking."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Import a project manifest describing tables and glossary terms.
    Import {
        /// Path to the manifest JSON file.
        manifest: PathBuf,
    },

    /// Manage search indexes.
    #[command(subcommand)]
    Index(IndexCommands),

    /// Resolve a text fragment to ranked schema elements.
    Search {
        /// The text fragment to resolve.
        text: String,

        /// Project to search in.
        #[arg(long)]
        project: String,

        /// Entity type hint: table, column, business_term, or unknown.
        #[arg(long, default_value = "unknown")]
        hint: String,

        /// Run a single strategy (exact, semantic, keyword, fuzzy)
        /// instead of the fused search.
        #[arg(long)]
        strategy: Option<String>,

        /// Maximum number of results to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List known encoder models for the configured provider.
    Models,
}

#[derive(Subcommand)]
enum IndexCommands {
    /// Create a new index and build it.
    Create {
        /// Project the index belongs to.
        #[arg(long)]
        project: String,

        /// Index kind: dense or sparse.
        #[arg(long)]
        kind: String,

        /// What to index: tables, columns, or dictionary.
        #[arg(long)]
        target: String,

        /// Encoder model id (required for dense indexes).
        #[arg(long)]
        model: Option<String>,

        /// Comma-separated element ids to cover (default: all).
        #[arg(long)]
        ids: Option<String>,
    },

    /// Rebuild an existing index with its stored configuration.
    Rebuild {
        /// Index id.
        id: String,
    },

    /// List a project's indexes.
    List {
        #[arg(long)]
        project: String,
    },

    /// Show one index's state and progress.
    Status {
        /// Index id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Import { manifest } => run_import(&config, &manifest).await,
        Commands::Index(cmd) => run_index(&config, cmd).await,
        Commands::Search {
            text,
            project,
            hint,
            strategy,
            limit,
        } => run_search(&config, &text, &project, &hint, strategy.as_deref(), limit).await,
        Commands::Models => run_models(&config),
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    std::fs::create_dir_all(&config.storage.index_dir)?;

    println!("init");
    println!("  database: {}", config.db.path.display());
    println!("  index dir: {}", config.storage.index_dir.display());

    pool.close().await;
    Ok(())
}

async fn run_import(config: &Config, manifest_path: &PathBuf) -> Result<()> {
    let manifest = ingest::load_manifest(manifest_path)?;
    let pool = db::connect(config).await?;

    let summary = ingest::import_manifest(&pool, &manifest).await?;

    println!("import {}", manifest.project_id);
    println!("  tables: {}", summary.tables);
    println!("  glossary terms: {}", summary.glossary_terms);

    pool.close().await;
    Ok(())
}

async fn run_index(config: &Config, cmd: IndexCommands) -> Result<()> {
    let pool = db::connect(config).await?;
    let engine = Engine::new(config.clone(), pool);

    match cmd {
        IndexCommands::Create {
            project,
            kind,
            target,
            model,
            ids,
        } => {
            let kind = IndexKind::parse(&kind)
                .ok_or_else(|| anyhow::anyhow!("Unknown index kind: {}. Use dense or sparse.", kind))?;
            let target_type = TargetType::parse(&target).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown target type: {}. Use tables, columns, or dictionary.",
                    target
                )
            })?;
            let target_ids: Vec<String> = ids
                .map(|s| {
                    s.split(',')
                        .map(|id| id.trim().to_string())
                        .filter(|id| !id.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            let descriptor = engine
                .create_index(CreateIndexRequest {
                    project_id: project,
                    kind,
                    target_type,
                    target_ids,
                    model_id: model,
                })
                .await?;

            println!("index create {}", descriptor.id);
            let finished = wait_for_build(&engine, &descriptor.id).await?;
            print_descriptor(&finished);
        }
        IndexCommands::Rebuild { id } => {
            let descriptor = engine.rebuild_index(&id).await?;

            println!("index rebuild {}", descriptor.id);
            let finished = wait_for_build(&engine, &descriptor.id).await?;
            print_descriptor(&finished);
        }
        IndexCommands::List { project } => {
            let descriptors = engine.list_indexes(&project).await?;
            if descriptors.is_empty() {
                println!("No indexes.");
            }
            for descriptor in descriptors {
                print_descriptor(&descriptor);
            }
        }
        IndexCommands::Status { id } => match engine.get_index_status(&id).await? {
            Some(descriptor) => print_descriptor(&descriptor),
            None => bail!("Index not found: {}", id),
        },
    }

    Ok(())
}

/// Poll until the descriptor leaves `pending`/`building`. Builds run in
/// this process, so exiting early would abandon them.
async fn wait_for_build(engine: &Engine, id: &str) -> Result<IndexDescriptor> {
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;

        let descriptor = engine
            .get_index_status(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Index disappeared during build: {}", id))?;

        match descriptor.state {
            IndexState::Ready | IndexState::Error => return Ok(descriptor),
            IndexState::Pending | IndexState::Building => continue,
        }
    }
}

fn print_descriptor(descriptor: &IndexDescriptor) {
    println!(
        "{} [{}] {} / {}",
        descriptor.id,
        descriptor.state.as_str(),
        descriptor.kind.as_str(),
        descriptor.target_type.as_str()
    );
    if let Some(model) = &descriptor.model_id {
        println!("    model: {}", model);
    }
    println!(
        "    vectors: {}  progress: {:.0}%",
        descriptor.vector_count, descriptor.build_progress
    );
    if let Some(error) = &descriptor.error {
        println!("    error: {}", error);
    }
    if let Some(path) = &descriptor.storage_path {
        println!("    storage: {}", path);
    }
}

async fn run_search(
    config: &Config,
    text: &str,
    project: &str,
    hint: &str,
    strategy: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    if text.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let engine = Engine::new(config.clone(), pool);

    match strategy {
        Some(name) => {
            let strategy = Strategy::parse(name)
                .ok_or_else(|| anyhow::anyhow!(
                    "Unknown strategy: {}. Use exact, semantic, keyword, or fuzzy.",
                    name
                ))?;

            let mut candidates = engine.search_by_strategy(project, text, strategy).await?;
            if let Some(limit) = limit {
                candidates.truncate(limit);
            }

            if candidates.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (i, candidate) in candidates.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} ({})",
                    i + 1,
                    candidate.raw_score,
                    candidate.element.label(),
                    candidate.element.identity()
                );
            }
        }
        None => {
            let hint = EntityHint::parse(hint);
            let mut results = engine.search_entities(project, text, hint).await?;
            if let Some(limit) = limit {
                results.truncate(limit);
            }

            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for result in &results {
                let strategies: Vec<&str> =
                    result.strategies.iter().map(|s| s.as_str()).collect();
                println!(
                    "{}. [{:.3}] {} ({})",
                    result.rank,
                    result.confidence,
                    result.element.label(),
                    result.identity
                );
                println!("    via: {}", strategies.join(", "));
            }
        }
    }

    Ok(())
}

fn run_models(config: &Config) -> Result<()> {
    let models = available_models(&config.encoder.provider);

    println!("provider: {}", config.encoder.provider);
    if models.is_empty() {
        println!("  no models (provider disabled or unknown)");
        return Ok(());
    }

    for (name, dims) in models {
        println!("  {} ({} dims)", name, dims);
    }

    Ok(())
}
