//! # Knowledge Harness CLI (`kh`)
//!
//! ## Usage
//!
//! ```bash
//! kh --config ./config/kh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kh init` | Create the SQLite database and run schema migrations |
//! | `kh serve` | Start the HTTP API |
//! | `kh ingest <url> --type article` | Fetch, chunk, embed, and store a URL |
//! | `kh tutorial <content_id> --type article` | Generate a tutorial from stored content |
//! | `kh get-tutorial <id>` | Print a stored tutorial |
//! | `kh search "<query>" --collection article` | Semantic search |
//! | `kh similar <id> --collection article` | Records similar to a stored one |
//! | `kh collections` | Record counts per collection |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use knowledge_harness::config::{self, Config};
use knowledge_harness::logging;
use knowledge_harness::migrate;
use knowledge_harness::server;
use knowledge_harness::service::KnowledgeService;
use knowledge_harness::tasks::{Task, TaskRegistry};
use knowledge_harness_core::models::ContentType;

/// Knowledge Harness: turn articles and videos into searchable chunks and
/// structured tutorials.
#[derive(Parser)]
#[command(name = "kh", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Process a URL into the collection for its content type.
    ///
    /// The job runs in-process; the command returns once it has finished.
    Ingest {
        url: String,

        /// `article` or `youtube`.
        #[arg(long = "type", default_value = "article")]
        content_type: String,

        /// Print the processed content instead of just the task outcome.
        #[arg(long)]
        wait: bool,
    },

    /// Generate a tutorial for stored content and print it.
    Tutorial {
        content_id: String,

        #[arg(long = "type", default_value = "article")]
        content_type: String,
    },

    /// Print a stored tutorial.
    GetTutorial { id: String },

    /// Semantic search. One collection runs a single search; several run a
    /// multi-collection search.
    Search {
        query: String,

        #[arg(long = "collection", default_value = "article")]
        collections: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Records most similar to a stored record or content item.
    Similar {
        id: String,

        #[arg(long, default_value = "article")]
        collection: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Record counts per collection.
    Collections,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(cfg.logging.format)?;

    match cli.command {
        Commands::Init => {
            migrate::migrate_path(&cfg.db.path).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest {
            url,
            content_type,
            wait,
        } => {
            let service = start(&cfg).await?;
            let content_type = parse_type(&content_type)?;
            let receipt = service.submit_content(&url, content_type)?;
            println!("Task {} submitted", receipt.task_id);

            let task = wait_for(service.registry(), &receipt.task_id).await?;
            let result = if wait && task.error.is_none() {
                print_json(&service.get_processed_content(&task.id)?)
            } else {
                print_json(&service.get_task_status(&task.id)?)
            };
            service.shutdown().await;
            result?;
        }
        Commands::Tutorial {
            content_id,
            content_type,
        } => {
            let service = start(&cfg).await?;
            let content_type = parse_type(&content_type)?;
            let receipt = service.generate_tutorial(&content_id, content_type)?;
            wait_for(service.registry(), &receipt.task_id).await?;
            let status = service.get_tutorial_status(&receipt.task_id)?;
            service.shutdown().await;
            match (status.tutorial, status.error) {
                (Some(tutorial), _) => print_json(&tutorial)?,
                (None, Some(error)) => bail!("tutorial generation failed: {}", error),
                (None, None) => bail!("tutorial task ended without a result"),
            }
        }
        Commands::GetTutorial { id } => {
            let service = start(&cfg).await?;
            let tutorial = service.get_tutorial_by_id(&id).await?;
            print_json(&tutorial)?;
        }
        Commands::Search {
            query,
            collections,
            limit,
        } => {
            let service = start(&cfg).await?;
            if let [collection] = collections.as_slice() {
                print_json(&service.search_single(&query, collection, limit).await?)?;
            } else {
                print_json(&service.search_multi(&query, &collections, limit).await?)?;
            }
        }
        Commands::Similar {
            id,
            collection,
            limit,
        } => {
            let service = start(&cfg).await?;
            print_json(&service.find_similar(&id, &collection, limit).await?)?;
        }
        Commands::Collections => {
            let service = start(&cfg).await?;
            let collections = service.collections().await?;
            if collections.is_empty() {
                println!("No collections yet.");
            }
            for c in collections {
                let dims = c.dims.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
                println!("{:<20} {:>8} records  dims {}", c.name, c.records, dims);
            }
        }
    }

    Ok(())
}

async fn start(cfg: &Config) -> anyhow::Result<KnowledgeService> {
    KnowledgeService::from_config(cfg)
        .await
        .context("Failed to start knowledge service")
}

fn parse_type(raw: &str) -> anyhow::Result<ContentType> {
    Ok(raw.parse::<ContentType>()?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn wait_for(registry: &TaskRegistry, task_id: &str) -> anyhow::Result<Task> {
    loop {
        let task = registry.get(task_id)?;
        if task.status.is_terminal() {
            return Ok(task);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
