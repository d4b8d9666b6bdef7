//! # corpusd CLI
//!
//! The `corpusd` binary drives the ingestion queue and the retrieval
//! surface from one executable.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpusd init` | Create the SQLite database and run schema migrations |
//! | `corpusd enqueue <file>` | Queue a document for ingestion |
//! | `corpusd worker --ordinal N` | Run one worker of the configured pool |
//! | `corpusd retrieve "<query>"` | Hybrid search over indexed documents |
//! | `corpusd jobs` | Show recent jobs and their status |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! corpusd init --config ./corpusd.toml
//!
//! # Queue a document into the "docs" knowledge base
//! corpusd enqueue ./runbook.txt --kb docs --owner alice
//!
//! # Run worker 0 of the pool (worker.count in config sets the pool size)
//! corpusd worker --ordinal 0
//!
//! # Hybrid retrieval scoped to one knowledge base
//! corpusd retrieve "failover steps" --kb docs --top-k 10
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use corpusd::config::{self, Config};
use corpusd::embedding::{create_embedder, Embedder};
use corpusd::models::NewJob;
use corpusd::pipeline::StagePipeline;
use corpusd::queue::JobQueue;
use corpusd::retriever::Retriever;
use corpusd::stores::sqlite::{SqliteKeywordStore, SqliteVectorStore};
use corpusd::worker::WorkerLoop;
use corpusd::{db, migrate};

/// corpusd — a durable document-ingestion queue with hybrid retrieval.
#[derive(Parser)]
#[command(
    name = "corpusd",
    about = "A durable document-ingestion queue with hybrid retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./corpusd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent,
    /// running it multiple times is safe.
    Init,

    /// Queue a document for ingestion.
    ///
    /// Mints a document id, records the file in the job queue as `pending`,
    /// and returns immediately; a worker picks the job up on its next poll.
    Enqueue {
        /// Path to the document file.
        file: PathBuf,

        /// Knowledge base id the document belongs to.
        #[arg(long)]
        kb: String,

        /// Human-readable knowledge base name (defaults to the id).
        #[arg(long)]
        kb_name: Option<String>,

        /// Owner identifier recorded on the job.
        #[arg(long, default_value = "local")]
        owner: String,

        /// Display name for the document (defaults to the file name).
        #[arg(long)]
        name: Option<String>,

        /// Chunk size in characters (defaults to pipeline.default_chunk_size).
        #[arg(long)]
        chunk_size: Option<i64>,

        /// Optional source URL recorded on the job.
        #[arg(long)]
        source_url: Option<String>,
    },

    /// Run one worker of the pool.
    ///
    /// The worker polls its rotating shard, claims at most one job per
    /// tick, and processes it through the stage pipeline. Runs until
    /// interrupted (Ctrl-C).
    Worker {
        /// This worker's index in `[0, worker.count)`.
        #[arg(long)]
        ordinal: u32,
    },

    /// Search indexed documents.
    ///
    /// Fans out to the vector store and (in hybrid mode) the keyword
    /// store, and prints merged, provenance-tagged results as JSON.
    Retrieve {
        /// The query string.
        query: String,

        /// Knowledge base ids to search (repeatable; empty = all).
        #[arg(long)]
        kb: Vec<String>,

        /// Maximum results per store.
        #[arg(long)]
        top_k: Option<i64>,

        /// Skip the keyword store even if configured.
        #[arg(long)]
        vector_only: bool,
    },

    /// Show recent jobs and their status.
    Jobs {
        /// Maximum number of jobs to show.
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Enqueue {
            file,
            kb,
            kb_name,
            owner,
            name,
            chunk_size,
            source_url,
        } => {
            run_enqueue(&cfg, file, kb, kb_name, owner, name, chunk_size, source_url).await?;
        }
        Commands::Worker { ordinal } => {
            run_worker(&cfg, ordinal).await?;
        }
        Commands::Retrieve {
            query,
            kb,
            top_k,
            vector_only,
        } => {
            run_retrieve(&cfg, &query, &kb, top_k, vector_only).await?;
        }
        Commands::Jobs { limit } => {
            let pool = db::connect(&cfg).await?;
            let queue = JobQueue::new(pool);
            for job in queue.list(limit).await? {
                println!(
                    "{:>6}  {:<9}  {:<12}  len={:<8} chunks={:<5} {}  {}",
                    job.id,
                    job.status.as_str(),
                    job.kb_id,
                    job.content_length,
                    job.chunk_count,
                    job.name,
                    job.message
                );
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_enqueue(
    cfg: &Config,
    file: PathBuf,
    kb: String,
    kb_name: Option<String>,
    owner: String,
    name: Option<String>,
    chunk_size: Option<i64>,
    source_url: Option<String>,
) -> Result<()> {
    let metadata = std::fs::metadata(&file)
        .with_context(|| format!("Cannot read file: {}", file.display()))?;
    if !metadata.is_file() {
        bail!("Not a file: {}", file.display());
    }
    let location = file
        .canonicalize()
        .with_context(|| format!("Cannot resolve path: {}", file.display()))?;
    let name = name.unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string())
    });

    let pool = db::connect(cfg).await?;
    let queue = JobQueue::new(pool);
    queue
        .ensure_knowledge_base(&kb, kb_name.as_deref().unwrap_or(&kb))
        .await?;

    let document_id = uuid::Uuid::new_v4().to_string();
    let job_id = queue
        .enqueue(&NewJob {
            document_id: document_id.clone(),
            owner_id: owner,
            name: name.clone(),
            kb_id: kb,
            location: location.display().to_string(),
            size_bytes: metadata.len() as i64,
            source_url,
            chunk_size: chunk_size.unwrap_or(cfg.pipeline.default_chunk_size),
        })
        .await?;

    println!("Queued job {job_id} for {name} (document {document_id})");
    Ok(())
}

async fn run_worker(cfg: &Config, ordinal: u32) -> Result<()> {
    if ordinal >= cfg.worker.count {
        bail!(
            "worker ordinal {} out of range, worker.count is {}",
            ordinal,
            cfg.worker.count
        );
    }

    let pool = db::connect(cfg).await?;
    let queue = JobQueue::new(pool.clone());
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
    let vector_store = Arc::new(SqliteVectorStore::new(pool.clone(), embedder));
    let keyword_store = Arc::new(SqliteKeywordStore::new(pool));

    let pipeline = Arc::new(StagePipeline::new(
        Arc::new(corpusd::parser::PlainTextParser),
        vector_store,
        Some(keyword_store),
        queue.clone(),
        &cfg.pipeline,
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    WorkerLoop::new(ordinal, &cfg.worker, queue, pipeline)
        .run(shutdown)
        .await;
    Ok(())
}

async fn run_retrieve(
    cfg: &Config,
    query: &str,
    kb: &[String],
    top_k: Option<i64>,
    vector_only: bool,
) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
    let vector_store = Arc::new(SqliteVectorStore::new(pool.clone(), embedder));
    let keyword_store = Arc::new(SqliteKeywordStore::new(pool));

    let retriever = Retriever::new(vector_store, Some(keyword_store));
    let hybrid = cfg.retrieval.hybrid && !vector_only;
    let (results, timing) = retriever
        .retrieve(query, kb, top_k.unwrap_or(cfg.retrieval.top_k), hybrid)
        .await?;

    let output = serde_json::json!({
        "results": results,
        "timing": serde_json::from_str::<serde_json::Value>(&timing.to_json())?,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
