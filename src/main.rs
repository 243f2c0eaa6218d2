//! hearth - Command-line front end for the local retrieval store and engine

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use hearth::config::{GenerationBackend, GenerationSettings, Settings};
use hearth::domain::split_into_chunks;
use hearth::embedding::ModelInfo;
use hearth::providers::ai::{
    LlmResult, OllamaLoader, OpenAiCompatibleEngine, OLLAMA_DEFAULT_URL,
    OPENAI_COMPATIBLE_DEFAULT_URL,
};
use hearth::services::{EngineState, RagContext};

#[derive(Debug, Parser)]
#[command(name = "hearth", version, about = "Local retrieval and generation")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, env = "HEARTH_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split text files into chunks and add them to the index
    Index {
        files: Vec<PathBuf>,
        /// Maximum characters per chunk
        #[arg(long, default_value_t = 1000)]
        chunk_size: usize,
    },
    /// Find the stored chunks nearest to a query
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Load the generation engine and stream an answer
    Ask { prompt: String },
    /// Show the store's contents and whether the generation runtime is reachable
    Status,
    /// List known embedding models and the runtime's generation models
    Models,
    /// Print the resolved settings
    Config,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let path = match cli.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let settings = Settings::load_or_default(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    match cli.command {
        Command::Index { files, chunk_size } => index(&settings, files, chunk_size).await,
        Command::Search { query, limit } => search(&settings, &query, limit).await,
        Command::Ask { prompt } => ask(&settings, &prompt).await,
        Command::Status => status(&settings).await,
        Command::Models => models(&settings).await,
        Command::Config => {
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn index(settings: &Settings, files: Vec<PathBuf>, chunk_size: usize) -> Result<()> {
    let mut ctx = RagContext::from_settings(settings)?;
    ctx.index.initialize().await?;

    let mut total = 0;
    for file in &files {
        let text = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        let chunks = split_into_chunks(&text, &file.display().to_string(), chunk_size);
        let stored = ctx
            .index
            .insert_all(&chunks)
            .await
            .with_context(|| format!("indexing {}", file.display()))?;
        total += stored;

        let skipped = chunks.len() - stored;
        if skipped > 0 {
            println!("{}: {stored} chunks ({skipped} skipped, no embedding)", file.display());
        } else {
            println!("{}: {stored} chunks", file.display());
        }
    }

    println!("indexed {total} chunks ({} stored)", ctx.index.count().await?);
    ctx.shutdown().await;
    Ok(())
}

async fn search(settings: &Settings, query: &str, limit: Option<usize>) -> Result<()> {
    let mut ctx = RagContext::from_settings(settings)?;
    ctx.index.initialize().await?;

    let results = ctx.index.search(query, limit).await?;
    if results.is_empty() {
        println!("no results");
    }
    for (rank, result) in results.iter().enumerate() {
        println!("{}. [{:.4}] {}", rank + 1, result.similarity_score, result.content);
    }

    ctx.shutdown().await;
    Ok(())
}

async fn ask(settings: &Settings, prompt: &str) -> Result<()> {
    let mut ctx = RagContext::from_settings(settings)?;

    let mut status = ctx.engine.subscribe();
    let reporter = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            eprintln!("[{:?}] {}", current.state, current.message);
            if matches!(current.state, EngineState::Ready | EngineState::Error) {
                break;
            }
        }
    });

    let init = ctx.engine.initialize().await;
    let _ = reporter.await;
    init?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let mut stdout = std::io::stdout();
    let result = ctx
        .engine
        .generate_stream_with_cancel(
            prompt,
            |chunk| {
                let _ = stdout.write_all(chunk.as_bytes());
                let _ = stdout.flush();
            },
            &cancel,
        )
        .await;
    println!();

    ctx.shutdown().await;
    result?;
    Ok(())
}

async fn models(settings: &Settings) -> Result<()> {
    println!("Embedding models:");
    for info in ModelInfo::all() {
        let marker = if info.model_type.hf_model_id() == settings.embedding.model_id {
            "*"
        } else {
            " "
        };
        println!(
            " {marker} {:<28} {:>4}d  {:>9}  {}",
            info.model_type.hf_model_id(),
            info.model_type.embedding_dim(),
            info.size_human(),
            info.description
        );
    }

    let generation = &settings.generation;
    println!("\nGeneration models ({:?}):", generation.backend);
    match runtime_models(generation).await {
        Ok(names) if names.is_empty() => println!("   (none)"),
        Ok(names) => {
            for name in names {
                let marker = if name == generation.model { "*" } else { " " };
                println!(" {marker} {name}");
            }
        }
        Err(e) => println!("   runtime unreachable: {e}"),
    }

    Ok(())
}

async fn runtime_models(generation: &GenerationSettings) -> LlmResult<Vec<String>> {
    match generation.backend {
        GenerationBackend::Ollama => {
            OllamaLoader::with_url(generation.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL))
                .list_models()
                .await
        }
        GenerationBackend::OpenaiCompatible => {
            OpenAiCompatibleEngine::new(
                generation
                    .base_url
                    .as_deref()
                    .unwrap_or(OPENAI_COMPATIBLE_DEFAULT_URL),
                generation.api_key.clone(),
                generation.model.clone(),
            )
            .list_models()
            .await
        }
    }
}

async fn status(settings: &Settings) -> Result<()> {
    let ctx = RagContext::from_settings(settings)?;

    let store = ctx.index.summary().await?;
    println!("Store:     {}", store.location);
    if store.exists {
        let dimension = store
            .dimension
            .map_or_else(|| "unknown".to_string(), |d| d.to_string());
        println!("Table:     {} ({} rows, {dimension}d)", store.table, store.rows);
    } else {
        println!("Table:     {} (not created yet)", store.table);
    }
    println!(
        "Embedding: {} ({:?}, {}d configured)",
        settings.embedding.model_id,
        settings.embedding.backend,
        ctx.index.dimension()
    );

    let generation = &settings.generation;
    let engine = ctx.engine.status();
    println!("Engine:    {} via {:?} [{:?}]", generation.model, generation.backend, engine.state);
    match runtime_models(generation).await {
        Ok(names) if names.iter().any(|n| n == &generation.model) => {
            println!("Runtime:   reachable, model available")
        }
        Ok(_) => println!("Runtime:   reachable, model not pulled yet"),
        Err(e) => println!("Runtime:   unreachable: {e}"),
    }

    Ok(())
}
