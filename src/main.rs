use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_rag::embedding::{EmbeddingProvider, OpenAiEmbedder};
use beacon_rag::index::{self, BuildOptions};
use beacon_rag::observer::LogObserver;
use beacon_rag::room::{JobDispatcher, LocalRoom, RoomServer};
use beacon_rag::{AppContext, Config, QueryEngine};

/// Beacon RAG - Voice agent that answers from your documents
#[derive(Parser)]
#[command(name = "beacon-rag", version, about)]
struct Cli {
    /// Port the room server listens on (overrides `RAG_PORT`)
    #[arg(long)]
    port: Option<u16>,

    /// Corpus directory (overrides `RAG_DATA_DIR`)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Index storage directory (overrides `RAG_PERSIST_DIR`)
    #[arg(long)]
    persist_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve rooms and dispatch one agent per room (default)
    Serve,
    /// Build the index if missing and print its metadata
    Index,
    /// Answer one question from the index without voice
    Ask {
        /// Question to ask
        question: String,
    },
    /// Run the log observer the telemetry sidecar reports to
    Observe {
        /// Port to listen on
        #[arg(long, env = "RAG_OBSERVER_PORT", default_value = "3000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_rag=info",
        1 => "info,beacon_rag=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // The observer needs no credentials
    if let Some(Command::Observe { port }) = cli.command {
        return LogObserver::new().serve(port).await.map_err(Into::into);
    }

    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(dir) = cli.data_dir {
        config.index.data_dir = dir;
    }
    if let Some(dir) = cli.persist_dir {
        config.index.persist_dir = dir;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Index => build_index(config).await,
        Command::Ask { question } => ask(config, &question).await,
        Command::Observe { .. } => Ok(()),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let port = config.server.port;
    let ctx = Arc::new(AppContext::initialize(config).await?);
    tracing::info!(
        documents = ctx.index.meta().document_count,
        chunks = ctx.index.meta().chunk_count,
        origin = ?ctx.index.origin(),
        "index ready"
    );

    let dispatcher: JobDispatcher = Arc::new(move |room: LocalRoom| {
        let ctx = Arc::clone(&ctx);
        drop(tokio::spawn(async move {
            beacon_rag::session::run_job(ctx, room.connector()).await;
        }));
    });

    let server = RoomServer::new(port, dispatcher);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    Ok(())
}

async fn build_index(config: Config) -> anyhow::Result<()> {
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(OpenAiEmbedder::new(config.api_key.clone(), &config.embedding));
    let index = index::ensure_index_with(
        &config.index.data_dir,
        &config.index.persist_dir,
        embedder,
        &BuildOptions::from(&config.index),
    )
    .await?;

    let meta = index.meta();
    println!("Index:      {}", index.path().display());
    println!("Origin:     {:?}", index.origin());
    println!("Model:      {} ({} dims)", meta.embedding_model, meta.dimensions);
    println!("Documents:  {}", meta.document_count);
    println!("Chunks:     {}", meta.chunk_count);
    println!("Built at:   {}", meta.built_at);
    Ok(())
}

async fn ask(config: Config, question: &str) -> anyhow::Result<()> {
    let top_k = config.index.top_k;
    let ctx = AppContext::initialize(config).await?;
    let engine = QueryEngine::new(Arc::clone(&ctx.index), (ctx.models)()).with_top_k(top_k);
    let answer = engine.query(question).await?;
    println!("{answer}");
    Ok(())
}
