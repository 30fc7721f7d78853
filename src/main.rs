use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod council;
mod documents;
mod llm;
mod personality;
mod storage;
mod transport;

use config::Config;
use council::{CouncilEngine, CouncilEvent, TurnMode, TurnRequest};
use documents::DocumentLibrary;
use llm::OpenRouterGateway;
use storage::{ConversationStore, FileStore, MemoryStore};

#[derive(Parser)]
#[command(name = "quorum")]
#[command(author, version, about = "Quorum - multi-model deliberation service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Run one full council deliberation and print the synthesis
    Ask {
        /// The question to deliberate
        question: String,
    },

    /// Show the configured council
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "quorum=debug"
    } else {
        "quorum=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load()?;

    match cli.command {
        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let data_root = FileStore::default_root();
            let store: Arc<dyn ConversationStore> = Arc::new(FileStore::new(&data_root)?);
            let documents = Arc::new(DocumentLibrary::new(&data_root)?);
            let gateway = Arc::new(OpenRouterGateway::from_env(&config.gateway)?);

            let engine = CouncilEngine::new(
                gateway,
                store.clone(),
                documents.clone(),
                config.council.clone(),
                config.history.clone(),
            );

            transport::http::run_http_server(&host, port, engine, store, documents, config).await?;
        }
        Commands::Ask { question } => {
            let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
            let gateway = Arc::new(OpenRouterGateway::from_env(&config.gateway)?);
            let engine = CouncilEngine::new(
                gateway,
                store.clone(),
                Arc::new(documents::NoDocuments),
                config.council.clone(),
                config.history.clone(),
            );

            let conversation = store.create(None).await?;
            let mut events = engine
                .submit_turn_streaming(TurnRequest {
                    conversation_id: conversation.id,
                    content: question,
                    mode: Some(TurnMode::Council),
                    include_documents: false,
                })
                .await?;

            while let Some(event) = events.next().await {
                match event {
                    CouncilEvent::Stage1Start => tracing::info!("Collecting council answers"),
                    CouncilEvent::Stage2Start => tracing::info!("Collecting peer rankings"),
                    CouncilEvent::Stage2Complete { aggregate, .. } => {
                        for (i, standing) in aggregate.standings.iter().enumerate() {
                            tracing::info!(
                                "  {}. {} (score {})",
                                i + 1,
                                standing.model,
                                standing.score
                            );
                        }
                    }
                    CouncilEvent::Stage3Start => tracing::info!("Synthesizing final answer"),
                    CouncilEvent::Stage3Complete { result } => {
                        println!("{}", result.response);
                    }
                    CouncilEvent::Error { message } => {
                        anyhow::bail!("deliberation failed: {}", message);
                    }
                    _ => {}
                }
            }
        }
        Commands::Models => {
            println!("Council models:");
            for model in &config.council.models {
                println!("  {}", model);
            }
            println!("Chairman: {}", config.council.chairman);
            println!("Title model: {}", config.council.title_model);
        }
    }

    Ok(())
}
