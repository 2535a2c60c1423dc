//! Document queue server binary
//!
//! Run with: cargo run -p docqueue --bin docqueue-server -- --config docqueue.toml

use clap::Parser;
use docqueue::{
    config::DocQueueConfig, server::DocQueueServer, AnalysisRequest, DocumentAnalyzer,
    JobExecutor, TaskQueue,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docqueue-server", version, about = "Serialized PDF analysis server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config and DOCQUEUE_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port (overrides config and DOCQUEUE_PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docqueue=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = DocQueueConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Max concurrent tasks: {}", config.queue.max_concurrent_tasks);
    tracing::info!("  - Progress mailbox capacity: {}", config.queue.progress_capacity);
    tracing::info!("  - Task retention: {}s", config.queue.retention_secs);
    tracing::info!(
        "  - Extraction timeout: {}s",
        config.analysis.extraction_timeout_secs
    );

    let analyzer: Arc<dyn JobExecutor<Request = AnalysisRequest>> =
        Arc::new(DocumentAnalyzer::new(config.analysis.clone()));
    let queue = Arc::new(TaskQueue::new(analyzer, config.queue.clone()));
    queue.start();

    let server = DocQueueServer::new(config, queue);

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("\nEndpoints:");
    println!("  POST   /analyze          - Upload a PDF, stream progress");
    println!("  GET    /queue/status     - Queue counts");
    println!("  GET    /queue/task/:id   - Task status");
    println!("  DELETE /queue/task/:id   - Cancel a pending task");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
