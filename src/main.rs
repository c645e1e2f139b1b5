use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use tabular_etl_worker::config::Config;
use tabular_etl_worker::ingestion::TracingObserver;
use tabular_etl_worker::job::{Envelope, JobLifecycle, JobMessage, Router, Stage};
use tabular_etl_worker::logging::{init_logging, LogConfig};
use tabular_etl_worker::stages::{HttpFetcher, StageContext};
use tabular_etl_worker::store::{Broker, FsDocumentStore, S3BlobStore, SpoolBroker};

#[derive(Parser)]
#[command(name = "etl-worker", version, about = "Message-driven ETL stage worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume every stage queue until interrupted
    Run,
    /// Register a job and publish its message to the stage queue
    Submit {
        /// Stage name (ingest, load, clean, join) or queue name
        #[arg(long, env = "ETL_SUBMIT_STAGE")]
        stage: Stage,
        /// JSON file holding the message payload
        #[arg(long, value_name = "FILE")]
        payload: PathBuf,
    },
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, finishing current delivery"),
        Err(e) => {
            error!(error = %e, "cannot listen for interrupts");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let log_config = LogConfig::from_env()?;
    init_logging(&log_config)?;

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    info!(
        spool_dir = %config.broker.spool_dir.display(),
        jobs_dir = %config.document_store.dir.display(),
        blob_store = %config.blob_store.endpoint(),
        "configuration loaded"
    );

    let documents = Arc::new(
        FsDocumentStore::open(&config.document_store.dir)
            .await
            .context("Failed to open document store")?,
    );
    let broker = SpoolBroker::open(&config.broker.spool_dir, config.broker.prefetch)
        .await
        .context("Failed to open broker spool")?;
    let lifecycle = JobLifecycle::new(documents);

    match cli.command {
        Command::Run => {
            let blobs = Arc::new(S3BlobStore::new(&config.blob_store));
            let fetcher = Arc::new(
                HttpFetcher::new(config.worker.fetch_timeout()).context("Failed to build HTTP client")?,
            );
            let stages = StageContext::new(blobs, fetcher)
                .with_default_max_shrink(config.worker.default_max_shrink)
                .with_observer(Arc::new(TracingObserver));
            let router = Router::new(lifecycle, stages, config.worker.max_attempts);

            router
                .run(&broker, config.worker.poll_interval(), wait_for_ctrl_c())
                .await;
        }
        Command::Submit { stage, payload } => {
            let body = tokio::fs::read(&payload)
                .await
                .with_context(|| format!("Failed to read {}", payload.display()))?;
            let envelope = Envelope::parse(&body)?;
            JobMessage::from_value(stage, envelope.payload.clone())?;

            lifecycle.register(stage, &envelope.job_id).await?;
            broker.publish(stage.queue(), body).await?;
            info!(%stage, job_id = %envelope.job_id, queue = stage.queue(), "job submitted");
        }
    }

    Ok(())
}
