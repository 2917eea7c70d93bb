//! # CRM Sync Entry Point
//!
//! Serves the API by default; the other subcommands run one maintenance job and exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crm_sync::config::{AppConfig, ConfigLoader};
use crm_sync::connectors::OpenAiEmbedder;
use crm_sync::db;
use crm_sync::embedding_executor::EmbeddingExecutor;
use crm_sync::repositories::{CalendarEventRepository, EmailRepository, EmbeddingQueueRepository};
use crm_sync::server::run_server;
use crm_sync::telemetry::init_tracing;
use sea_orm::DatabaseConnection;

#[derive(Debug, Parser)]
#[command(name = "crm-sync", version, about = "CRM sync service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Process one batch of the embedding queue
    ProcessEmbeddings {
        #[arg(long)]
        batch_size: Option<u64>,
    },
    /// Delete old finished queue items and requeue stale claims
    CleanupQueue {
        #[arg(long)]
        days_old: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    init_tracing(&config).context("initializing tracing")?;
    config.validate().context("validating configuration")?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::run_migrations(&db).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config, db).await,
        Command::Migrate => Ok(()),
        Command::ProcessEmbeddings { batch_size } => {
            let batch_size = batch_size.unwrap_or(config.embedding.batch_size);
            let executor = executor(&config, db);
            let result = executor.process_batch(batch_size).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::CleanupQueue { days_old } => {
            let days_old = days_old.unwrap_or(config.embedding.cleanup_days);
            let executor = executor(&config, db);
            let result = executor
                .cleanup(days_old, config.embedding.stale_minutes)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

fn executor(config: &AppConfig, db: DatabaseConnection) -> EmbeddingExecutor {
    let db = Arc::new(db);
    let p = &config.providers;
    EmbeddingExecutor::new(
        EmbeddingQueueRepository::new(db.clone()),
        EmailRepository::new(db.clone()),
        CalendarEventRepository::new(db),
        Arc::new(OpenAiEmbedder::new(
            p.openai_api_base.clone(),
            p.openai_api_key.clone(),
            p.embedding_model.clone(),
        )),
        Duration::from_millis(config.embedding.item_delay_ms),
    )
}
