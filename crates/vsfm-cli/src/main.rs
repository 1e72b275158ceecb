mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use uuid::Uuid;
use vsfm_core::{Candidate, FileType, Scope};
use vsfm_sync::{
    InMemoryManifestStore, ManifestStore, PassContext, PgManifestStore, SyncConfig, SyncPipeline,
};

#[derive(Debug, Parser)]
#[command(name = "vsfm-cli")]
#[command(about = "Visa statistics file manifest")]
struct Cli {
    /// Manifest backend. `memory` is a dry run that forgets everything on exit.
    #[arg(long, value_enum, default_value_t = StoreKind::Postgres, global = true)]
    store: StoreKind,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Enumerate every enabled source and reconcile it against the manifest.
    Sync,
    /// Apply the file_manifest schema.
    Migrate,
    /// Serve the read-only reporting UI and JSON API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run sync on VSFM_SYNC_CRON until interrupted.
    Schedule,
    /// Print a manifest view as JSON.
    Report {
        #[arg(value_enum)]
        view: ReportView,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Adopt a file already on disk into the manifest without downloading it.
    Register {
        #[arg(long)]
        source: String,
        #[arg(long)]
        file_type: FileType,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        period: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportView {
    Summary,
    Missing,
    Recent,
    Status,
}

async fn open_store(kind: StoreKind, config: &SyncConfig) -> Result<Arc<dyn ManifestStore>> {
    match kind {
        StoreKind::Memory => {
            warn!("using the in-memory manifest; nothing will be persisted");
            Ok(Arc::new(InMemoryManifestStore::new()))
        }
        StoreKind::Postgres => {
            let store = PgManifestStore::connect(&config.database_url, 8)
                .await
                .context("connecting to the manifest database")?;
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging(logging::LogFormat::from_env())?;
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let store = open_store(cli.store, &config).await?;
            let summary = SyncPipeline::new(config, store)?.run_once().await?;
            println!(
                "sync complete: run_id={} scopes={} candidates={} missing={} reports={}",
                summary.run_id,
                summary.scopes,
                summary.candidates,
                summary.marked_missing,
                summary.reports_dir
            );
        }
        Commands::Migrate => {
            if cli.store == StoreKind::Memory {
                anyhow::bail!("migrate needs --store postgres");
            }
            let store = PgManifestStore::connect(&config.database_url, 1)
                .await
                .context("connecting to the manifest database")?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve { port } => {
            let store = open_store(cli.store, &config).await?;
            let state = vsfm_web::AppState::new(store, config.workspace_root.clone());
            vsfm_web::serve(state, port.unwrap_or_else(vsfm_web::port_from_env)).await?;
        }
        Commands::Schedule => {
            let store = open_store(cli.store, &config).await?;
            let pipeline = Arc::new(SyncPipeline::new(config, store)?);
            let Some(mut scheduler) = pipeline.maybe_build_scheduler().await? else {
                anyhow::bail!("scheduler disabled; set VSFM_SCHEDULER_ENABLED=1");
            };
            scheduler.start().await.context("starting scheduler")?;
            info!(cron = %pipeline.config().sync_cron, "scheduler running");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            scheduler.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Report { view, limit } => {
            let store = open_store(cli.store, &config).await?;
            let value = match view {
                ReportView::Summary => serde_json::to_value(store.active_files_summary().await?)?,
                ReportView::Missing => serde_json::to_value(store.missing_files(limit).await?)?,
                ReportView::Recent => serde_json::to_value(store.recent_downloads(limit).await?)?,
                ReportView::Status => serde_json::to_value(store.status_totals().await?)?,
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Register {
            source,
            file_type,
            program,
            period,
            url,
            path,
        } => {
            let store = open_store(cli.store, &config).await?;
            let pipeline = SyncPipeline::new(config, store)?;
            let scope = Scope::new(source, file_type, program);
            let candidate = Candidate::new(url, period, "")?;
            let ctx = PassContext::new(Uuid::new_v4(), Utc::now());
            let outcome = pipeline
                .engine()
                .register_existing(&ctx, &scope, &candidate, &path)
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}
