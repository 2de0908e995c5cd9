//! CLI entry point for the catalog ingest tool.

use std::sync::Arc;

use anyhow::{Context, Result};
use ingest_core::{
    Catalog, CatalogRepository, CheckpointStore, Database, HttpSessionFactory, LookupCache, Pipeline,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod config;

use config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (args, sources) = cli::parse_with_sources();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let file_config = config::load(args.config.as_deref())?;
    let settings = Settings::resolve(&args, &sources, file_config.as_ref())?;
    let jobs = settings.jobs()?;

    info!(
        database = %settings.database.display(),
        scopes = jobs.len(),
        workers = settings.pipeline.workers,
        cache = settings.cache_enabled,
        "Catalog ingest starting"
    );

    let db = Database::new_with_options(&settings.database, &settings.db_options)
        .await
        .with_context(|| format!("Failed to open database '{}'", settings.database.display()))?;
    let cache = Arc::new(LookupCache::new(settings.cache_enabled));
    let catalog: Arc<dyn CatalogRepository> =
        Arc::new(Catalog::new(db.clone(), Arc::clone(&cache), settings.catalog));
    let checkpoint = Arc::new(CheckpointStore::new(&settings.checkpoint_dir));

    if args.fresh {
        for job in &jobs {
            checkpoint
                .clear(&job.name)
                .await
                .with_context(|| format!("Failed to clear checkpoint for scope '{}'", job.name))?;
        }
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight items");
                cancel.cancel();
            }
        });
    }

    let sessions = Arc::new(HttpSessionFactory::new(settings.session.clone()));
    let pipeline = Pipeline::new(catalog, checkpoint, sessions, settings.pipeline.clone(), cancel)?;
    let reports = pipeline.run_all(&jobs).await?;

    for report in &reports {
        println!("{report}");
    }
    debug!(hits = cache.hits(), misses = cache.misses(), "lookup cache");
    info!(
        scopes = reports.len(),
        skipped = reports.iter().map(|report| report.skipped.len()).sum::<usize>(),
        "Catalog ingest complete"
    );

    db.close().await;
    Ok(())
}
