//! Staged ingestion pipeline for one or more crawl scopes.
//!
//! ```text
//! discovery ──urls──▶ resolution ×N ──entities──▶ links ×N ──batches──▶ persistence ×N
//! ```
//!
//! Stages are connected by bounded channels. A stage's channel closes once
//! every upstream worker has exited, which is how downstream workers learn
//! the run is done. Resolution and link workers each own one fetch session
//! for their whole lifetime. On cancellation every worker finishes its
//! in-flight item and exits; whatever is still queued is put back into the
//! checkpoint's pending set before the final flush.

mod error;
mod report;
mod workers;

pub use error::{PipelineError, StageError};
pub use report::{RunReport, RunStats, SkippedItem, Stage};

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::catalog::CatalogRepository;
use crate::checkpoint::CheckpointStore;
use crate::discovery::{DiscoveryOutcome, ListingDiscovery, ListingPlan};
use crate::extract::FieldExtractor;
use crate::fetch::{FetchError, FetchSession, SessionFactory};
use crate::retry::RetryPolicy;

use workers::{LinkBatch, ResolvedItem, SharedReceiver, link_worker, persistence_worker, resolution_worker};

/// Minimum workers per stage.
pub const MIN_WORKERS: usize = 1;

/// Maximum workers per stage.
pub const MAX_WORKERS: usize = 64;

/// Default workers per stage.
pub const DEFAULT_WORKERS: usize = 4;

/// Default capacity of each inter-stage channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Pool sizes and retry policies for a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workers per stage.
    pub workers: usize,
    /// Capacity of each inter-stage channel.
    pub queue_capacity: usize,
    /// Policy for fetch-backed stages.
    pub retry: RetryPolicy,
    /// Policy for link batch commits.
    pub persistence_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let persistence_retry = RetryPolicy::persistence(retry.retry_delay());
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry,
            persistence_retry,
        }
    }
}

impl PipelineConfig {
    /// Builds a config whose persistence policy shares the fetch retry delay.
    #[must_use]
    pub fn new(workers: usize, queue_capacity: usize, retry: RetryPolicy) -> Self {
        let persistence_retry = RetryPolicy::persistence(retry.retry_delay());
        Self {
            workers,
            queue_capacity,
            retry,
            persistence_retry,
        }
    }

    /// Uses exact delays in both policies.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.retry = self.retry.without_jitter();
        self.persistence_retry = self.persistence_retry.without_jitter();
        self
    }

    /// Checks pool and channel sizes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] naming the out-of-range value.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(PipelineError::InvalidWorkers { value: self.workers });
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidQueueCapacity);
        }
        Ok(())
    }
}

/// One crawl scope: where its listing lives and how its pages are read.
#[derive(Clone)]
pub struct ScopeJob {
    /// Scope name; also the checkpoint key.
    pub name: String,
    /// Listing addressing.
    pub plan: ListingPlan,
    /// Page interpretation for this scope.
    pub extractor: Arc<dyn FieldExtractor>,
}

impl ScopeJob {
    /// Creates a job.
    #[must_use]
    pub fn new(name: impl Into<String>, plan: ListingPlan, extractor: Arc<dyn FieldExtractor>) -> Self {
        Self {
            name: name.into(),
            plan,
            extractor,
        }
    }
}

/// State shared by every worker of one scope run.
pub(crate) struct ScopeRun {
    scope: String,
    catalog: Arc<dyn CatalogRepository>,
    checkpoint: Arc<CheckpointStore>,
    extractor: Arc<dyn FieldExtractor>,
    retry: RetryPolicy,
    persistence_retry: RetryPolicy,
    stats: RunStats,
    cancel: CancellationToken,
}

/// Runs scopes through discovery, resolution, link extraction and persistence.
pub struct Pipeline {
    catalog: Arc<dyn CatalogRepository>,
    checkpoint: Arc<CheckpointStore>,
    sessions: Arc<dyn SessionFactory>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Creates a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the config is out of range.
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        checkpoint: Arc<CheckpointStore>,
        sessions: Arc<dyn SessionFactory>,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            catalog,
            checkpoint,
            sessions,
            config,
            cancel,
        })
    }

    /// The token that stops the run.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs scopes one after another; stops early once cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first start-up failure. Reports of scopes already run are lost.
    pub async fn run_all(&self, jobs: &[ScopeJob]) -> Result<Vec<RunReport>, PipelineError> {
        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            if self.cancel.is_cancelled() {
                info!(scope = %job.name, "cancelled; scope not started");
                break;
            }
            reports.push(self.run_scope(job).await?);
        }
        Ok(reports)
    }

    /// Runs one scope to completion or cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the plan is invalid or a fetch session
    /// cannot be opened. Per-item failures are reported, never returned.
    #[instrument(skip_all, fields(scope = %job.name, workers = self.config.workers))]
    pub async fn run_scope(&self, job: &ScopeJob) -> Result<RunReport, PipelineError> {
        job.plan.validate().map_err(|message| PipelineError::InvalidPlan {
            scope: job.name.clone(),
            message,
        })?;

        let workers = self.config.workers;
        let mut sessions = self.open_sessions(1 + 2 * workers).await?;
        let link_sessions = sessions.split_off(1 + workers);
        let resolution_sessions = sessions.split_off(1);
        let Some(mut discovery_session) = sessions.pop() else {
            return Err(PipelineError::Session(FetchError::session_setup("no discovery session")));
        };
        info!(sessions = 1 + 2 * workers, "scope started");

        let run = Arc::new(ScopeRun {
            scope: job.name.clone(),
            catalog: Arc::clone(&self.catalog),
            checkpoint: Arc::clone(&self.checkpoint),
            extractor: Arc::clone(&job.extractor),
            retry: self.config.retry.clone(),
            persistence_retry: self.config.persistence_retry.clone(),
            stats: RunStats::new(),
            cancel: self.cancel.clone(),
        });

        let capacity = self.config.queue_capacity;
        let (url_tx, url_rx) = mpsc::channel::<String>(capacity);
        let (item_tx, item_rx) = mpsc::channel(capacity);
        let (batch_tx, batch_rx) = mpsc::channel(capacity);
        let url_rx: SharedReceiver<_> = Arc::new(Mutex::new(url_rx));
        let item_rx: SharedReceiver<_> = Arc::new(Mutex::new(item_rx));
        let batch_rx: SharedReceiver<_> = Arc::new(Mutex::new(batch_rx));

        let discovery = {
            let run = Arc::clone(&run);
            let plan = job.plan.clone();
            tokio::spawn(async move {
                let discovery = ListingDiscovery {
                    scope: &run.scope,
                    plan: &plan,
                    extractor: run.extractor.as_ref(),
                    checkpoint: &run.checkpoint,
                    policy: &run.retry,
                };
                let outcome = discovery.run(discovery_session.as_mut(), &url_tx, &run.cancel).await;
                discovery_session.close().await;
                outcome
            })
        };

        let mut resolution = JoinSet::new();
        for (id, session) in resolution_sessions.into_iter().enumerate() {
            resolution.spawn(resolution_worker(
                id,
                Arc::clone(&run),
                session,
                Arc::clone(&url_rx),
                item_tx.clone(),
            ));
        }
        drop(item_tx);

        let mut links = JoinSet::new();
        for (id, session) in link_sessions.into_iter().enumerate() {
            links.spawn(link_worker(
                id,
                Arc::clone(&run),
                session,
                Arc::clone(&item_rx),
                batch_tx.clone(),
            ));
        }
        drop(batch_tx);

        let mut persistence = JoinSet::new();
        for id in 0..workers {
            persistence.spawn(persistence_worker(id, Arc::clone(&run), Arc::clone(&batch_rx)));
        }

        let outcome = match discovery.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!(error = %join_error, "discovery task failed");
                DiscoveryOutcome::default()
            }
        };
        if let Some((url, reason)) = &outcome.failure {
            run.stats
                .record_skipped(SkippedItem {
                    url: url.clone(),
                    stage: Stage::Discovery,
                    reason: reason.clone(),
                })
                .await;
        }

        join_stage("resolution", &mut resolution).await;
        join_stage("links", &mut links).await;
        join_stage("persistence", &mut persistence).await;

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            let requeued = requeue_remaining(&run, &url_rx, &item_rx, &batch_rx).await;
            warn!(requeued, "run cancelled; queued items kept pending");
        }
        if let Err(error) = self.checkpoint.flush(&job.name).await {
            warn!(error = %error, "final checkpoint flush failed");
        }

        let mut report = run.stats.report(&job.name).await;
        report.requeued = outcome.requeued as u64;
        report.discovered = outcome.discovered as u64;
        report.pages = u64::from(outcome.pages);
        report.listing_finished = outcome.finished;
        report.cancelled = cancelled;

        info!(
            completed = report.completed,
            new_items = report.new_items,
            new_links = report.new_links,
            skipped = report.skipped.len(),
            cancelled,
            "scope finished"
        );
        Ok(report)
    }

    /// Opens `count` sessions, closing the ones already open if any fails.
    async fn open_sessions(&self, count: usize) -> Result<Vec<Box<dyn FetchSession>>, PipelineError> {
        let mut sessions = Vec::with_capacity(count);
        for _ in 0..count {
            match self.sessions.open().await {
                Ok(session) => sessions.push(session),
                Err(error) => {
                    for mut opened in sessions {
                        opened.close().await;
                    }
                    return Err(PipelineError::Session(error));
                }
            }
        }
        Ok(sessions)
    }
}

async fn join_stage(stage: &str, set: &mut JoinSet<()>) {
    while let Some(joined) = set.join_next().await {
        if let Err(join_error) = joined {
            error!(stage, error = %join_error, "worker task failed");
        }
    }
}

/// Puts every queued URL back into the pending set; returns how many.
async fn requeue_remaining(
    run: &ScopeRun,
    urls: &SharedReceiver<String>,
    items: &SharedReceiver<ResolvedItem>,
    batches: &SharedReceiver<LinkBatch>,
) -> usize {
    let mut remaining = Vec::new();
    while let Ok(url) = urls.lock().await.try_recv() {
        remaining.push(url);
    }
    while let Ok(item) = items.lock().await.try_recv() {
        remaining.push(item.url);
    }
    while let Ok(batch) = batches.lock().await.try_recv() {
        remaining.push(batch.url);
    }

    let count = remaining.len();
    if count > 0 {
        run.checkpoint
            .update(&run.scope, |state| {
                for url in &remaining {
                    state.add_pending(url);
                }
            })
            .await;
    }
    count
}
