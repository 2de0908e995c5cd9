//! Stage worker loops.
//!
//! Every loop dequeues until its input channel closes or the run is
//! cancelled, finishing the in-flight item either way. Per-item failures are
//! caught here, recorded as skipped and never end the loop.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::error::StageError;
use super::report::{SkippedItem, Stage};
use super::ScopeRun;
use crate::extract::{RawItem, RawItemPage, RawLinkContext, RawVariant};
use crate::fetch::FetchSession;
use crate::links::{LinkRecord, normalize_variants};
use crate::resolve::{ResolvedEntity, resolve_item};
use crate::retry::{NoRecovery, RetryFailure};

/// Shared receiving end of a stage channel.
pub(crate) type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// An item whose entity chain is persisted and whose links are still raw.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedItem {
    pub url: String,
    pub entity: ResolvedEntity,
    pub links: RawLinkContext,
}

/// An item ready for its link batch.
#[derive(Debug, Clone)]
pub(crate) struct LinkBatch {
    pub url: String,
    pub entity: ResolvedEntity,
    pub links: Vec<LinkRecord>,
}

/// Receives the next item unless the run was cancelled first.
pub(crate) async fn next_item<T>(rx: &SharedReceiver<T>, cancel: &CancellationToken) -> Option<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        item = async { rx.lock().await.recv().await } => item,
    }
}

/// Sends downstream; false if cancelled or the receivers are gone.
pub(crate) async fn forward<T>(tx: &mpsc::Sender<T>, item: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

struct ItemInput<'a> {
    run: &'a ScopeRun,
    url: &'a str,
}

async fn page_once(session: &mut dyn FetchSession, input: &ItemInput<'_>) -> Result<RawItemPage, StageError> {
    let document = session.fetch_rendered_page(input.url).await?;
    Ok(input.run.extractor.item_page(&document)?)
}

struct EntityInput<'a> {
    run: &'a ScopeRun,
    item: &'a RawItem,
}

async fn entity_once(_: &mut NoRecovery, input: &EntityInput<'_>) -> Result<ResolvedEntity, StageError> {
    Ok(resolve_item(input.run.catalog.as_ref(), input.item).await?)
}

async fn variants_once(session: &mut dyn FetchSession, input: &ItemInput<'_>) -> Result<Vec<RawVariant>, StageError> {
    let document = session.fetch_rendered_page(input.url).await?;
    Ok(input.run.extractor.variants(&document)?)
}

struct BatchInput<'a> {
    run: &'a ScopeRun,
    batch: &'a LinkBatch,
}

async fn persist_once(_: &mut NoRecovery, input: &BatchInput<'_>) -> Result<u64, StageError> {
    let batch = input.batch;
    Ok(input
        .run
        .catalog
        .insert_links_batch(batch.entity.owner(), &batch.links)
        .await?)
}

/// Resolution stage: item page to persisted entity chain.
///
/// The page is fetched under the fetch policy. The catalog lookups then run
/// under the persistence policy, so store errors retry once without
/// touching the session.
pub(crate) async fn resolution_worker(
    id: usize,
    run: Arc<ScopeRun>,
    mut session: Box<dyn FetchSession>,
    rx: SharedReceiver<String>,
    tx: mpsc::Sender<ResolvedItem>,
) {
    let span = info_span!("resolution", scope = %run.scope, worker = id);
    async {
        debug!("worker started");
        let mut recovery = NoRecovery;
        while let Some(url) = next_item(&rx, &run.cancel).await {
            // Fetch failures may restart the session; catalog failures never do.
            let input = ItemInput { run: &run, url: &url };
            let page = match run
                .retry
                .run("item", session.as_mut(), &input, |session, input| {
                    Box::pin(page_once(session, input))
                })
                .await
            {
                Ok(attempted) => {
                    run.stats.record_effort(attempted.retries, attempted.restarts);
                    attempted.value
                }
                Err(failure) => {
                    run.skip(&url, Stage::Resolution, &failure).await;
                    continue;
                }
            };

            let input = EntityInput { run: &run, item: &page.item };
            let result = run
                .persistence_retry
                .run("resolve", &mut recovery, &input, |recovery, input| {
                    Box::pin(entity_once(recovery, input))
                })
                .await;

            match result {
                Ok(attempted) => {
                    run.stats.record_effort(attempted.retries, attempted.restarts);
                    let item = ResolvedItem {
                        url: url.clone(),
                        entity: attempted.value,
                        links: page.links,
                    };
                    debug!(url = %url, owner = %item.entity.owner(), "item resolved");
                    if !forward(&tx, item, &run.cancel).await {
                        break;
                    }
                }
                Err(failure) => run.skip(&url, Stage::Resolution, &failure).await,
            }
        }
        session.close().await;
        debug!("worker stopped");
    }
    .instrument(span)
    .await;
}

/// Link stage: raw variant contexts to normalized link records.
pub(crate) async fn link_worker(
    id: usize,
    run: Arc<ScopeRun>,
    mut session: Box<dyn FetchSession>,
    rx: SharedReceiver<ResolvedItem>,
    tx: mpsc::Sender<LinkBatch>,
) {
    let span = info_span!("links", scope = %run.scope, worker = id);
    async {
        debug!("worker started");
        while let Some(item) = next_item(&rx, &run.cancel).await {
            let variants = match &item.links {
                RawLinkContext::Inline(variants) => variants.clone(),
                RawLinkContext::Page(page_url) => {
                    let input = ItemInput { run: &run, url: page_url };
                    let result = run
                        .retry
                        .run("variants", session.as_mut(), &input, |session, input| {
                            Box::pin(variants_once(session, input))
                        })
                        .await;
                    match result {
                        Ok(attempted) => {
                            run.stats.record_effort(attempted.retries, attempted.restarts);
                            attempted.value
                        }
                        Err(failure) => {
                            run.skip(&item.url, Stage::Links, &failure).await;
                            continue;
                        }
                    }
                }
            };

            let links = normalize_variants(&variants);
            let batch = LinkBatch {
                url: item.url,
                entity: item.entity,
                links,
            };
            if !forward(&tx, batch, &run.cancel).await {
                break;
            }
        }
        session.close().await;
        debug!("worker stopped");
    }
    .instrument(span)
    .await;
}

/// Persistence stage: one transaction per owner, then the checkpoint.
pub(crate) async fn persistence_worker(id: usize, run: Arc<ScopeRun>, rx: SharedReceiver<LinkBatch>) {
    let span = info_span!("persistence", scope = %run.scope, worker = id);
    async {
        debug!("worker started");
        let mut recovery = NoRecovery;
        while let Some(batch) = next_item(&rx, &run.cancel).await {
            let owner = batch.entity.owner();
            if batch.links.is_empty() {
                warn!(url = %batch.url, owner = %owner, "no links found for item");
                run.stats.record_no_links();
            }

            let input = BatchInput { run: &run, batch: &batch };
            let result = run
                .persistence_retry
                .run("links", &mut recovery, &input, |recovery, input| {
                    Box::pin(persist_once(recovery, input))
                })
                .await;

            match result {
                Ok(attempted) => {
                    let inserted = attempted.value;
                    run.stats.record_effort(attempted.retries, attempted.restarts);
                    run.stats.record_completed(&batch.entity, inserted);
                    run.commit(&batch, inserted).await;
                    info!(url = %batch.url, owner = %owner, inserted, "item completed");
                }
                Err(failure) => run.skip(&batch.url, Stage::Persistence, &failure).await,
            }
        }
        debug!("worker stopped");
    }
    .instrument(span)
    .await;
}

impl ScopeRun {
    /// Records a committed item in the checkpoint, counters included.
    async fn commit(&self, batch: &LinkBatch, inserted: u64) {
        let entity = &batch.entity;
        self.checkpoint
            .update(&self.scope, |state| {
                state.complete(&batch.url);
                let counters = &mut state.counters;
                let media = entity.media();
                if media.is_new {
                    counters.new_items += 1;
                } else if media.updated {
                    counters.updated_items += 1;
                }
                if let ResolvedEntity::Episode { season, episode, .. } = entity {
                    counters.new_seasons += u64::from(season.is_new);
                    counters.new_episodes += u64::from(episode.is_new);
                }
                counters.new_links += inserted;
            })
            .await;
    }

    /// Logs, records and checkpoints a skipped item.
    pub(crate) async fn skip(&self, url: &str, stage: Stage, failure: &RetryFailure<StageError>) {
        let reason = failure.to_string();
        warn!(
            url = %url,
            stage = %stage,
            retries = failure.retries,
            restarts = failure.restarts,
            reason = %reason,
            "item skipped"
        );
        self.stats.record_effort(failure.retries, failure.restarts);
        self.checkpoint.mark_failed(&self.scope, url, &reason).await;
        self.stats
            .record_skipped(SkippedItem {
                url: url.to_string(),
                stage,
                reason,
            })
            .await;
    }
}
