//! Listing discovery: walks a scope's listing pages and emits item URLs.
//!
//! URLs left pending by an earlier run are emitted first. New pages are then
//! read from the checkpoint cursor onward. Each page's URLs are recorded as
//! pending together with the cursor before they are sent downstream, so a
//! crash never loses a discovered URL. Completed URLs are filtered out.
//!
//! A page that yields no item links ends its letter (or the listing). Once
//! the whole listing has been read the cursor is reset, so the next run
//! starts again at the first page and only picks up new items.

mod plan;

pub use plan::{DEFAULT_START_PAGE, ListingPlan};

use std::collections::HashSet;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::{CheckpointStore, ListingCursor};
use crate::extract::FieldExtractor;
use crate::fetch::FetchSession;
use crate::retry::RetryPolicy;

/// Result of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Pending URLs from earlier runs that were emitted again.
    pub requeued: usize,
    /// URLs first seen in this run.
    pub discovered: usize,
    /// Listing pages read.
    pub pages: u32,
    /// The whole listing was read.
    pub finished: bool,
    /// Listing URL and reason, if a page could not be fetched.
    pub failure: Option<(String, String)>,
}

/// Borrowed inputs for one scope's discovery.
pub struct ListingDiscovery<'a> {
    /// Scope name (checkpoint key).
    pub scope: &'a str,
    /// Listing addressing.
    pub plan: &'a ListingPlan,
    /// Listing link extraction.
    pub extractor: &'a dyn FieldExtractor,
    /// Progress store.
    pub checkpoint: &'a CheckpointStore,
    /// Retry policy for listing fetches.
    pub policy: &'a RetryPolicy,
}

enum Emit {
    Sent,
    Stopped,
}

impl ListingDiscovery<'_> {
    /// Emits pending and newly discovered URLs on `tx` until the listing ends,
    /// `cancel` fires or every receiver is gone.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn run(
        &self,
        session: &mut dyn FetchSession,
        tx: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();
        let state = self.checkpoint.load(self.scope).await;
        let mut emitted: HashSet<String> = HashSet::new();

        for url in &state.pending_urls {
            if state.is_completed(url) || !emitted.insert(url.clone()) {
                continue;
            }
            if let Emit::Stopped = emit(tx, url.clone(), cancel).await {
                return outcome;
            }
            outcome.requeued += 1;
        }
        if outcome.requeued > 0 {
            info!(count = outcome.requeued, "re-emitted pending URLs");
        }

        let cursor = state.cursor;
        for letter_index in cursor.letter_index..self.plan.letter_count() {
            let mut page = if letter_index == cursor.letter_index && cursor.page >= self.plan.start_page {
                cursor.page.saturating_add(1)
            } else {
                self.plan.start_page
            };

            loop {
                if cancel.is_cancelled() {
                    return outcome;
                }
                if self.plan.last_page().is_some_and(|last| page > last) {
                    break;
                }

                let url = self.plan.page_url(letter_index, page);
                let links = match self.fetch_links(session, &url).await {
                    Ok(links) => links,
                    Err(reason) => {
                        warn!(url = %url, reason = %reason, "listing page failed; stopping discovery");
                        outcome.failure = Some((url, reason));
                        return outcome;
                    }
                };
                outcome.pages += 1;

                if links.is_empty() {
                    debug!(url = %url, letter_index, page, "empty listing page");
                    break;
                }

                let fresh = self
                    .checkpoint
                    .update(self.scope, |state| {
                        let fresh: Vec<String> = links
                            .iter()
                            .filter(|link| !state.is_completed(link))
                            .cloned()
                            .collect();
                        for link in &fresh {
                            state.add_pending(link);
                        }
                        state.cursor = ListingCursor::new(letter_index, page);
                        fresh
                    })
                    .await;

                debug!(url = %url, found = links.len(), fresh = fresh.len(), "listing page read");
                for link in fresh {
                    if !emitted.insert(link.clone()) {
                        continue;
                    }
                    if let Emit::Stopped = emit(tx, link, cancel).await {
                        return outcome;
                    }
                    outcome.discovered += 1;
                }

                page = page.saturating_add(1);
            }
        }

        self.checkpoint
            .update(self.scope, |state| state.cursor = ListingCursor::default())
            .await;
        outcome.finished = true;
        info!(
            pages = outcome.pages,
            discovered = outcome.discovered,
            requeued = outcome.requeued,
            "listing exhausted"
        );
        outcome
    }

    async fn fetch_links(&self, session: &mut dyn FetchSession, url: &str) -> Result<Vec<String>, String> {
        let document = self
            .policy
            .run("listing", session, url, |session, url| {
                Box::pin(async move { session.fetch_listing_page(url).await })
            })
            .await
            .map_err(|failure| failure.to_string())?
            .value;

        self.extractor
            .listing_links(&document)
            .map_err(|error| error.to_string())
    }
}

async fn emit(tx: &mpsc::Sender<String>, url: String, cancel: &CancellationToken) -> Emit {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Emit::Stopped,
        sent = tx.send(url) => {
            if sent.is_ok() { Emit::Sent } else { Emit::Stopped }
        }
    }
}
