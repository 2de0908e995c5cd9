//! Run statistics and the end-of-run report.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::resolve::ResolvedEntity;

/// Pipeline stage an item was skipped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Listing page fetch or parse.
    Discovery,
    /// Item page fetch, field extraction or entity resolution.
    Resolution,
    /// Variant page fetch or parse.
    Links,
    /// Link batch commit.
    Persistence,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Discovery => "discovery",
            Self::Resolution => "resolution",
            Self::Links => "links",
            Self::Persistence => "persistence",
        };
        write!(f, "{label}")
    }
}

/// One item that was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    /// Item or listing URL.
    pub url: String,
    /// Stage that failed.
    pub stage: Stage,
    /// Last error and why retrying stopped.
    pub reason: String,
}

/// Live counters shared by every worker of one scope run.
#[derive(Debug, Default)]
pub struct RunStats {
    new_items: AtomicU64,
    updated_items: AtomicU64,
    reused_items: AtomicU64,
    new_seasons: AtomicU64,
    new_episodes: AtomicU64,
    new_links: AtomicU64,
    completed: AtomicU64,
    owners_without_links: AtomicU64,
    retries: AtomicU64,
    restarts: AtomicU64,
    skipped: Mutex<Vec<SkippedItem>>,
}

impl RunStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a committed item.
    pub fn record_completed(&self, entity: &ResolvedEntity, inserted_links: u64) {
        let media = entity.media();
        let counter = if media.is_new {
            &self.new_items
        } else if media.updated {
            &self.updated_items
        } else {
            &self.reused_items
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if let ResolvedEntity::Episode { season, episode, .. } = entity {
            if season.is_new {
                self.new_seasons.fetch_add(1, Ordering::SeqCst);
            }
            if episode.is_new {
                self.new_episodes.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.new_links.fetch_add(inserted_links, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Records an owner for which no variant survived normalization.
    pub fn record_no_links(&self) {
        self.owners_without_links.fetch_add(1, Ordering::SeqCst);
    }

    /// Records the retry effort one operation took.
    pub fn record_effort(&self, retries: u32, restarts: u32) {
        self.retries.fetch_add(u64::from(retries), Ordering::SeqCst);
        self.restarts.fetch_add(u64::from(restarts), Ordering::SeqCst);
    }

    /// Records a skipped item.
    pub async fn record_skipped(&self, item: SkippedItem) {
        self.skipped.lock().await.push(item);
    }

    /// Items committed so far.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Builds the report for a finished run.
    pub async fn report(&self, scope: &str) -> RunReport {
        let mut skipped = self.skipped.lock().await.clone();
        skipped.sort_by(|a, b| a.url.cmp(&b.url));
        RunReport {
            scope: scope.to_string(),
            new_items: self.new_items.load(Ordering::SeqCst),
            updated_items: self.updated_items.load(Ordering::SeqCst),
            reused_items: self.reused_items.load(Ordering::SeqCst),
            new_seasons: self.new_seasons.load(Ordering::SeqCst),
            new_episodes: self.new_episodes.load(Ordering::SeqCst),
            new_links: self.new_links.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            owners_without_links: self.owners_without_links.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            restarts: self.restarts.load(Ordering::SeqCst),
            skipped,
            ..RunReport::default()
        }
    }
}

/// Structured end-of-run summary for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Scope name.
    pub scope: String,
    /// Media items inserted.
    pub new_items: u64,
    /// Media items enriched in place.
    pub updated_items: u64,
    /// Media items reused unchanged.
    pub reused_items: u64,
    /// Seasons inserted.
    pub new_seasons: u64,
    /// Episodes inserted.
    pub new_episodes: u64,
    /// Links inserted.
    pub new_links: u64,
    /// URLs committed.
    pub completed: u64,
    /// Committed owners with zero links.
    pub owners_without_links: u64,
    /// Retries across all stages.
    pub retries: u64,
    /// Session restarts across all stages.
    pub restarts: u64,
    /// Pending URLs from earlier runs that were processed again.
    pub requeued: u64,
    /// URLs first discovered in this run.
    pub discovered: u64,
    /// Listing pages read.
    pub pages: u64,
    /// The whole listing was read.
    pub listing_finished: bool,
    /// The run was interrupted.
    pub cancelled: bool,
    /// Items given up on, sorted by URL.
    pub skipped: Vec<SkippedItem>,
}

impl RunReport {
    /// True when nothing was skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scope: {}", self.scope)?;
        writeln!(
            f,
            "  Listing: {} pages, {} new URLs, {} resumed{}",
            self.pages,
            self.discovered,
            self.requeued,
            if self.listing_finished { " (complete)" } else { "" }
        )?;
        writeln!(
            f,
            "  Items: {} new, {} updated, {} unchanged",
            self.new_items, self.updated_items, self.reused_items
        )?;
        writeln!(
            f,
            "  Seasons: {} new, episodes: {} new",
            self.new_seasons, self.new_episodes
        )?;
        writeln!(
            f,
            "  Links: {} new ({} items without links)",
            self.new_links, self.owners_without_links
        )?;
        writeln!(
            f,
            "  Completed: {} (retries {}, session restarts {})",
            self.completed, self.retries, self.restarts
        )?;
        if self.cancelled {
            writeln!(f, "  Interrupted: remaining URLs kept pending")?;
        }
        if self.skipped.is_empty() {
            write!(f, "  Skipped: none")
        } else {
            write!(f, "  Skipped: {}", self.skipped.len())?;
            for item in &self.skipped {
                write!(f, "\n    [{}] {}: {}", item.stage, item.url, item.reason)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Resolution;

    #[tokio::test]
    async fn test_stats_classify_media_outcomes() {
        let stats = RunStats::new();
        stats.record_completed(
            &ResolvedEntity::Movie {
                media: Resolution::inserted(1),
            },
            2,
        );
        stats.record_completed(
            &ResolvedEntity::Episode {
                series: Resolution::reused(2),
                season: Resolution::inserted(3),
                episode: Resolution::inserted(4),
            },
            0,
        );

        let report = stats.report("mixed").await;
        assert_eq!(report.new_items, 1);
        assert_eq!(report.reused_items, 1);
        assert_eq!(report.new_seasons, 1);
        assert_eq!(report.new_episodes, 1);
        assert_eq!(report.new_links, 2);
        assert_eq!(report.completed, 2);
    }

    #[tokio::test]
    async fn test_report_lists_skipped_items() {
        let stats = RunStats::new();
        stats
            .record_skipped(SkippedItem {
                url: "https://site.example/movie/broken".to_string(),
                stage: Stage::Resolution,
                reason: "missing field 'title'".to_string(),
            })
            .await;

        let report = stats.report("movies").await;
        let text = report.to_string();

        assert!(!report.is_clean());
        assert!(text.contains("Scope: movies"));
        assert!(text.contains("[resolution] https://site.example/movie/broken: missing field 'title'"));
    }

    #[test]
    fn test_clean_report_display() {
        let report = RunReport {
            scope: "movies".to_string(),
            listing_finished: true,
            ..RunReport::default()
        };
        let text = report.to_string();
        assert!(text.contains("(complete)"));
        assert!(text.contains("Skipped: none"));
    }
}
