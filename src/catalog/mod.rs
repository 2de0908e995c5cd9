//! Catalog persistence: entity resolution, dedup and link storage.
//!
//! The [`Catalog`] owns every write to the relational store. Each resolution
//! consults the [`LookupCache`] first and falls back to lookup-before-insert
//! against the store, so results do not depend on whether the cache is on.
//!
//! # Overview
//!
//! - [`Catalog::resolve_movie`] - reuse, enrich or insert a movie
//! - [`Catalog::resolve_series`] - reuse or insert a series ([`SeriesRefresh`])
//! - [`Catalog::resolve_season`] / [`Catalog::resolve_episode`] - parent-scoped children
//! - [`Catalog::insert_links_batch`] - one transaction per owner's link set
//!
//! Resolutions that read candidates before writing hold a per-natural-key
//! lock (title and kind, or season and episode number) for the whole cycle,
//! taken before any cache lock. Concurrent workers therefore reach the same
//! rows with the cache on or off.
//!
//! No transaction is held while the cache lock is taken: server and quality
//! ids are resolved before a link batch begins.

mod error;
mod links;
mod locks;
mod model;
mod repository;

pub use error::{CatalogError, DbErrorKind};
pub use model::{
    CatalogCounts, Episode, MediaFields, MediaItem, MediaKind, Owner, Resolution, StoredLink,
};
pub use repository::CatalogRepository;

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::cache::{CacheEntry, LookupCache, Namespace};
use crate::db::Database;

use locks::KeyLocks;

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Whether rediscovered series refresh their descriptive fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesRefresh {
    /// Series fields are set once at creation; lookup by (title, year).
    #[default]
    Never,
    /// Series follow the movie algorithm, including enrichment updates.
    Enrich,
}

/// How episodes are matched within a season.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeMatch {
    /// The episode number is authoritative; a later-seen title fills a
    /// missing one in place, a differing title keeps the stored row.
    #[default]
    Reconcile,
    /// Match on (number, title) when the title is known, else on number alone.
    Strict,
}

/// Resolution behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Series refresh policy.
    pub series_refresh: SeriesRefresh,
    /// Episode matching policy.
    pub episode_match: EpisodeMatch,
}

/// Cache value for media resolution; remembers the fingerprint an enrichment replaced.
struct MediaOutcome {
    resolution: Resolution,
    replaced_key: Option<String>,
}

impl From<Resolution> for MediaOutcome {
    fn from(resolution: Resolution) -> Self {
        Self {
            resolution,
            replaced_key: None,
        }
    }
}

impl CacheEntry for MediaOutcome {
    fn id(&self) -> i64 {
        self.resolution.id
    }

    fn from_cached(id: i64) -> Self {
        Resolution::reused(id).into()
    }
}

/// Catalog manager backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct Catalog {
    db: Database,
    cache: Arc<LookupCache>,
    options: CatalogOptions,
    locks: Arc<KeyLocks>,
}

impl Catalog {
    /// Creates a catalog over `db` using `cache` for natural-key lookups.
    #[must_use]
    pub fn new(db: Database, cache: Arc<LookupCache>, options: CatalogOptions) -> Self {
        Self {
            db,
            cache,
            options,
            locks: Arc::new(KeyLocks::default()),
        }
    }

    /// The lookup cache in use.
    #[must_use]
    pub fn cache(&self) -> &Arc<LookupCache> {
        &self.cache
    }

    /// Resolution options in use.
    #[must_use]
    pub fn options(&self) -> CatalogOptions {
        self.options
    }

    /// Resolves a movie.
    ///
    /// Rows sharing the title are candidates. A candidate whose year, rating
    /// and genre all equal the scraped ones is reused. Otherwise the first
    /// candidate is enriched with the scraped fields. Without candidates a new
    /// row is inserted.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if a query fails.
    #[instrument(skip(self, fields), fields(title = %fields.title))]
    pub async fn resolve_movie(&self, fields: &MediaFields) -> Result<Resolution> {
        self.resolve_enriching(MediaKind::Movie, fields).await
    }

    /// Resolves a series according to [`SeriesRefresh`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if a query fails.
    #[instrument(skip(self, fields), fields(title = %fields.title))]
    pub async fn resolve_series(&self, fields: &MediaFields) -> Result<Resolution> {
        match self.options.series_refresh {
            SeriesRefresh::Enrich => self.resolve_enriching(MediaKind::Series, fields).await,
            SeriesRefresh::Never => {
                let _guard = self.locks.acquire(media_lock_key(MediaKind::Series, &fields.title)).await;
                let key = format!("series|{}|{}", fields.title, option_key(fields.year));
                self.cache
                    .get_or_create(Namespace::Media, &key, || self.find_or_insert_series(fields))
                    .await
            }
        }
    }

    /// Resolves season `season_number` of a series.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if a query fails.
    #[instrument(skip(self))]
    pub async fn resolve_season(&self, series_id: i64, season_number: i64) -> Result<Resolution> {
        let key = format!("{series_id}|{season_number}");
        self.cache
            .get_or_create(Namespace::Seasons, &key, || {
                self.find_or_insert_season(series_id, season_number)
            })
            .await
    }

    /// Resolves episode `episode_number` of a season according to [`EpisodeMatch`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if a query fails.
    #[instrument(skip(self))]
    pub async fn resolve_episode(
        &self,
        season_id: i64,
        episode_number: i64,
        title: Option<&str>,
    ) -> Result<Resolution> {
        let key = match title {
            Some(title) => format!("{season_id}|{episode_number}|{title}"),
            None => format!("{season_id}|{episode_number}"),
        };
        let _guard = self
            .locks
            .acquire(format!("episode|{season_id}|{episode_number}"))
            .await;
        self.cache
            .get_or_create(Namespace::Episodes, &key, || async {
                match self.options.episode_match {
                    EpisodeMatch::Reconcile => {
                        self.reconcile_episode(season_id, episode_number, title).await
                    }
                    EpisodeMatch::Strict => {
                        self.match_episode_strict(season_id, episode_number, title).await
                    }
                }
            })
            .await
    }

    /// Returns the id of a server, creating it on first sighting.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if a query fails.
    pub async fn server_id(&self, name: &str) -> Result<i64> {
        self.cache
            .get_or_create(Namespace::Servers, name, || {
                self.find_or_insert_named("servers", "name", name)
            })
            .await
    }

    /// Returns the id of a quality label, creating it on first sighting.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if a query fails.
    pub async fn quality_id(&self, label: &str) -> Result<i64> {
        self.cache
            .get_or_create(Namespace::Qualities, label, || {
                self.find_or_insert_named("qualities", "label", label)
            })
            .await
    }

    /// Returns every media item with the given title and kind, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn media_by_title(&self, title: &str, kind: MediaKind) -> Result<Vec<MediaItem>> {
        let items = sqlx::query_as::<_, MediaItem>(
            r"SELECT * FROM media_items WHERE title = ? AND kind = ? ORDER BY id",
        )
        .bind(title)
        .bind(kind.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(items)
    }

    /// Returns the episodes of a season ordered by number.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn episodes_in_season(&self, season_id: i64) -> Result<Vec<Episode>> {
        let episodes = sqlx::query_as::<_, Episode>(
            r"SELECT id, season_id, episode_number, title
              FROM episodes WHERE season_id = ? ORDER BY episode_number, id",
        )
        .bind(season_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(episodes)
    }

    /// Returns row counts for the entity tables.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if a query fails.
    pub async fn counts(&self) -> Result<CatalogCounts> {
        let (media_items, seasons, episodes, links): (i64, i64, i64, i64) = sqlx::query_as(
            r"SELECT
                (SELECT COUNT(*) FROM media_items),
                (SELECT COUNT(*) FROM seasons),
                (SELECT COUNT(*) FROM episodes),
                (SELECT COUNT(*) FROM links)",
        )
        .fetch_one(self.db.pool())
        .await?;

        Ok(CatalogCounts {
            media_items,
            seasons,
            episodes,
            links,
        })
    }

    async fn resolve_enriching(&self, kind: MediaKind, fields: &MediaFields) -> Result<Resolution> {
        let _guard = self.locks.acquire(media_lock_key(kind, &fields.title)).await;
        let key = fingerprint_key(kind, fields);
        let outcome: MediaOutcome = self
            .cache
            .get_or_create(Namespace::Media, &key, || self.reconcile_media(kind, fields))
            .await?;

        if let Some(replaced) = outcome.replaced_key {
            self.cache.invalidate(Namespace::Media, &replaced).await;
        }
        Ok(outcome.resolution)
    }

    async fn reconcile_media(&self, kind: MediaKind, fields: &MediaFields) -> Result<MediaOutcome> {
        let candidates = self.media_by_title(&fields.title, kind).await?;

        let Some(first) = candidates.first() else {
            return Ok(self.insert_media(kind, fields).await?.into());
        };

        if let Some(exact) = candidates.iter().find(|item| fields.matches(item)) {
            debug!(id = exact.id, %kind, "exact match");
            return Ok(Resolution::reused(exact.id).into());
        }

        sqlx::query(
            r"UPDATE media_items
              SET year = ?, rating = ?, genre = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(fields.year)
        .bind(fields.rating)
        .bind(fields.genre.as_deref())
        .bind(first.id)
        .execute(self.db.pool())
        .await?;

        debug!(id = first.id, %kind, candidates = candidates.len(), "enriched existing row");
        Ok(MediaOutcome {
            resolution: Resolution::enriched(first.id),
            replaced_key: Some(fingerprint_key(kind, &first.fields())),
        })
    }

    async fn find_or_insert_series(&self, fields: &MediaFields) -> Result<Resolution> {
        let existing = sqlx::query_scalar::<_, i64>(
            r"SELECT id FROM media_items
              WHERE title = ? AND kind = 'series' AND year IS ?
              ORDER BY id LIMIT 1",
        )
        .bind(&fields.title)
        .bind(fields.year)
        .fetch_optional(self.db.pool())
        .await?;

        match existing {
            Some(id) => Ok(Resolution::reused(id)),
            None => self.insert_media(MediaKind::Series, fields).await,
        }
    }

    async fn insert_media(&self, kind: MediaKind, fields: &MediaFields) -> Result<Resolution> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r"INSERT INTO media_items (title, kind, year, rating, genre)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT DO NOTHING
              RETURNING id",
        )
        .bind(&fields.title)
        .bind(kind.as_str())
        .bind(fields.year)
        .bind(fields.rating)
        .bind(fields.genre.as_deref())
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(id) = inserted {
            debug!(id, %kind, "inserted media item");
            return Ok(Resolution::inserted(id));
        }

        // Lost a race against another writer with the identical tuple.
        sqlx::query_scalar::<_, i64>(
            r"SELECT id FROM media_items
              WHERE title = ? AND kind = ? AND year IS ? AND rating IS ? AND genre IS ?",
        )
        .bind(&fields.title)
        .bind(kind.as_str())
        .bind(fields.year)
        .bind(fields.rating)
        .bind(fields.genre.as_deref())
        .fetch_optional(self.db.pool())
        .await?
        .map(Resolution::reused)
        .ok_or_else(|| CatalogError::Vanished {
            entity: "media_items",
            key: fingerprint_key(kind, fields),
        })
    }

    async fn find_or_insert_season(&self, series_id: i64, season_number: i64) -> Result<Resolution> {
        let select = r"SELECT id FROM seasons WHERE media_item_id = ? AND season_number = ?";

        if let Some(id) = sqlx::query_scalar::<_, i64>(select)
            .bind(series_id)
            .bind(season_number)
            .fetch_optional(self.db.pool())
            .await?
        {
            return Ok(Resolution::reused(id));
        }

        let inserted = sqlx::query_scalar::<_, i64>(
            r"INSERT INTO seasons (media_item_id, season_number) VALUES (?, ?)
              ON CONFLICT DO NOTHING
              RETURNING id",
        )
        .bind(series_id)
        .bind(season_number)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(id) = inserted {
            debug!(id, series_id, season_number, "inserted season");
            return Ok(Resolution::inserted(id));
        }

        sqlx::query_scalar::<_, i64>(select)
            .bind(series_id)
            .bind(season_number)
            .fetch_optional(self.db.pool())
            .await?
            .map(Resolution::reused)
            .ok_or_else(|| CatalogError::Vanished {
                entity: "seasons",
                key: format!("{series_id}|{season_number}"),
            })
    }

    async fn reconcile_episode(
        &self,
        season_id: i64,
        episode_number: i64,
        title: Option<&str>,
    ) -> Result<Resolution> {
        // Prefer an exact title, then a row still missing its title.
        let existing = sqlx::query_as::<_, Episode>(
            r"SELECT id, season_id, episode_number, title
              FROM episodes
              WHERE season_id = ? AND episode_number = ?
              ORDER BY CASE WHEN title IS ? THEN 0 WHEN title IS NULL THEN 1 ELSE 2 END, id
              LIMIT 1",
        )
        .bind(season_id)
        .bind(episode_number)
        .bind(title)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(episode) = existing else {
            return self.insert_episode(season_id, episode_number, title).await;
        };

        match (episode.title.as_deref(), title) {
            (None, Some(title)) => {
                sqlx::query(
                    r"UPDATE episodes SET title = ?, updated_at = datetime('now') WHERE id = ?",
                )
                .bind(title)
                .bind(episode.id)
                .execute(self.db.pool())
                .await?;
                debug!(id = episode.id, title, "filled missing episode title");
                Ok(Resolution::enriched(episode.id))
            }
            _ => Ok(Resolution::reused(episode.id)),
        }
    }

    async fn match_episode_strict(
        &self,
        season_id: i64,
        episode_number: i64,
        title: Option<&str>,
    ) -> Result<Resolution> {
        let existing = match title {
            Some(title) => {
                sqlx::query_scalar::<_, i64>(
                    r"SELECT id FROM episodes
                      WHERE season_id = ? AND episode_number = ? AND title = ?",
                )
                .bind(season_id)
                .bind(episode_number)
                .bind(title)
                .fetch_optional(self.db.pool())
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    r"SELECT id FROM episodes
                      WHERE season_id = ? AND episode_number = ?
                      ORDER BY id LIMIT 1",
                )
                .bind(season_id)
                .bind(episode_number)
                .fetch_optional(self.db.pool())
                .await?
            }
        };

        match existing {
            Some(id) => Ok(Resolution::reused(id)),
            None => self.insert_episode(season_id, episode_number, title).await,
        }
    }

    async fn insert_episode(
        &self,
        season_id: i64,
        episode_number: i64,
        title: Option<&str>,
    ) -> Result<Resolution> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r"INSERT INTO episodes (season_id, episode_number, title) VALUES (?, ?, ?)
              ON CONFLICT DO NOTHING
              RETURNING id",
        )
        .bind(season_id)
        .bind(episode_number)
        .bind(title)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(id) = inserted {
            debug!(id, season_id, episode_number, "inserted episode");
            return Ok(Resolution::inserted(id));
        }

        sqlx::query_scalar::<_, i64>(
            r"SELECT id FROM episodes WHERE season_id = ? AND episode_number = ? AND title IS ?",
        )
        .bind(season_id)
        .bind(episode_number)
        .bind(title)
        .fetch_optional(self.db.pool())
        .await?
        .map(Resolution::reused)
        .ok_or_else(|| CatalogError::Vanished {
            entity: "episodes",
            key: format!("{season_id}|{episode_number}"),
        })
    }

    async fn find_or_insert_named(
        &self,
        table: &'static str,
        column: &'static str,
        value: &str,
    ) -> Result<i64> {
        let select = format!("SELECT id FROM {table} WHERE {column} = ?");
        if let Some(id) = sqlx::query_scalar::<_, i64>(&select)
            .bind(value)
            .fetch_optional(self.db.pool())
            .await?
        {
            return Ok(id);
        }

        let insert =
            format!("INSERT INTO {table} ({column}) VALUES (?) ON CONFLICT DO NOTHING RETURNING id");
        if let Some(id) = sqlx::query_scalar::<_, i64>(&insert)
            .bind(value)
            .fetch_optional(self.db.pool())
            .await?
        {
            debug!(table, value, id, "created lookup row");
            return Ok(id);
        }

        sqlx::query_scalar::<_, i64>(&select)
            .bind(value)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| CatalogError::Vanished {
                entity: table,
                key: value.to_string(),
            })
    }
}

/// Cache key over the full descriptive tuple.
fn fingerprint_key(kind: MediaKind, fields: &MediaFields) -> String {
    format!(
        "{kind}|{}|{}|{}|{}",
        fields.title,
        option_key(fields.year),
        option_key(fields.rating.map(f64::to_bits)),
        fields.genre.as_deref().unwrap_or("-")
    )
}

/// Lock key shared by every fingerprint of one title.
fn media_lock_key(kind: MediaKind, title: &str) -> String {
    format!("{kind}|{title}")
}

fn option_key<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
