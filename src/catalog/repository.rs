//! Repository seam for catalog persistence operations.
//!
//! The pipeline depends on this trait rather than on [`Catalog`] so stage
//! behavior can be exercised against failing or instrumented stores.

use async_trait::async_trait;

use super::{Catalog, MediaFields, Owner, Resolution, Result};
use crate::links::LinkRecord;

/// Data-access contract for entity resolution and link persistence.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Resolves a movie to its persisted id.
    async fn resolve_movie(&self, fields: &MediaFields) -> Result<Resolution>;

    /// Resolves a series to its persisted id.
    async fn resolve_series(&self, fields: &MediaFields) -> Result<Resolution>;

    /// Resolves a season of a series.
    async fn resolve_season(&self, series_id: i64, season_number: i64) -> Result<Resolution>;

    /// Resolves an episode of a season.
    async fn resolve_episode(
        &self,
        season_id: i64,
        episode_number: i64,
        title: Option<&str>,
    ) -> Result<Resolution>;

    /// Inserts an owner's links in one transaction; returns rows inserted.
    async fn insert_links_batch(&self, owner: Owner, links: &[LinkRecord]) -> Result<u64>;
}

#[async_trait]
impl CatalogRepository for Catalog {
    async fn resolve_movie(&self, fields: &MediaFields) -> Result<Resolution> {
        Catalog::resolve_movie(self, fields).await
    }

    async fn resolve_series(&self, fields: &MediaFields) -> Result<Resolution> {
        Catalog::resolve_series(self, fields).await
    }

    async fn resolve_season(&self, series_id: i64, season_number: i64) -> Result<Resolution> {
        Catalog::resolve_season(self, series_id, season_number).await
    }

    async fn resolve_episode(
        &self,
        season_id: i64,
        episode_number: i64,
        title: Option<&str>,
    ) -> Result<Resolution> {
        Catalog::resolve_episode(self, season_id, episode_number, title).await
    }

    async fn insert_links_batch(&self, owner: Owner, links: &[LinkRecord]) -> Result<u64> {
        Catalog::insert_links_batch(self, owner, links).await
    }
}
