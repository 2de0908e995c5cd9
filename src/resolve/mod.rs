//! Entity resolution: raw item fields to a persisted id chain.
//!
//! Movies resolve to one media item. Episodes resolve series, then season,
//! then episode, each step creating the row when absent, in that order.

mod parse;

pub use parse::{EpisodeLabel, parse_episode_label, parse_fields, parse_genre, parse_rating, parse_year};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::catalog::{CatalogError, CatalogRepository, Owner, Resolution};
use crate::extract::{ExtractError, RawItem};
use crate::retry::{Classify, FailureType};

/// Errors raised while resolving an item.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The raw fields could not be interpreted.
    #[error(transparent)]
    Field(#[from] ExtractError),

    /// The catalog rejected a lookup or insert.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl Classify for ResolveError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Field(error) => error.failure_type(),
            Self::Catalog(error) => error.failure_type(),
        }
    }
}

/// Persisted identity of a resolved item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEntity {
    /// A movie.
    Movie {
        /// The movie row.
        media: Resolution,
    },
    /// An episode with its parent chain.
    Episode {
        /// The series row.
        series: Resolution,
        /// The season row.
        season: Resolution,
        /// The episode row.
        episode: Resolution,
    },
}

impl ResolvedEntity {
    /// The entity links attach to.
    #[must_use]
    pub fn owner(&self) -> Owner {
        match self {
            Self::Movie { media } => Owner::MediaItem(media.id),
            Self::Episode { episode, .. } => Owner::Episode(episode.id),
        }
    }

    /// The media item (movie or series) at the top of the chain.
    #[must_use]
    pub fn media(&self) -> Resolution {
        match self {
            Self::Movie { media } => *media,
            Self::Episode { series, .. } => *series,
        }
    }
}

/// Resolves a raw item against the catalog.
///
/// # Errors
///
/// Returns [`ResolveError::Field`] for unparseable fields and
/// [`ResolveError::Catalog`] for store failures.
#[instrument(skip_all)]
pub async fn resolve_item(
    catalog: &dyn CatalogRepository,
    item: &RawItem,
) -> Result<ResolvedEntity, ResolveError> {
    match item {
        RawItem::Movie(raw) => {
            let fields = parse_fields(raw)?;
            let media = catalog.resolve_movie(&fields).await?;
            debug!(title = %fields.title, id = media.id, is_new = media.is_new, "movie resolved");
            Ok(ResolvedEntity::Movie { media })
        }
        RawItem::Episode { series, label } => {
            let fields = parse_fields(series)?;
            let label = parse_episode_label(label)?;

            let series = catalog.resolve_series(&fields).await?;
            let season = catalog.resolve_season(series.id, label.season).await?;
            let episode = catalog
                .resolve_episode(season.id, label.episode, label.title.as_deref())
                .await?;

            debug!(
                series = %fields.title,
                season = label.season,
                episode = label.episode,
                id = episode.id,
                is_new = episode.is_new,
                "episode resolved"
            );
            Ok(ResolvedEntity::Episode {
                series,
                season,
                episode,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::LookupCache;
    use crate::catalog::{Catalog, CatalogOptions};
    use crate::db::Database;
    use crate::extract::RawFields;

    async fn catalog() -> Catalog {
        let db = Database::new_in_memory().await.unwrap();
        Catalog::new(db, Arc::new(LookupCache::default()), CatalogOptions::default())
    }

    fn raw_movie() -> RawItem {
        RawItem::Movie(RawFields {
            title: "Example".to_string(),
            year: Some("2020".to_string()),
            rating: Some("7.5".to_string()),
            genre: Some("Drama".to_string()),
        })
    }

    #[tokio::test]
    async fn test_movie_new_then_reused() {
        let catalog = catalog().await;

        let first = resolve_item(&catalog, &raw_movie()).await.unwrap();
        let second = resolve_item(&catalog, &raw_movie()).await.unwrap();

        assert!(first.media().is_new);
        assert!(!second.media().is_new);
        assert_eq!(first.owner(), second.owner());
        assert_eq!(catalog.counts().await.unwrap().media_items, 1);
    }

    #[tokio::test]
    async fn test_episode_label_creates_season_then_episode() {
        let catalog = catalog().await;
        let item = RawItem::Episode {
            series: RawFields {
                title: "The Show".to_string(),
                ..RawFields::default()
            },
            label: "2x05 Night Falls".to_string(),
        };

        let resolved = resolve_item(&catalog, &item).await.unwrap();

        let ResolvedEntity::Episode { season, episode, .. } = resolved else {
            panic!("expected an episode");
        };
        assert!(season.is_new);
        assert!(episode.is_new);
        assert!(season.id > 0 && episode.id > 0);
        let episodes = catalog.episodes_in_season(season.id).await.unwrap();
        assert_eq!(episodes[0].episode_number, 5);
        assert_eq!(episodes[0].title.as_deref(), Some("Night Falls"));
        let counts = catalog.counts().await.unwrap();
        assert_eq!((counts.seasons, counts.episodes), (1, 1));
    }

    #[tokio::test]
    async fn test_unparseable_field_is_permanent() {
        let catalog = catalog().await;
        let item = RawItem::Movie(RawFields {
            title: "Example".to_string(),
            year: Some("someday".to_string()),
            ..RawFields::default()
        });

        let err = resolve_item(&catalog, &item).await.unwrap_err();
        assert_eq!(err.failure_type(), FailureType::Permanent);
        assert_eq!(catalog.counts().await.unwrap().media_items, 0);
    }
}
