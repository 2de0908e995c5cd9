//! Catalog entity types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::cache::CacheEntry;

/// Kind of media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// A standalone film.
    Movie,
    /// A series owning seasons and episodes.
    Series,
}

impl MediaKind {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(Self::Movie),
            "series" => Ok(Self::Series),
            _ => Err(format!("invalid media kind: {s}")),
        }
    }
}

/// Parsed descriptive fields of a movie or series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaFields {
    /// Title.
    pub title: String,
    /// Release year.
    pub year: Option<i64>,
    /// Rating on the source's scale.
    pub rating: Option<f64>,
    /// Genre.
    pub genre: Option<String>,
}

impl MediaFields {
    /// Fields with only a title.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// True when year, rating and genre equal the stored row's (nulls equal).
    #[must_use]
    pub fn matches(&self, item: &MediaItem) -> bool {
        self.year == item.year && self.rating == item.rating && self.genre == item.genre
    }
}

/// A row of `media_items`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct MediaItem {
    /// Surrogate id.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Kind (stored as text, parsed via `kind()`).
    #[sqlx(rename = "kind")]
    pub kind_str: String,
    /// Release year.
    pub year: Option<i64>,
    /// Rating.
    pub rating: Option<f64>,
    /// Genre.
    pub genre: Option<String>,
    /// When the row was inserted.
    pub created_at: String,
    /// When descriptive fields last changed.
    pub updated_at: String,
}

impl MediaItem {
    /// Returns the parsed kind; `None` for values outside the schema.
    #[must_use]
    pub fn kind(&self) -> Option<MediaKind> {
        self.kind_str.parse().ok()
    }

    /// Descriptive fields of this row.
    #[must_use]
    pub fn fields(&self) -> MediaFields {
        MediaFields {
            title: self.title.clone(),
            year: self.year,
            rating: self.rating,
            genre: self.genre.clone(),
        }
    }
}

/// A row of `episodes`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Episode {
    /// Surrogate id.
    pub id: i64,
    /// Parent season.
    pub season_id: i64,
    /// Number within the season.
    pub episode_number: i64,
    /// Title, when it was known.
    pub title: Option<String>,
}

/// The entity a link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// A movie or series row.
    MediaItem(i64),
    /// An episode row.
    Episode(i64),
}

impl Owner {
    /// The owner's id.
    #[must_use]
    pub fn id(&self) -> i64 {
        match self {
            Self::MediaItem(id) | Self::Episode(id) => *id,
        }
    }

    /// `(media_item_id, episode_id)` column values.
    pub(crate) fn bind_values(self) -> (Option<i64>, Option<i64>) {
        match self {
            Self::MediaItem(id) => (Some(id), None),
            Self::Episode(id) => (None, Some(id)),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MediaItem(id) => write!(f, "media_item:{id}"),
            Self::Episode(id) => write!(f, "episode:{id}"),
        }
    }
}

/// A persisted link joined with its server and quality names.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StoredLink {
    /// Surrogate id.
    pub id: i64,
    /// Server name.
    pub server: String,
    /// Quality label.
    pub quality: String,
    /// Language code.
    pub language: String,
    /// Canonical URL.
    pub url: String,
}

/// Outcome of resolving one natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Persisted id.
    pub id: i64,
    /// A row was inserted.
    pub is_new: bool,
    /// An existing row's descriptive fields were changed.
    pub updated: bool,
}

impl Resolution {
    /// A freshly inserted row.
    #[must_use]
    pub fn inserted(id: i64) -> Self {
        Self {
            id,
            is_new: true,
            updated: false,
        }
    }

    /// An existing row reused as-is.
    #[must_use]
    pub fn reused(id: i64) -> Self {
        Self {
            id,
            is_new: false,
            updated: false,
        }
    }

    /// An existing row that was enriched in place.
    #[must_use]
    pub fn enriched(id: i64) -> Self {
        Self {
            id,
            is_new: false,
            updated: true,
        }
    }
}

impl CacheEntry for Resolution {
    fn id(&self) -> i64 {
        self.id
    }

    fn from_cached(id: i64) -> Self {
        Self::reused(id)
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    /// `media_items` rows.
    pub media_items: i64,
    /// `seasons` rows.
    pub seasons: i64,
    /// `episodes` rows.
    pub episodes: i64,
    /// `links` rows.
    pub links: i64,
}
