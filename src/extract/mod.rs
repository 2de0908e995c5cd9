//! Field-extraction collaborator boundary.
//!
//! A [`FieldExtractor`] turns a [`RawDocument`] into raw field strings. It
//! knows nothing about the catalog: parsing years, ratings and episode labels
//! happens in [`crate::resolve`].
//!
//! [`PatternExtractor`] is a configurable implementation driven by regex
//! rules from the config file.

mod error;
mod pattern;

pub use error::ExtractError;
pub use pattern::{ExtractionRules, PatternExtractor};

use crate::fetch::RawDocument;

/// Descriptive fields as found on a movie or series page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFields {
    /// Title text.
    pub title: String,
    /// Year text, if present.
    pub year: Option<String>,
    /// Rating text, if present (`"7.5"`, `"7,5"`, `"7.5/10"`).
    pub rating: Option<String>,
    /// Genre text, if present.
    pub genre: Option<String>,
}

/// What an item page describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawItem {
    /// A movie.
    Movie(RawFields),
    /// One episode of a series.
    Episode {
        /// The parent series' fields.
        series: RawFields,
        /// Episode label such as `"2x05 Night Falls"` or `"S02E05"`.
        label: String,
    },
}

/// One raw (language, server, URL) tuple before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawVariant {
    /// Language label as shown on the page.
    pub language_label: String,
    /// Provider label or URL.
    pub server_label: String,
    /// Embedded player URL.
    pub embedded_url: String,
}

/// Where an item's stream variants come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawLinkContext {
    /// Variants were present on the item page itself.
    Inline(Vec<RawVariant>),
    /// Variants live on a separate page that must be fetched.
    Page(String),
}

/// Extraction result for one item page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItemPage {
    /// Item metadata.
    pub item: RawItem,
    /// Source of the stream variants.
    pub links: RawLinkContext,
}

/// Turns raw documents into structured raw fields.
pub trait FieldExtractor: Send + Sync {
    /// Returns absolute item URLs found on a listing page, in page order.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the page cannot be interpreted as a listing.
    fn listing_links(&self, doc: &RawDocument) -> Result<Vec<String>, ExtractError>;

    /// Extracts item metadata and the link context from an item page.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when a required field is missing.
    fn item_page(&self, doc: &RawDocument) -> Result<RawItemPage, ExtractError>;

    /// Extracts the variant contexts from a dedicated links page.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the page cannot be interpreted.
    fn variants(&self, doc: &RawDocument) -> Result<Vec<RawVariant>, ExtractError>;
}
