//! Listing URL plans.

use serde::Deserialize;

/// Default first page of a listing.
pub const DEFAULT_START_PAGE: u32 = 1;

/// How a scope's listing pages are addressed.
///
/// `url_template` contains `{page}` and, for letter-indexed listings,
/// `{letter}`; `alphabet` then lists the letters in crawl order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingPlan {
    /// Listing URL with `{page}` and optional `{letter}` placeholders.
    pub url_template: String,
    /// Letters substituted for `{letter}`, in order.
    #[serde(default)]
    pub alphabet: Vec<String>,
    /// First page number.
    #[serde(default = "default_start_page")]
    pub start_page: u32,
    /// Page ceiling per letter; unlimited when absent.
    #[serde(default)]
    pub max_pages: Option<u32>,
}

fn default_start_page() -> u32 {
    DEFAULT_START_PAGE
}

impl ListingPlan {
    /// Plan for an unlettered listing.
    #[must_use]
    pub fn paged(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            alphabet: Vec::new(),
            start_page: DEFAULT_START_PAGE,
            max_pages: None,
        }
    }

    /// Checks placeholder and alphabet consistency.
    ///
    /// # Errors
    ///
    /// Returns a message describing the inconsistency.
    pub fn validate(&self) -> Result<(), String> {
        if !self.url_template.contains("{page}") {
            return Err("url_template must contain {page}".to_string());
        }
        let lettered = self.url_template.contains("{letter}");
        if lettered && self.alphabet.is_empty() {
            return Err("url_template uses {letter} but alphabet is empty".to_string());
        }
        if !lettered && !self.alphabet.is_empty() {
            return Err("alphabet is set but url_template has no {letter}".to_string());
        }
        if self.max_pages == Some(0) {
            return Err("max_pages must be at least 1".to_string());
        }
        Ok(())
    }

    /// Number of letters to crawl; 1 for unlettered listings.
    #[must_use]
    pub fn letter_count(&self) -> usize {
        self.alphabet.len().max(1)
    }

    /// Letter at `index`, if the listing is lettered.
    #[must_use]
    pub fn letter(&self, index: usize) -> Option<&str> {
        self.alphabet.get(index).map(String::as_str)
    }

    /// Last page to read for a letter, if capped.
    #[must_use]
    pub fn last_page(&self) -> Option<u32> {
        self.max_pages
            .map(|max| self.start_page.saturating_add(max.saturating_sub(1)))
    }

    /// URL of one listing page.
    #[must_use]
    pub fn page_url(&self, letter_index: usize, page: u32) -> String {
        let url = self.url_template.replace("{page}", &page.to_string());
        match self.letter(letter_index) {
            Some(letter) => url.replace("{letter}", letter),
            None => url,
        }
    }
}
