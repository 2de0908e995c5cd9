//! Link normalization: raw variant contexts into canonical link records.
//!
//! A variant becomes a [`LinkRecord`] only when its language, server and URL
//! all survive normalization. Partial variants are dropped, never defaulted.
//!
//! - Language comes from a fixed label table ([`Language::classify`]).
//! - The server is the lowercase provider identifier with scheme, `www.` and
//!   domain suffix removed.
//! - Resolution tokens in embed paths (`embed-<server>-<w>x<h>.html`) collapse
//!   to the bare `<server>` path.
//! - Quality is derived from the server alone ([`QualityTier::for_server`]).

mod language;

pub use language::Language;

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace};
use url::Url;

use crate::extract::RawVariant;

/// Servers whose streams are classified as high quality.
pub const HIGH_TIER_SERVERS: &[&str] = &["streamtape", "vidmoly", "mixdrop"];

/// Embed path carrying a resolution token: `/embed-<server>-<w>x<h>.html`.
#[allow(clippy::expect_used)]
static EMBED_RESOLUTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/embed-([A-Za-z0-9_]+)-\d+x\d+\.html$").expect("embed regex is valid") // Static pattern, safe to panic
});

/// Quality tier derived from server identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityTier {
    /// Allowlisted providers.
    High,
    /// Everything else.
    Standard,
}

impl QualityTier {
    /// Classifies a normalized server name.
    #[must_use]
    pub fn for_server(server: &str) -> Self {
        if HIGH_TIER_SERVERS.contains(&server) {
            Self::High
        } else {
            Self::Standard
        }
    }

    /// Label stored in the `qualities` table.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "HD",
            Self::Standard => "SD",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A normalized, persistable stream link (owner not included).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkRecord {
    /// Normalized server name.
    pub server: String,
    /// Derived quality tier.
    pub quality: QualityTier,
    /// Classified language.
    pub language: Language,
    /// Canonical URL.
    pub url: String,
}

/// Normalizes a provider label or URL into a bare server identifier.
///
/// `"https://www.StreamTape.com/e/abc"`, `"streamtape.com"` and `"Streamtape"`
/// all yield `"streamtape"`.
#[must_use]
pub fn normalize_server(label: &str) -> Option<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return None;
    }

    let host = Url::parse(trimmed)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| {
            let without_scheme = trimmed.split("://").last().unwrap_or(trimmed);
            without_scheme
                .split(['/', '?', '#'])
                .next()
                .unwrap_or(without_scheme)
                .to_string()
        });

    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let name: String = host
        .split('.')
        .next()
        .unwrap_or(host)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if name.is_empty() { None } else { Some(name) }
}

/// Collapses resolution-specific embed paths to one canonical URL per server.
///
/// `https://host/embed-powvideo-1920x1080.html?autoplay=1` becomes
/// `https://host/powvideo?autoplay=1`. Query and fragment are kept; URLs
/// without a resolution token come back trimmed but otherwise untouched.
#[must_use]
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Ok(mut parsed) = Url::parse(trimmed) else {
        return Some(EMBED_RESOLUTION_PATTERN.replace(trimmed, "/$1").into_owned());
    };
    let path = match EMBED_RESOLUTION_PATTERN.replace(parsed.path(), "/$1") {
        Cow::Owned(path) => path,
        Cow::Borrowed(_) => return Some(trimmed.to_string()),
    };
    parsed.set_path(&path);
    Some(parsed.into())
}

/// Normalizes one variant, or `None` if any component is missing.
#[must_use]
pub fn normalize_variant(variant: &RawVariant) -> Option<LinkRecord> {
    let Some(language) = Language::classify(&variant.language_label) else {
        trace!(label = %variant.language_label, "unrecognized language label");
        return None;
    };
    let server = normalize_server(&variant.server_label)?;
    let url = normalize_url(&variant.embedded_url)?;
    let quality = QualityTier::for_server(&server);

    Some(LinkRecord {
        server,
        quality,
        language,
        url,
    })
}

/// Normalizes a page's variants, dropping partial ones and in-page duplicates.
#[must_use]
pub fn normalize_variants(variants: &[RawVariant]) -> Vec<LinkRecord> {
    let mut seen = HashSet::new();
    let records: Vec<LinkRecord> = variants
        .iter()
        .filter_map(normalize_variant)
        .filter(|record| seen.insert(record.clone()))
        .collect();

    if records.len() < variants.len() {
        debug!(
            raw = variants.len(),
            kept = records.len(),
            "dropped partial or duplicate variants"
        );
    }
    records
}
