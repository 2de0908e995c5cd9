//! Regex-driven field extractor configured from the config file.
//!
//! Each rule is a regex. Single-value rules take the named group `value`, or
//! the first capture group, or the whole match. The listing rule may name its
//! group `url`. The variant rule must name `language`, `server` and `url`.
//!
//! ```toml
//! [scopes.extract]
//! listing_item = 'class="item"><a href="(?P<url>[^"]+)"'
//! title = '<h1>(?P<value>[^<]+)</h1>'
//! year = '<span class="year">(\d{4})</span>'
//! variant = 'data-lang="(?P<language>[^"]+)" data-server="(?P<server>[^"]+)" data-src="(?P<url>[^"]+)"'
//! ```

use std::collections::HashSet;

use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{ExtractError, FieldExtractor, RawFields, RawItem, RawItemPage, RawLinkContext, RawVariant};
use crate::fetch::RawDocument;

/// Regex rules for one crawl scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionRules {
    /// Item links on a listing page.
    pub listing_item: String,
    /// Item (or episode) title.
    pub title: String,
    /// Release year.
    #[serde(default)]
    pub year: Option<String>,
    /// Rating.
    #[serde(default)]
    pub rating: Option<String>,
    /// Genre.
    #[serde(default)]
    pub genre: Option<String>,
    /// Parent series title on episode pages; falls back to `title`.
    #[serde(default)]
    pub series_title: Option<String>,
    /// Episode label; a match marks the page as an episode.
    #[serde(default)]
    pub episode_label: Option<String>,
    /// One stream variant.
    pub variant: String,
    /// Link to a separate page holding the variants.
    #[serde(default)]
    pub links_page: Option<String>,
}

/// Compiled [`ExtractionRules`].
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    listing_item: Regex,
    title: Regex,
    year: Option<Regex>,
    rating: Option<Regex>,
    genre: Option<Regex>,
    series_title: Option<Regex>,
    episode_label: Option<Regex>,
    variant: Regex,
    links_page: Option<Regex>,
}

impl PatternExtractor {
    /// Compiles the rules.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRule`] if a pattern does not compile or
    /// the variant rule lacks one of its named groups.
    pub fn new(rules: &ExtractionRules) -> Result<Self, ExtractError> {
        let variant = compile("variant", &rules.variant)?;
        let names: HashSet<&str> = variant.capture_names().flatten().collect();
        for group in ["language", "server", "url"] {
            if !names.contains(group) {
                return Err(ExtractError::invalid_rule(
                    "variant",
                    format!("missing named group '{group}'"),
                ));
            }
        }

        Ok(Self {
            listing_item: compile("listing_item", &rules.listing_item)?,
            title: compile("title", &rules.title)?,
            year: compile_optional("year", rules.year.as_deref())?,
            rating: compile_optional("rating", rules.rating.as_deref())?,
            genre: compile_optional("genre", rules.genre.as_deref())?,
            series_title: compile_optional("series_title", rules.series_title.as_deref())?,
            episode_label: compile_optional("episode_label", rules.episode_label.as_deref())?,
            variant,
            links_page: compile_optional("links_page", rules.links_page.as_deref())?,
        })
    }

    fn fields(&self, doc: &RawDocument, title: String) -> RawFields {
        RawFields {
            title,
            year: self.year.as_ref().and_then(|re| capture_value(re, &doc.body)),
            rating: self.rating.as_ref().and_then(|re| capture_value(re, &doc.body)),
            genre: self.genre.as_ref().and_then(|re| capture_value(re, &doc.body)),
        }
    }
}

impl FieldExtractor for PatternExtractor {
    fn listing_links(&self, doc: &RawDocument) -> Result<Vec<String>, ExtractError> {
        let mut seen = HashSet::new();
        let links: Vec<String> = self
            .listing_item
            .captures_iter(&doc.body)
            .filter_map(|caps| group_or_first(&caps, "url"))
            .map(|href| resolve_url(&doc.url, &href))
            .filter(|url| seen.insert(url.clone()))
            .collect();

        debug!(url = %doc.url, count = links.len(), "listing links extracted");
        Ok(links)
    }

    #[instrument(skip(self, doc), fields(url = %doc.url))]
    fn item_page(&self, doc: &RawDocument) -> Result<RawItemPage, ExtractError> {
        let label = self
            .episode_label
            .as_ref()
            .and_then(|re| capture_value(re, &doc.body));

        let item = match label {
            Some(label) => {
                let series_title = self
                    .series_title
                    .as_ref()
                    .and_then(|re| capture_value(re, &doc.body))
                    .or_else(|| capture_value(&self.title, &doc.body))
                    .ok_or_else(|| ExtractError::missing("series_title", &doc.url))?;
                RawItem::Episode {
                    series: self.fields(doc, series_title),
                    label,
                }
            }
            None => {
                let title = capture_value(&self.title, &doc.body)
                    .ok_or_else(|| ExtractError::missing("title", &doc.url))?;
                RawItem::Movie(self.fields(doc, title))
            }
        };

        let links_page = self
            .links_page
            .as_ref()
            .and_then(|re| re.captures(&doc.body))
            .and_then(|caps| group_or_first(&caps, "url"))
            .map(|href| resolve_url(&doc.url, &href));

        let links = match links_page {
            Some(url) => RawLinkContext::Page(url),
            None => RawLinkContext::Inline(self.variants(doc)?),
        };

        Ok(RawItemPage { item, links })
    }

    fn variants(&self, doc: &RawDocument) -> Result<Vec<RawVariant>, ExtractError> {
        let field = |caps: &Captures<'_>, name: &str| {
            caps.name(name)
                .map(|m| decode_entities(m.as_str().trim()))
                .unwrap_or_default()
        };

        Ok(self
            .variant
            .captures_iter(&doc.body)
            .map(|caps| {
                let url = field(&caps, "url");
                RawVariant {
                    language_label: field(&caps, "language"),
                    server_label: field(&caps, "server"),
                    embedded_url: if url.is_empty() {
                        url
                    } else {
                        resolve_url(&doc.url, &url)
                    },
                }
            })
            .collect())
    }
}

fn compile(rule: &str, pattern: &str) -> Result<Regex, ExtractError> {
    Regex::new(pattern).map_err(|e| ExtractError::invalid_rule(rule, e.to_string()))
}

fn compile_optional(rule: &str, pattern: Option<&str>) -> Result<Option<Regex>, ExtractError> {
    pattern.map(|p| compile(rule, p)).transpose()
}

fn group_or_first(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name)
        .or_else(|| caps.get(1))
        .or_else(|| caps.get(0))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|value| !value.is_empty())
}

/// First match of `re`: group `value`, else group 1, else the whole match.
fn capture_value(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).and_then(|caps| group_or_first(&caps, "value"))
}

/// Resolves `href` against the page URL; leaves it untouched if either is unusable.
fn resolve_url(base: &str, href: &str) -> String {
    url::Url::parse(base)
        .and_then(|base| base.join(href))
        .map_or_else(|_| href.to_string(), |joined| joined.to_string())
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rules() -> ExtractionRules {
        ExtractionRules {
            listing_item: r#"<a class="item" href="(?P<url>[^"]+)""#.to_string(),
            title: r"<h1>(?P<value>[^<]+)</h1>".to_string(),
            year: Some(r#"<span class="year">(\d{4})</span>"#.to_string()),
            rating: Some(r#"<span class="rating">([^<]+)</span>"#.to_string()),
            genre: Some(r#"<span class="genre">([^<]+)</span>"#.to_string()),
            series_title: Some(r#"<h2 class="series">([^<]+)</h2>"#.to_string()),
            episode_label: Some(r#"<span class="episode">([^<]+)</span>"#.to_string()),
            variant: r#"<li data-lang="(?P<language>[^"]*)" data-server="(?P<server>[^"]*)" data-src="(?P<url>[^"]*)">"#
                .to_string(),
            links_page: Some(r#"<a class="links" href="([^"]+)">"#.to_string()),
        }
    }

    fn doc(url: &str, body: &str) -> RawDocument {
        RawDocument::new(url, body)
    }

    #[test]
    fn test_listing_links_resolves_relative_and_dedups() {
        let extractor = PatternExtractor::new(&rules()).unwrap();
        let page = doc(
            "https://site.example/movies/page/2",
            r#"<a class="item" href="/movie/a"></a><a class="item" href="https://site.example/movie/b"></a><a class="item" href="/movie/a"></a>"#,
        );

        let links = extractor.listing_links(&page).unwrap();
        assert_eq!(
            links,
            vec![
                "https://site.example/movie/a".to_string(),
                "https://site.example/movie/b".to_string()
            ]
        );
    }

    #[test]
    fn test_item_page_movie_with_inline_variants() {
        let extractor = PatternExtractor::new(&rules()).unwrap();
        let page = doc(
            "https://site.example/movie/a",
            r#"<h1>Example &amp; Co</h1><span class="year">2020</span><span class="rating">7.5</span>
               <span class="genre">Drama</span>
               <li data-lang="Latino" data-server="streamtape" data-src="/embed/1">"#,
        );

        let result = extractor.item_page(&page).unwrap();
        let RawItem::Movie(fields) = result.item else {
            panic!("expected movie, got {:?}", result.item);
        };
        assert_eq!(fields.title, "Example & Co");
        assert_eq!(fields.year.as_deref(), Some("2020"));
        assert_eq!(fields.rating.as_deref(), Some("7.5"));
        assert_eq!(fields.genre.as_deref(), Some("Drama"));
        assert_eq!(
            result.links,
            RawLinkContext::Inline(vec![RawVariant {
                language_label: "Latino".to_string(),
                server_label: "streamtape".to_string(),
                embedded_url: "https://site.example/embed/1".to_string(),
            }])
        );
    }

    #[test]
    fn test_item_page_episode_with_links_page() {
        let extractor = PatternExtractor::new(&rules()).unwrap();
        let page = doc(
            "https://site.example/show/ep",
            r#"<h1>Night Falls</h1><h2 class="series">The Show</h2><span class="episode">2x05 Night Falls</span>
               <a class="links" href="/show/ep/links">"#,
        );

        let result = extractor.item_page(&page).unwrap();
        match result.item {
            RawItem::Episode { series, label } => {
                assert_eq!(series.title, "The Show");
                assert_eq!(label, "2x05 Night Falls");
            }
            other @ RawItem::Movie(_) => panic!("expected episode, got {other:?}"),
        }
        assert_eq!(
            result.links,
            RawLinkContext::Page("https://site.example/show/ep/links".to_string())
        );
    }

    #[test]
    fn test_item_page_missing_title_is_error() {
        let extractor = PatternExtractor::new(&rules()).unwrap();
        let err = extractor
            .item_page(&doc("https://site.example/movie/x", "<p>nothing here</p>"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::MissingField { field: "title", .. }));
    }

    #[test]
    fn test_variant_rule_requires_named_groups() {
        let mut bad = rules();
        bad.variant = r#"data-src="([^"]+)""#.to_string();
        let err = PatternExtractor::new(&bad).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidRule { ref rule, .. } if rule == "variant"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let mut bad = rules();
        bad.title = "(unclosed".to_string();
        let err = PatternExtractor::new(&bad).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidRule { ref rule, .. } if rule == "title"));
    }

    #[test]
    fn test_rules_deserialize_from_toml() {
        let parsed: ExtractionRules = toml::from_str(
            r#"
            listing_item = 'href="([^"]+)"'
            title = '<h1>([^<]+)</h1>'
            variant = '(?P<language>\w+) (?P<server>\w+) (?P<url>\S+)'
            "#,
        )
        .unwrap();
        assert!(parsed.year.is_none());
        assert!(PatternExtractor::new(&parsed).is_ok());
    }
}
