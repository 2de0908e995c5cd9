//! Parsing of raw field strings into typed values.

use std::sync::LazyLock;

use regex::Regex;

use crate::catalog::MediaFields;
use crate::extract::{ExtractError, RawFields};

#[allow(clippy::expect_used)]
static YEAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").expect("year regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static RATING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2}(?:[.,]\d+)?)").expect("rating regex is valid") // Static pattern, safe to panic
});

/// `S02E05 - Title`, `2x05 Title`, `2x05`.
#[allow(clippy::expect_used)]
static EPISODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:s(\d{1,3})\s*e(\d{1,4})|(\d{1,3})\s*x\s*(\d{1,4}))\b\s*(?:[-:.|]\s*)?(.*?)\s*$")
        .expect("episode regex is valid") // Static pattern, safe to panic
});

/// Season, episode and optional title parsed from an episode label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeLabel {
    /// Season number.
    pub season: i64,
    /// Episode number within the season.
    pub episode: i64,
    /// Episode title, when the label carries one.
    pub title: Option<String>,
}

/// Values that mean "not available" on listing sites.
fn is_placeholder(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "-" | "n/a" | "na" | "?" | "tba" | "unknown"
    )
}

/// Parses a year such as `"2020"` or `"(2020)"`.
///
/// # Errors
///
/// Returns [`ExtractError::Unparseable`] if a non-placeholder value holds no year.
pub fn parse_year(raw: Option<&str>) -> Result<Option<i64>, ExtractError> {
    let Some(raw) = raw.filter(|value| !is_placeholder(value)) else {
        return Ok(None);
    };
    YEAR_PATTERN
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .map(Some)
        .ok_or_else(|| ExtractError::unparseable("year", raw))
}

/// Parses a rating such as `"7.5"`, `"7,5"` or `"7.5/10"`.
///
/// # Errors
///
/// Returns [`ExtractError::Unparseable`] if a non-placeholder value holds no number.
pub fn parse_rating(raw: Option<&str>) -> Result<Option<f64>, ExtractError> {
    let Some(raw) = raw.filter(|value| !is_placeholder(value)) else {
        return Ok(None);
    };
    RATING_PATTERN
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().replace(',', ".").parse().ok())
        .map(Some)
        .ok_or_else(|| ExtractError::unparseable("rating", raw))
}

/// Trims a genre; placeholders become `None`.
#[must_use]
pub fn parse_genre(raw: Option<&str>) -> Option<String> {
    raw.filter(|value| !is_placeholder(value))
        .map(|value| value.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Parses an episode label.
///
/// `"2x05 Night Falls"` and `"S02E05 - Night Falls"` both give season 2,
/// episode 5 and title `"Night Falls"`; `"2x05"` has no title.
///
/// # Errors
///
/// Returns [`ExtractError::Unparseable`] if the label has no season/episode marker.
pub fn parse_episode_label(label: &str) -> Result<EpisodeLabel, ExtractError> {
    let caps = EPISODE_PATTERN
        .captures(label)
        .ok_or_else(|| ExtractError::unparseable("episode_label", label))?;

    let number = |a: usize, b: usize| {
        caps.get(a)
            .or_else(|| caps.get(b))
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .ok_or_else(|| ExtractError::unparseable("episode_label", label))
    };
    let season = number(1, 3)?;
    let episode = number(2, 4)?;
    let title = caps
        .get(5)
        .map(|m| m.as_str().trim())
        .filter(|title| !title.is_empty())
        .map(str::to_string);

    Ok(EpisodeLabel {
        season,
        episode,
        title,
    })
}

/// Parses raw descriptive fields.
///
/// # Errors
///
/// Returns [`ExtractError`] if the title is blank or a field is unparseable.
pub fn parse_fields(raw: &RawFields) -> Result<MediaFields, ExtractError> {
    let title = raw.title.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        return Err(ExtractError::unparseable("title", raw.title.clone()));
    }
    Ok(MediaFields {
        title,
        year: parse_year(raw.year.as_deref())?,
        rating: parse_rating(raw.rating.as_deref())?,
        genre: parse_genre(raw.genre.as_deref()),
    })
}
