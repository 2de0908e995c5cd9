//! Audio/subtitle language classification from free-form page labels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed set of stream languages recognized on item pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Castilian Spanish dub.
    SpanishDub,
    /// Latin-American Spanish dub.
    Latino,
    /// Original audio with Spanish subtitles.
    SpanishSub,
    /// Original audio without subtitles.
    Original,
    /// Original audio with English subtitles.
    EnglishSub,
}

impl Language {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpanishDub => "spanish_dub",
            Self::Latino => "latino",
            Self::SpanishSub => "spanish_sub",
            Self::Original => "original",
            Self::EnglishSub => "english_sub",
        }
    }

    /// Classifies a page label such as `"Castellano"`, `"VOSE"` or `"Sub Inglés"`.
    ///
    /// Returns `None` for labels outside the fixed set.
    #[must_use]
    pub fn classify(label: &str) -> Option<Self> {
        let folded = fold_label(label);
        if folded.is_empty() {
            return None;
        }
        let words: Vec<&str> = folded.split_whitespace().collect();
        let has = |word: &str| words.contains(&word);
        let subtitled = has("sub") || has("subs") || has("subtitulado") || has("subtitulos");

        // Subtitle variants first: "sub espanol" must not read as a Spanish dub.
        if has("vosi") || (subtitled && (has("ingles") || has("english"))) {
            return Some(Self::EnglishSub);
        }
        if has("vose") || subtitled {
            return Some(Self::SpanishSub);
        }
        if has("latino") || has("latin") || has("lat") {
            return Some(Self::Latino);
        }
        if has("castellano") || has("espanol") || has("spanish") || has("esp") {
            return Some(Self::SpanishDub);
        }
        if has("original") || has("vo") || has("ingles") || has("english") {
            return Some(Self::Original);
        }
        None
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spanish_dub" => Ok(Self::SpanishDub),
            "latino" => Ok(Self::Latino),
            "spanish_sub" => Ok(Self::SpanishSub),
            "original" => Ok(Self::Original),
            "english_sub" => Ok(Self::EnglishSub),
            _ => Err(format!("invalid language: {s}")),
        }
    }
}

/// Lowercases, strips accents and turns punctuation into word breaks.
fn fold_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .collect()
}
