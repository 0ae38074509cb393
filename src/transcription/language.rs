//! Language hints for transcription requests.
//!
//! Requests either name a concrete language or ask for automatic detection.
//! Detection picks the most probable entry of this table from the first audio
//! window, so the table doubles as the detection search space.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Languages the transcription API accepts as hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
    Fr,
    De,
    It,
    Pt,
    Ru,
    Ja,
    Ko,
    Zh,
}

impl Language {
    pub const ALL: [Language; 10] = [
        Language::En,
        Language::Es,
        Language::Fr,
        Language::De,
        Language::It,
        Language::Pt,
        Language::Ru,
        Language::Ja,
        Language::Ko,
        Language::Zh,
    ];

    /// ISO 639-1 code, as reported in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
            Language::It => "it",
            Language::Pt => "pt",
            Language::Ru => "ru",
            Language::Ja => "ja",
            Language::Ko => "ko",
            Language::Zh => "zh",
        }
    }

    /// Human-readable name for UI selectors.
    pub fn name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Es => "Spanish",
            Language::Fr => "French",
            Language::De => "German",
            Language::It => "Italian",
            Language::Pt => "Portuguese",
            Language::Ru => "Russian",
            Language::Ja => "Japanese",
            Language::Ko => "Korean",
            Language::Zh => "Chinese",
        }
    }

    /// The Whisper vocabulary token for this language.
    pub fn token(&self) -> &'static str {
        match self {
            Language::En => "<|en|>",
            Language::Es => "<|es|>",
            Language::Fr => "<|fr|>",
            Language::De => "<|de|>",
            Language::It => "<|it|>",
            Language::Pt => "<|pt|>",
            Language::Ru => "<|ru|>",
            Language::Ja => "<|ja|>",
            Language::Ko => "<|ko|>",
            Language::Zh => "<|zh|>",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        for lang in Language::ALL {
            if lowered == lang.code() || lowered == lang.name().to_lowercase() {
                return Ok(lang);
            }
        }
        Err(anyhow!("Unsupported language: {}", s))
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Parse a request's language field. Empty strings and the `auto` spellings
/// mean automatic detection and map to `None`.
pub fn parse_language_hint(raw: &str) -> Result<Option<Language>> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() || lowered == "auto" || lowered == "automatic" || lowered == "automatic detection" {
        return Ok(None);
    }
    lowered.parse::<Language>().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("Chinese".parse::<Language>().unwrap(), Language::Zh);
        assert_eq!("ZH".parse::<Language>().unwrap(), Language::Zh);
        assert!("klingon".parse::<Language>().is_err());
    }

    #[test]
    fn test_auto_detection_hints() {
        assert_eq!(parse_language_hint("auto").unwrap(), None);
        assert_eq!(parse_language_hint("").unwrap(), None);
        assert_eq!(parse_language_hint("Automatic Detection").unwrap(), None);
        assert_eq!(parse_language_hint("en").unwrap(), Some(Language::En));
        assert!(parse_language_hint("xx").is_err());
    }

    #[test]
    fn test_language_tokens() {
        assert_eq!(Language::En.token(), "<|en|>");
        assert_eq!(Language::Zh.token(), "<|zh|>");
        assert_eq!(Language::ALL.len(), 10);
    }
}
