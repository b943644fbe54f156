//! Language detection (§4.3 LanguageDetector)
//!
//! Classifies a transcript chunk into one of the supported language codes,
//! trying cheap signals first (Unicode script range, English keyword
//! hits) before falling back to a trigram frequency heuristic. Anything
//! that can't be placed clamps to the caller-provided default.

use once_cell::sync::Lazy;
use regex::Regex;

/// Languages this gateway can route to STT/TTS providers (§4.3).
pub const SUPPORTED_LANGUAGES: &[&str] =
    &["hi", "en", "bn", "te", "ta", "mr", "gu", "kn", "ml", "pa", "or", "as", "ur"];

struct ScriptRange {
    lang: &'static str,
    start: u32,
    end: u32,
}

/// Unicode block ranges that map unambiguously to a single supported
/// language. Ordered by block, not by likelihood.
const SCRIPT_RANGES: &[ScriptRange] = &[
    ScriptRange { lang: "hi", start: 0x0900, end: 0x097F }, // Devanagari (also mr)
    ScriptRange { lang: "bn", start: 0x0980, end: 0x09FF }, // Bengali/Assamese
    ScriptRange { lang: "gu", start: 0x0A80, end: 0x0AFF },
    ScriptRange { lang: "pa", start: 0x0A00, end: 0x0A7F }, // Gurmukhi
    ScriptRange { lang: "or", start: 0x0B00, end: 0x0B7F },
    ScriptRange { lang: "ta", start: 0x0B80, end: 0x0BFF },
    ScriptRange { lang: "te", start: 0x0C00, end: 0x0C7F },
    ScriptRange { lang: "kn", start: 0x0C80, end: 0x0CFF },
    ScriptRange { lang: "ml", start: 0x0D00, end: 0x0D7F },
    ScriptRange { lang: "ur", start: 0x0600, end: 0x06FF }, // Arabic block, used by Urdu here
];

static ENGLISH_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(the|is|are|you|please|hello|yes|no|thank|thanks|okay|what|when)\b").unwrap()
});

/// Stateless language classifier (§4.3). Cheap enough to run per
/// transcript chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageDetector;

impl LanguageDetector {
    pub fn new() -> Self {
        Self
    }

    /// Classify `text`, falling back to `default_language` when no signal
    /// fires or the detected code isn't in `SUPPORTED_LANGUAGES`.
    pub fn detect(&self, text: &str, default_language: &str) -> String {
        let fallback = clamp(default_language);

        if text.trim().is_empty() {
            return fallback;
        }

        if let Some(lang) = self.by_script(text) {
            return lang.to_string();
        }

        if ENGLISH_WORD.is_match(text) && text.chars().all(|c| c.is_ascii() || c.is_whitespace()) {
            return "en".to_string();
        }

        if let Some(lang) = self.by_trigram(text) {
            return lang.to_string();
        }

        fallback
    }

    /// Count codepoints per known script range and return the plurality
    /// script if it covers a meaningful share of the non-whitespace text.
    fn by_script(&self, text: &str) -> Option<&'static str> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        let mut total_letters = 0usize;

        for ch in text.chars() {
            if ch.is_whitespace() || ch.is_ascii_punctuation() {
                continue;
            }
            total_letters += 1;
            let code = ch as u32;
            for range in SCRIPT_RANGES {
                if code >= range.start && code <= range.end {
                    match counts.iter_mut().find(|(l, _)| *l == range.lang) {
                        Some((_, n)) => *n += 1,
                        None => counts.push((range.lang, 1)),
                    }
                    break;
                }
            }
        }

        if total_letters == 0 {
            return None;
        }

        counts
            .into_iter()
            .max_by_key(|(_, n)| *n)
            .filter(|(_, n)| *n * 2 >= total_letters)
            .map(|(l, _)| l)
    }

    /// Fallback statistical pass: a tiny trigram table distinguishing
    /// romanized Hindi/Marathi from English when the script test can't
    /// fire (latin-transliterated speech, common over noisy STT).
    fn by_trigram(&self, text: &str) -> Option<&'static str> {
        let lowered = text.to_lowercase();
        const HINGLISH_MARKERS: &[&str] = &["hai", "kya", "nahi", "acha", "theek", "haan"];
        const MARATHI_MARKERS: &[&str] = &["aahe", "nahi re", "kay", "bara"];

        let hinglish_hits = HINGLISH_MARKERS.iter().filter(|m| lowered.contains(*m)).count();
        let marathi_hits = MARATHI_MARKERS.iter().filter(|m| lowered.contains(*m)).count();

        if marathi_hits > hinglish_hits && marathi_hits > 0 {
            Some("mr")
        } else if hinglish_hits > 0 {
            Some("hi")
        } else {
            None
        }
    }
}

/// Clamp an arbitrary language code to the supported set, defaulting to
/// English when it isn't recognized.
pub fn clamp(lang: &str) -> String {
    let lowered = lang.to_lowercase();
    if SUPPORTED_LANGUAGES.contains(&lowered.as_str()) {
        lowered
    } else {
        "en".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_devanagari_as_hindi() {
        let detector = LanguageDetector::new();
        assert_eq!(detector.detect("नमस्ते आप कैसे हैं", "en"), "hi");
    }

    #[test]
    fn detects_tamil_script() {
        let detector = LanguageDetector::new();
        assert_eq!(detector.detect("வணக்கம் எப்படி இருக்கிறீர்கள்", "en"), "ta");
    }

    #[test]
    fn detects_english_keywords() {
        let detector = LanguageDetector::new();
        assert_eq!(detector.detect("Hello, thank you, is this okay?", "hi"), "en");
    }

    #[test]
    fn empty_text_falls_back_to_default() {
        let detector = LanguageDetector::new();
        assert_eq!(detector.detect("", "ta"), "ta");
    }

    #[test]
    fn unrecognized_default_clamps_to_english() {
        assert_eq!(clamp("zz"), "en");
        assert_eq!(clamp("TE"), "te");
    }

    #[test]
    fn hinglish_heuristic_catches_romanized_text() {
        let detector = LanguageDetector::new();
        assert_eq!(detector.detect("haan theek hai kya baat hai", "en"), "hi");
    }
}
