use std::collections::HashSet;
use std::path::Path;

use anyhow::anyhow;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::{JourneyError, Result};

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Extract a first name from a free-text reply.
    ///
    /// Takes the first whitespace-separated token and capitalizes it. Returns
    /// `None` when the token has no alphabetic character (emoji, digits) or is
    /// unreasonably long.
    #[must_use]
    pub fn extract_first_name(text: &str) -> Option<String> {
        let cleaned = Self::sanitize_text(text);
        let token = cleaned.split_whitespace().next()?;

        if token.chars().count() > 100 || !token.chars().any(char::is_alphabetic) {
            return None;
        }

        let mut chars = token.chars();
        let first = chars.next()?;
        Some(first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect())
    }

    /// Validate phone number format
    pub fn validate_phone(phone: &str) -> anyhow::Result<()> {
        if phone.trim().is_empty() {
            return Err(anyhow!("Phone number cannot be empty"));
        }

        // Remove common formatting characters
        let cleaned = phone
            .chars()
            .filter(|c| {
                c.is_ascii_digit() || *c == '+' || *c == '-' || *c == '(' || *c == ')' || *c == ' '
            })
            .collect::<String>();

        let digits_only = cleaned.chars().filter(char::is_ascii_digit).count();

        if !(7..=15).contains(&digits_only) {
            return Err(anyhow!("Phone number must be between 7 and 15 digits"));
        }

        Ok(())
    }

    /// Digits of a phone number, for matching numbers written differently.
    #[must_use]
    pub fn normalize_phone(phone: &str) -> String {
        phone.chars().filter(char::is_ascii_digit).collect()
    }

    /// Validate a file path given on the command line
    pub fn validate_file_path(path: &Path) -> anyhow::Result<()> {
        let path_str = path.to_string_lossy();
        if path_str.is_empty() {
            return Err(anyhow!("File path cannot be empty"));
        }

        if path_str.contains("..") || path_str.contains('~') {
            return Err(anyhow!("File path contains potentially dangerous characters"));
        }

        if path_str.len() > 4096 {
            return Err(anyhow!("File path too long (max 4096 characters)"));
        }

        Ok(())
    }

    /// Sanitize text input
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
            .collect::<String>()
            .trim()
            .to_string()
    }
}

/// Token-matching table for inbound text.
///
/// Every comparison goes through [`InputGrammar::normalize`], so matching is
/// insensitive to case, surrounding whitespace and emoji skin-tone variants.
#[derive(Debug, Clone)]
pub struct InputGrammar {
    trigger_phrase: String,
    thumbs_up: HashSet<String>,
    rebook: HashSet<String>,
    modifier_regex: Regex,
    spaces_regex: Regex,
}

impl InputGrammar {
    /// Build the grammar from configured phrases and tokens.
    pub fn new<S: AsRef<str>>(trigger_phrase: &str, thumbs_up: &[S], rebook: &[S]) -> Result<Self> {
        let modifier_regex = Regex::new(r"[\x{1F3FB}-\x{1F3FF}\x{FE0E}\x{FE0F}\x{200D}]")
            .map_err(|e| JourneyError::InvalidConfig(format!("Failed to compile modifier regex: {e}")))?;
        let spaces_regex = Regex::new(r"\s+")
            .map_err(|e| JourneyError::InvalidConfig(format!("Failed to compile spaces regex: {e}")))?;

        let mut grammar = Self {
            trigger_phrase: trigger_phrase.trim().to_lowercase(),
            thumbs_up: HashSet::new(),
            rebook: HashSet::new(),
            modifier_regex,
            spaces_regex,
        };
        grammar.thumbs_up = thumbs_up.iter().map(|t| grammar.normalize(t.as_ref())).collect();
        grammar.rebook = rebook.iter().map(|t| grammar.normalize(t.as_ref())).collect();

        if grammar.trigger_phrase.is_empty() {
            return Err(JourneyError::InvalidConfig("trigger phrase cannot be empty".to_string()));
        }

        Ok(grammar)
    }

    /// NFC, emoji modifiers stripped, whitespace collapsed, trimmed, uppercased.
    #[must_use]
    pub fn normalize(&self, text: &str) -> String {
        let composed = text.nfc().collect::<String>();
        let stripped = self.modifier_regex.replace_all(&composed, "");
        self.spaces_regex.replace_all(&stripped, " ").trim().to_uppercase()
    }

    /// The input as a single-character code, if it is exactly one character.
    #[must_use]
    pub fn single_code(&self, text: &str) -> Option<char> {
        let normalized = self.normalize(text);
        let mut chars = normalized.chars();
        match (chars.next(), chars.next()) {
            (Some(code), None) => Some(code),
            _ => None,
        }
    }

    /// The input as a two-character compound code (inner spaces ignored).
    #[must_use]
    pub fn compound_code(&self, text: &str) -> Option<String> {
        let code: String = self.normalize(text).chars().filter(|c| !c.is_whitespace()).collect();
        (code.chars().count() == 2).then_some(code)
    }

    /// First message carries the website trigger phrase.
    #[must_use]
    pub fn is_website_trigger(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.trigger_phrase)
    }

    /// Message is a thumbs-up confirmation.
    #[must_use]
    pub fn is_thumbs_up(&self, text: &str) -> bool {
        self.thumbs_up.contains(&self.normalize(text))
    }

    /// Message asks to change an existing booking.
    #[must_use]
    pub fn is_rebook_request(&self, text: &str) -> bool {
        self.rebook.contains(&self.normalize(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> InputGrammar {
        InputGrammar::new("free Zoom preview link", &["👍", "YES", "OK"], &["CHANGE", "REBOOK"]).unwrap()
    }

    #[test]
    fn test_skin_tone_thumbs_up_matches() {
        let grammar = grammar();
        assert!(grammar.is_thumbs_up("👍🏽"));
        assert!(grammar.is_thumbs_up(" 👍 "));
        assert!(grammar.is_thumbs_up("ok"));
        assert!(!grammar.is_thumbs_up("okay then"));
    }

    #[test]
    fn test_single_code_requires_exactly_one_char() {
        let grammar = grammar();
        assert_eq!(grammar.single_code(" s "), Some('S'));
        assert_eq!(grammar.single_code("SS"), None);
        assert_eq!(grammar.single_code(""), None);
    }

    #[test]
    fn test_empty_trigger_phrase_is_rejected() {
        assert!(InputGrammar::new("  ", &["OK"], &["CHANGE"]).is_err());
    }
}
