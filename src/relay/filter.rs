//! Content filtering with regex patterns.
//!
//! A message whose text matches any configured pattern is not relayed, in
//! either direction. Matching runs on the raw wire text, before translation.

use fancy_regex::Regex;
use tracing::warn;

use crate::config::types::FiltersConfig;

/// Drops messages matching any of a set of regex patterns.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    patterns: Vec<CompiledPattern>,
}

/// A compiled regex pattern with its original string for debugging.
#[derive(Debug, Clone)]
struct CompiledPattern {
    original: String,
    regex: Regex,
}

impl MessageFilter {
    /// Compile the configured patterns. Invalid patterns are logged and skipped.
    pub fn new(config: Option<&FiltersConfig>) -> Self {
        let patterns = match config {
            Some(config) if config.enabled => compile_patterns(&config.patterns),
            _ => Vec::new(),
        };
        Self { patterns }
    }

    /// Returns `true` if `text` matches a pattern and must not be relayed.
    pub fn should_filter(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| {
            p.regex.is_match(text).unwrap_or_else(|e| {
                warn!("Regex match error for pattern '{}': {}", p.original, e);
                false
            })
        })
    }

    pub fn has_patterns(&self) -> bool {
        !self.patterns.is_empty()
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<CompiledPattern> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(CompiledPattern {
                original: pattern.clone(),
                regex,
            }),
            Err(e) => {
                warn!("Invalid filter regex pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(patterns: &[&str]) -> MessageFilter {
        MessageFilter::new(Some(&FiltersConfig {
            enabled: true,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }))
    }

    #[test]
    fn test_no_config_allows_all() {
        let filter = MessageFilter::new(None);
        assert!(!filter.has_patterns());
        assert!(!filter.should_filter("any message"));
    }

    #[test]
    fn test_disabled_filter_allows_all() {
        let filter = MessageFilter::new(Some(&FiltersConfig {
            enabled: false,
            patterns: vec!["spam".into()],
        }));
        assert!(!filter.should_filter("spam"));
    }

    #[test]
    fn test_partial_match_filter() {
        let filter = filter(&["crypto.*giveaway"]);
        assert!(filter.should_filter("Huge crypto giveaway today!"));
        assert!(!filter.should_filter("crypto news"));
    }

    #[test]
    fn test_invalid_regex_skipped() {
        let filter = filter(&["[invalid", "valid"]);
        assert!(filter.has_patterns());
        assert!(filter.should_filter("valid pattern"));
    }

    #[test]
    fn test_case_insensitive_lookahead() {
        let filter = filter(&["(?i)^(?!.*#keep).*promo"]);
        assert!(filter.should_filter("PROMO code inside"));
        assert!(!filter.should_filter("promo but #keep"));
    }
}
