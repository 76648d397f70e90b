//! Severity keyword tagging.
//!
//! Keywords are matched as whole words, case-sensitively. Matching runs through
//! a single compiled alternation ordered longest-first so `WARNING` wins over
//! `WARN` at the same position.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Rendering category for a severity keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown severity category: {other}")),
        }
    }
}

/// Built-in keyword map.
#[must_use]
pub fn default_keywords() -> BTreeMap<String, Severity> {
    [
        ("TRACE", Severity::Trace),
        ("DEBUG", Severity::Debug),
        ("INFO", Severity::Info),
        ("WARN", Severity::Warn),
        ("WARNING", Severity::Warn),
        ("ERROR", Severity::Error),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// A keyword found in a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityMatch {
    /// Byte range of the keyword within the line.
    pub span: Range<usize>,
    pub keyword: String,
    pub category: Severity,
}

/// Compiled keyword matcher.
#[derive(Debug, Clone)]
pub struct SeverityMatcher {
    keywords: BTreeMap<String, Severity>,
    regex: Option<Regex>,
}

impl SeverityMatcher {
    /// Compile a matcher. Keywords must be uppercase words (`[A-Z][A-Z0-9_]*`).
    pub fn new(keywords: &BTreeMap<String, Severity>) -> Result<Self, ConfigError> {
        for keyword in keywords.keys() {
            if !is_valid_keyword(keyword) {
                return Err(ConfigError::InvalidKeyword(keyword.clone()));
            }
        }

        let mut ordered: Vec<&str> = keywords.keys().map(String::as_str).collect();
        ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let regex = if ordered.is_empty() {
            None
        } else {
            let alternation = ordered
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = format!(r"\b(?:{alternation})\b");
            Some(Regex::new(&pattern).map_err(|e| {
                ConfigError::ValidationError(format!("failed to compile severity matcher: {e}"))
            })?)
        };

        Ok(Self {
            keywords: keywords.clone(),
            regex,
        })
    }

    #[must_use]
    pub fn keywords(&self) -> &BTreeMap<String, Severity> {
        &self.keywords
    }

    /// All keyword matches in `line`, left to right.
    #[must_use]
    pub fn scan(&self, line: &str) -> Vec<SeverityMatch> {
        let Some(regex) = &self.regex else {
            return Vec::new();
        };

        regex
            .find_iter(line)
            .filter_map(|m| {
                self.keywords.get(m.as_str()).map(|&category| SeverityMatch {
                    span: m.range(),
                    keyword: m.as_str().to_string(),
                    category,
                })
            })
            .collect()
    }
}

impl Default for SeverityMatcher {
    fn default() -> Self {
        Self::new(&default_keywords()).expect("built-in severity keywords must compile")
    }
}

fn is_valid_keyword(keyword: &str) -> bool {
    let mut chars = keyword.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(matcher: &SeverityMatcher, line: &str) -> Vec<(Range<usize>, Severity)> {
        matcher
            .scan(line)
            .into_iter()
            .map(|m| (m.span, m.category))
            .collect()
    }

    #[test]
    fn error_prefix_is_tagged_once() {
        let matcher = SeverityMatcher::default();
        assert_eq!(
            categories(&matcher, "ERROR: disk full"),
            vec![(0..5, Severity::Error)]
        );
    }

    #[test]
    fn longest_keyword_wins() {
        let matcher = SeverityMatcher::default();
        let found = matcher.scan("WARNING low memory");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].keyword, "WARNING");
        assert_eq!(found[0].category, Severity::Warn);
    }

    #[test]
    fn whole_words_only_and_case_sensitive() {
        let matcher = SeverityMatcher::default();
        assert!(matcher.scan("ERRORS everywhere").is_empty());
        assert!(matcher.scan("error lowercase").is_empty());
        assert!(matcher.scan("MY_ERROR").is_empty());
        assert!(matcher.scan("INFORMATION").is_empty());
    }

    #[test]
    fn multiple_matches_tagged_independently() {
        let matcher = SeverityMatcher::default();
        assert_eq!(
            categories(&matcher, "[INFO] retry after ERROR (WARN)"),
            vec![
                (1..5, Severity::Info),
                (19..24, Severity::Error),
                (26..30, Severity::Warn),
            ]
        );
    }

    #[test]
    fn custom_keywords_extend_the_map() {
        let mut keywords = default_keywords();
        keywords.insert("FATAL".to_string(), Severity::Error);
        let matcher = SeverityMatcher::new(&keywords).expect("valid");
        assert_eq!(
            categories(&matcher, "FATAL crash"),
            vec![(0..5, Severity::Error)]
        );
    }

    #[test]
    fn rejects_lowercase_keywords() {
        let mut keywords = BTreeMap::new();
        keywords.insert("warn".to_string(), Severity::Warn);
        assert!(matches!(
            SeverityMatcher::new(&keywords),
            Err(ConfigError::InvalidKeyword(_))
        ));
    }

    #[test]
    fn empty_map_matches_nothing() {
        let matcher = SeverityMatcher::new(&BTreeMap::new()).expect("valid");
        assert!(matcher.scan("ERROR").is_empty());
    }

    #[test]
    fn category_parses_from_config_names() {
        assert_eq!("warning".parse::<Severity>(), Ok(Severity::Warn));
        assert_eq!("ERROR".parse::<Severity>(), Ok(Severity::Error));
        assert!("loud".parse::<Severity>().is_err());
    }
}
