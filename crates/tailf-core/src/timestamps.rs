//! Timestamp formats and stamp recognition.
//!
//! A [`TimestampFormat`] pairs a strftime string with a regex that recognizes
//! text it produced at the start of a line. The regex is what keeps stamping
//! idempotent: a line that already begins with something shaped like a stamp
//! is never stamped again.

use std::fmt;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default stamp format.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where stamps are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampStyle {
    /// Side annotation; the content itself is never modified.
    #[default]
    Virtual,
    /// Written into the line as `<stamp><separator><line>`.
    Inline,
}

impl fmt::Display for TimestampStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virtual => write!(f, "virtual"),
            Self::Inline => write!(f, "inline"),
        }
    }
}

/// Source of the current time.
pub trait Clock: Send {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Wall clock in the local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// A validated strftime format plus its recognizer.
#[derive(Debug, Clone)]
pub struct TimestampFormat {
    format: String,
    pattern: Regex,
}

impl TimestampFormat {
    /// Validate `format` and derive the anchored recognizer for it.
    pub fn new(format: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTimestampFormat {
            format: format.to_string(),
            reason,
        };

        if format.is_empty() {
            return Err(invalid("format is empty".to_string()));
        }
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(invalid("not a valid strftime format".to_string()));
        }

        let body = strftime_to_regex(format).map_err(invalid)?;
        let pattern = Regex::new(&format!("^{body}"))
            .map_err(|e| invalid(format!("recognizer failed to compile: {e}")))?;

        Ok(Self {
            format: format.to_string(),
            pattern,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.format
    }

    /// Render a stamp for `at`.
    #[must_use]
    pub fn render(&self, at: &DateTime<FixedOffset>) -> String {
        at.format(&self.format).to_string()
    }

    /// Whether `line` already starts with a stamp in this format.
    #[must_use]
    pub fn is_stamped(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_FORMAT).expect("default timestamp format must be valid")
    }
}

/// Translate a strftime string into a regex body matching its output.
fn strftime_to_regex(format: &str) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
            continue;
        }

        // Padding modifiers: %-d (none), %_d (space), %0d (zero).
        let pad = match chars.peek() {
            Some(&p @ ('-' | '_' | '0')) => {
                chars.next();
                Some(p)
            }
            _ => None,
        };

        let Some(spec) = chars.next() else {
            return Err("dangling '%' at end of format".to_string());
        };

        let two_digits = match pad {
            Some('-') => r"\d{1,2}",
            Some('_') => r"[ \d]\d",
            _ => r"\d{2}",
        };

        let piece: String = match spec {
            'Y' | 'G' => r"[+-]?\d{4}".to_string(),
            'C' | 'y' | 'm' | 'd' | 'H' | 'I' | 'M' | 'S' | 'U' | 'W' | 'V' | 'g' => {
                two_digits.to_string()
            }
            'e' | 'k' | 'l' => r"[ \d]?\d".to_string(),
            'j' => r"\d{3}".to_string(),
            'u' | 'w' => r"\d".to_string(),
            's' => r"-?\d+".to_string(),
            'b' | 'h' | 'a' => "[A-Z][a-z]{2}".to_string(),
            'B' | 'A' => "[A-Z][a-z]+".to_string(),
            'p' => "(?:AM|PM)".to_string(),
            'P' => "(?:am|pm)".to_string(),
            'f' => r"\d+".to_string(),
            '3' | '6' | '9' => {
                if chars.next() != Some('f') {
                    return Err(format!("unsupported specifier %{spec}"));
                }
                format!(r"\d{{{spec}}}")
            }
            '.' => {
                // %.f, %.3f, %.6f, %.9f
                match chars.next() {
                    Some('f') => r"\.\d+".to_string(),
                    Some(n @ ('3' | '6' | '9')) if chars.next() == Some('f') => {
                        format!(r"\.\d{{{n}}}")
                    }
                    _ => return Err("unsupported fractional specifier".to_string()),
                }
            }
            'z' => r"[+-]\d{4}".to_string(),
            ':' => {
                if chars.next() != Some('z') {
                    return Err("unsupported specifier after %:".to_string());
                }
                r"[+-]\d{2}:\d{2}".to_string()
            }
            'Z' => r"\S+".to_string(),
            'F' => r"[+-]?\d{4}-\d{2}-\d{2}".to_string(),
            'T' | 'X' => r"\d{2}:\d{2}:\d{2}".to_string(),
            'R' => r"\d{2}:\d{2}".to_string(),
            'D' | 'x' => r"\d{2}/\d{2}/\d{2}".to_string(),
            'r' => r"\d{2}:\d{2}:\d{2} (?:AM|PM)".to_string(),
            'c' => r"[A-Z][a-z]{2} [A-Z][a-z]{2} [ \d]\d \d{2}:\d{2}:\d{2} \d{4}".to_string(),
            '+' => r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:[+-]\d{2}:\d{2}|Z)".to_string(),
            'n' => r"\n".to_string(),
            't' => r"\t".to_string(),
            '%' => "%".to_string(),
            other => return Err(format!("unsupported specifier %{other}")),
        };
        out.push_str(&piece);
    }

    Ok(out)
}
