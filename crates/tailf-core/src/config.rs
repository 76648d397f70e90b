//! Configuration management.
//!
//! Configuration lives in `tailf.toml`. Every section is optional; missing keys
//! take their defaults. At runtime hosts may call `configure` repeatedly with a
//! [`ConfigPatch`]: keys present in the patch override, absent keys keep their
//! previous value, and the severity keyword map merges per keyword.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::severity::{Severity, SeverityMatcher, default_keywords};
use crate::timestamps::{DEFAULT_TIMESTAMP_FORMAT, TimestampFormat, TimestampStyle};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TAILF_CONFIG";

/// Config file name looked up in the user config directory.
pub const CONFIG_FILE_NAME: &str = "tailf.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub follow: FollowConfig,
    pub timestamps: TimestampConfig,
    pub severity: SeverityConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default tracing filter (overridden by `RUST_LOG`).
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// What a disabled file-backed session does with its read offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PausedOffsetPolicy {
    /// Offset stays where it was; re-enabling delivers everything written
    /// while disabled.
    #[default]
    Hold,
    /// Offset keeps advancing to the end of file; data written while disabled
    /// is never shown.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    /// Tick interval for file-backed sessions.
    pub poll_interval_ms: u64,
    /// Maximum bytes read from a file in one tick.
    pub max_read_bytes: u64,
    pub paused_offset: PausedOffsetPolicy,
    /// Capacity of the scheduler event channel.
    pub channel_buffer: usize,
    /// Most process lines kept for a disabled session; older ones are dropped.
    pub max_held_lines: usize,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_read_bytes: 4 * 1024 * 1024,
            paused_offset: PausedOffsetPolicy::Hold,
            channel_buffer: 1024,
            max_held_lines: 10_000,
        }
    }
}

impl FollowConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// strftime format for stamps.
    pub format: String,
    /// Highlight group name carried on virtual stamps.
    pub highlight: String,
    pub style: TimestampStyle,
    /// Text between an inline stamp and the original line.
    pub separator: String,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            highlight: "Comment".to_string(),
            style: TimestampStyle::Virtual,
            separator: " ".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    /// Uppercase keyword to category.
    pub keywords: BTreeMap<String, Severity>,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
        }
    }
}

/// Partial configuration accepted by `configure`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigPatch {
    pub timestamp_format: Option<String>,
    pub timestamp_highlight: Option<String>,
    pub timestamp_style: Option<TimestampStyle>,
    pub timestamp_separator: Option<String>,
    pub severity_map: Option<BTreeMap<String, Severity>>,
    pub poll_interval_ms: Option<u64>,
    pub max_read_bytes: Option<u64>,
    pub paused_offset: Option<PausedOffsetPolicy>,
    pub max_held_lines: Option<usize>,
}

impl Config {
    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the resolved default location, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = resolve_config_path(path) else {
            tracing::debug!("No config file found, using defaults");
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(&path).map_err(|e| {
            ConfigError::ReadFailed(path.display().to_string(), e.to_string())
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))?)
    }

    /// Check every field that can fail at use time.
    pub fn validate(&self) -> Result<()> {
        TimestampFormat::new(&self.timestamps.format)?;
        SeverityMatcher::new(&self.severity.keywords)?;
        if self.follow.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "follow.poll_interval_ms must be greater than zero".to_string(),
            )
            .into());
        }
        if self.follow.max_read_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "follow.max_read_bytes must be greater than zero".to_string(),
            )
            .into());
        }
        if self.follow.channel_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "follow.channel_buffer must be greater than zero".to_string(),
            )
            .into());
        }
        if self.follow.max_held_lines == 0 {
            return Err(ConfigError::ValidationError(
                "follow.max_held_lines must be greater than zero".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Return a copy with `patch` applied, validated. `self` is untouched on error.
    pub fn merged(&self, patch: &ConfigPatch) -> Result<Self> {
        let mut next = self.clone();
        if let Some(format) = &patch.timestamp_format {
            next.timestamps.format.clone_from(format);
        }
        if let Some(highlight) = &patch.timestamp_highlight {
            next.timestamps.highlight.clone_from(highlight);
        }
        if let Some(style) = patch.timestamp_style {
            next.timestamps.style = style;
        }
        if let Some(separator) = &patch.timestamp_separator {
            next.timestamps.separator.clone_from(separator);
        }
        if let Some(map) = &patch.severity_map {
            for (keyword, category) in map {
                next.severity.keywords.insert(keyword.clone(), *category);
            }
        }
        if let Some(ms) = patch.poll_interval_ms {
            next.follow.poll_interval_ms = ms;
        }
        if let Some(bytes) = patch.max_read_bytes {
            next.follow.max_read_bytes = bytes;
        }
        if let Some(policy) = patch.paused_offset {
            next.follow.paused_offset = policy;
        }
        if let Some(lines) = patch.max_held_lines {
            next.follow.max_held_lines = lines;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Resolve the config file path: explicit path, then `TAILF_CONFIG`, then the
/// user config directory. Only existing files are returned for the implicit
/// locations; an explicit path is returned as-is so a typo surfaces as an error.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        if !env_path.trim().is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join("tailf").join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.follow.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.follow.paused_offset, PausedOffsetPolicy::Hold);
        assert_eq!(config.severity.keywords.len(), 6);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [timestamps]
            format = "%H:%M:%S"

            [severity.keywords]
            FATAL = "error"
            "#,
        )
        .expect("parse");

        assert_eq!(config.timestamps.format, "%H:%M:%S");
        assert_eq!(config.timestamps.highlight, "Comment");
        // A [severity.keywords] table replaces the default map wholesale.
        assert_eq!(config.severity.keywords.len(), 1);
        assert_eq!(config.follow.poll_interval_ms, 1000);
    }

    #[test]
    fn invalid_format_in_file_is_rejected() {
        let err = Config::from_toml_str("[timestamps]\nformat = \"%Q\"\n").unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidTimestampFormat { .. })
        ));
    }

    #[test]
    fn patch_merges_and_retains_unspecified_keys() {
        let base = Config::default();
        let first = base
            .merged(&ConfigPatch {
                timestamp_format: Some("%H:%M".to_string()),
                severity_map: Some(BTreeMap::from([("FATAL".to_string(), Severity::Error)])),
                ..ConfigPatch::default()
            })
            .expect("merge");
        let second = first
            .merged(&ConfigPatch {
                timestamp_highlight: Some("Special".to_string()),
                severity_map: Some(BTreeMap::from([("INFO".to_string(), Severity::Debug)])),
                ..ConfigPatch::default()
            })
            .expect("merge");

        assert_eq!(second.timestamps.format, "%H:%M");
        assert_eq!(second.timestamps.highlight, "Special");
        assert_eq!(second.severity.keywords["FATAL"], Severity::Error);
        assert_eq!(second.severity.keywords["INFO"], Severity::Debug);
        assert_eq!(second.severity.keywords["ERROR"], Severity::Error);
    }

    #[test]
    fn failed_patch_leaves_config_untouched() {
        let base = Config::default();
        let result = base.merged(&ConfigPatch {
            poll_interval_ms: Some(0),
            ..ConfigPatch::default()
        });
        assert!(result.is_err());
        assert_eq!(base, Config::default());
    }

    #[test]
    fn held_line_cap_must_be_positive() {
        let config = Config::from_toml_str("[follow]\nmax_held_lines = 50\n").expect("parse");
        assert_eq!(config.follow.max_held_lines, 50);
        assert!(Config::from_toml_str("[follow]\nmax_held_lines = 0\n").is_err());
        assert!(
            config
                .merged(&ConfigPatch {
                    max_held_lines: Some(0),
                    ..ConfigPatch::default()
                })
                .is_err()
        );
    }

    #[test]
    fn toml_round_trip_preserves_config() {
        let config = Config::default();
        let text = config.to_toml_string().expect("serialize");
        assert_eq!(Config::from_toml_str(&text).expect("parse"), config);
    }

    #[test]
    fn explicit_path_wins_and_missing_file_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        assert_eq!(resolve_config_path(Some(&missing)), Some(missing.clone()));
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(Error::Config(ConfigError::ReadFailed(..)))
        ));

        let present = dir.path().join("tailf.toml");
        std::fs::write(&present, "[follow]\npoll_interval_ms = 250\n").expect("write");
        let config = Config::load(Some(&present)).expect("load");
        assert_eq!(config.follow.poll_interval_ms, 250);
    }

    #[test]
    fn patch_deserializes_from_toml_table() {
        let patch: ConfigPatch =
            toml::from_str("timestamp_format = \"%T\"\ntimestamp_style = \"inline\"\n")
                .expect("parse");
        assert_eq!(patch.timestamp_format.as_deref(), Some("%T"));
        assert_eq!(patch.timestamp_style, Some(TimestampStyle::Inline));
        assert!(toml::from_str::<ConfigPatch>("bogus = 1").is_err());
    }
}
