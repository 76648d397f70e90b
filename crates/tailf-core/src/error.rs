//! Error types for tailf-core.

use std::io;

use thiserror::Error;

use crate::surface::SurfaceId;

/// Top-level error for engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A source binding failed in a way the session cannot recover from.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Operation addressed a surface the registry does not know.
    #[error("unknown surface: {0}")]
    UnknownSurface(SurfaceId),

    /// I/O error outside of a source binding.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config {0}: {1}")]
    ReadFailed(String, String),

    /// Config file is not valid TOML or has the wrong shape.
    #[error("failed to parse config: {0}")]
    ParseFailed(String),

    /// Config could not be serialized back to TOML.
    #[error("failed to serialize config: {0}")]
    SerializeFailed(String),

    /// The strftime string contains an unsupported or malformed specifier.
    #[error("invalid timestamp format {format:?}: {reason}")]
    InvalidTimestampFormat { format: String, reason: String },

    /// Severity keywords must be non-empty uppercase words.
    #[error("invalid severity keyword {0:?}: keywords must be uppercase words")]
    InvalidKeyword(String),

    /// Any other semantic validation failure.
    #[error("invalid config: {0}")]
    ValidationError(String),
}

/// Errors raised while supervising a source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The child process could not be started.
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The command line was empty.
    #[error("no command given")]
    EmptyCommand,

    /// Reading from a file or pipe failed.
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for tailf-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_wraps_into_error() {
        let err: Error = ConfigError::InvalidKeyword("warn".to_string()).into();
        assert!(matches!(err, Error::Config(ConfigError::InvalidKeyword(_))));
        assert!(err.to_string().contains("\"warn\""));
    }

    #[test]
    fn spawn_error_names_the_command() {
        let err = SourceError::Spawn {
            command: "no-such-binary".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("no-such-binary"));
    }
}
