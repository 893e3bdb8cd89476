use std::io;
use std::path::PathBuf;

/// Errors produced while reading or interpreting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file content is not valid config syntax.
    #[error("invalid config {origin} at line {line}: {message}")]
    Parse {
        origin: String,
        line: usize,
        message: String,
    },

    /// A value exists but cannot be interpreted as the requested type.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    /// The config file exists but could not be read.
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Convenience alias used throughout the config crate.
pub type Result<T> = std::result::Result<T, ConfigError>;
