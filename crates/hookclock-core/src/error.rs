use thiserror::Error;

/// Errors raised while loading configuration or trigger definitions.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A trigger definition is malformed (duplicate name, empty schedule, ...).
    #[error("Invalid trigger '{name}': {reason}")]
    InvalidTrigger { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
