use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Failed to read config file: {0}")]
    ReadFailed(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
}
