//! Error types shared across the bronze workspace

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BronzeError>;

/// Startup-time failures found before any table is touched
#[derive(Error, Debug)]
pub enum BronzeError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid manifest: {0}")]
    Manifest(String),
}

impl BronzeError {
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest(message.into())
    }
}
