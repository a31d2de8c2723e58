//! Custom error types for the slot agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid backup selection: index {0}")]
    InvalidSelection(usize),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Another operation is already running: {0}")]
    Busy(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
