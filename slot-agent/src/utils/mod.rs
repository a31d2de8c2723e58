//! Utility modules for the slot agent.

pub mod errors;
pub mod logger;

pub use errors::{AgentError, Result};
