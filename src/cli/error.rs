//! CLI error types and conversions

use crate::config::ConfigError;
use crate::error::HarvestError;
use crate::queue::QueueError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Producer or worker failure
    #[error(transparent)]
    Harvest(#[from] HarvestError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Queue could not be opened
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}
