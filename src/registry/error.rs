//! Registry error types

use thiserror::Error;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No entry for the stream id
    #[error("stream not registered: {0}")]
    StreamNotFound(String),
}
