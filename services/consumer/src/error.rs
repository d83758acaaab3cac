//! Consumer-side error type

use emberplus_network::TransportError;
use emberplus_types::EmberError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Protocol-level failure reported by the tree model or codec
    #[error(transparent)]
    Protocol(#[from] EmberError),

    /// Transport-level failure on the provider connection
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The background worker task has stopped
    #[error("consumer worker is gone")]
    WorkerGone,

    /// The provider answered, but not with the element asked for
    #[error("element not found: {0}")]
    NotFound(String),
}

pub type ConsumerResult<T> = Result<T, ConsumerError>;
