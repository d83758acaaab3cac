//! Protocol-level error taxonomy shared across the workspace
//!
//! Every crate that touches the Ember+ tree reports failures through this
//! enum so that service boundaries (dispatcher, orchestrator) can match on
//! specific conditions instead of string-typed errors.

use thiserror::Error;

/// Errors raised by the tree model, codec and engines
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmberError {
    /// Decoder met a BER application tag it has no grammar for
    #[error("Unimplemented BER type: tag 0x{tag:02x}")]
    UnimplementedType { tag: u8 },

    /// A decoded element is structurally valid BER but semantic nonsense
    #[error("Invalid ember node: {0}")]
    InvalidEmberNode(String),

    /// Request tree is missing a field the operation requires
    #[error("Invalid request format: {0}")]
    InvalidRequestFormat(String),

    /// Path does not exist in the authoritative tree
    #[error("Unknown element at path {path}")]
    UnknownElement { path: String },

    /// Matrix connect/disconnect names a signal outside the matrix topology
    #[error("Invalid matrix signal {signal}: {reason}")]
    InvalidMatrixSignal { signal: i64, reason: String },

    /// Connection sources field is absent or not a number list
    #[error("Invalid sources format")]
    InvalidSourcesFormat,

    /// Client request outlived its timer
    #[error("Ember request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Path walk missed the same segment twice in a row
    #[error("Path discovery failed at {path}")]
    PathDiscoveryFailure { path: String },

    /// Operation applied to the wrong element kind
    #[error("Access error at {path}: expected {expected}")]
    AccessError { path: String, expected: &'static str },

    /// BER primitive layer failure (truncation, bad length, bad tag)
    #[error("BER error at offset {offset}: {reason}")]
    Ber { offset: usize, reason: String },
}

/// Convenience alias used throughout the workspace
pub type EmberResult<T> = Result<T, EmberError>;
