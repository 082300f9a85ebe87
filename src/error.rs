//! Domain error taxonomy for the metadata engine.
//!
//! Mirrors the original driver's exception hierarchy (`OverlapError`, `GapError`,
//! `ConstraintError`) but collapses gap/overlap into finalization diagnostics
//! returned as values (see [`crate::validator`]) rather than raised as errors -
//! they are an expected outcome of a user operation, not an exceptional one.

use thiserror::Error;

/// Errors surfaced by a [`crate::backend::MetadataBackend`] implementation.
///
/// Each variant maps onto the HTTP status the (out of scope) REST layer would
/// use: NotFound -> 404, Constraint/AlreadyFinalized -> 400/409, Backend -> 503.
#[derive(Debug, Error)]
pub enum DeuceError {
    #[error("vault {vault_id} not found in project {project_id}")]
    VaultNotFound {
        project_id: String,
        vault_id: String,
    },

    #[error("file {file_id} not found in vault {vault_id}")]
    FileNotFound { vault_id: String, file_id: String },

    #[error("block {block_id} not found in vault {vault_id}")]
    BlockNotFound { vault_id: String, block_id: String },

    /// Schema/lifecycle rule violation: deleting a non-empty vault, unregistering
    /// a referenced block, re-registering a block under a different storage id,
    /// negative sizes, etc.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Mutation attempted on a file that has already transitioned to Finalized.
    #[error("file {file_id} is already finalized")]
    AlreadyFinalized { file_id: String },

    /// Transport or store-level failure. Retryable by the caller; the engine
    /// itself never retries internally.
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, DeuceError>;

impl From<rusqlite::Error> for DeuceError {
    fn from(err: rusqlite::Error) -> Self {
        DeuceError::Backend(err.to_string())
    }
}

impl From<rocksdb::Error> for DeuceError {
    fn from(err: rocksdb::Error) -> Self {
        DeuceError::Backend(err.to_string())
    }
}
