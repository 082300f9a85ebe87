//! The contract every storage driver implements.
//!
//! `MetadataBackend` is the single seam the rest of the engine depends on:
//! request handlers (out of scope here) hold an `Arc<dyn MetadataBackend>`
//! and never know whether it's backed by an embedded relational store or a
//! wide-column store. Both [`local`] and [`distributed`] implement it
//! identically from the caller's point of view.

pub mod distributed;
pub mod local;

use crate::error::Result;
use crate::ids::{BlockId, FileId, ProjectId, StorageId, VaultId};
use crate::validator::FinalizeCheck;
use async_trait::async_trait;

/// Aggregate counts for a vault, used by operator-facing summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VaultStatistics {
    pub file_count: u64,
    pub block_count: u64,
    pub total_size: u64,
}

/// Result of [`MetadataBackend::health`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Degraded { reason: String },
}

/// One page of a listing, paired with the marker for the next page (`None`
/// once the listing is exhausted).
pub type Page<T> = (Vec<T>, Option<String>);

/// The pluggable contract implemented by both the local and distributed
/// backends. Every operation is scoped by `(project_id, vault_id)` unless
/// stated otherwise, and returns the domain error taxonomy in
/// [`crate::error::DeuceError`] rather than an opaque failure.
#[async_trait]
pub trait MetadataBackend: Send + Sync {
    // -- Vault operations ---------------------------------------------

    /// Lists vault ids in lexicographic order. `marker` is an exclusive
    /// lower bound; `limit` is capped at the configured `max_return_num`.
    async fn list_vaults(
        &self,
        project_id: &ProjectId,
        marker: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<VaultId>>;

    /// Idempotent: creating an existing vault is a no-op success.
    async fn create_vault(&self, project_id: &ProjectId, vault_id: &VaultId) -> Result<()>;

    /// Fails with a constraint error if the vault still has files or blocks.
    async fn delete_vault(&self, project_id: &ProjectId, vault_id: &VaultId) -> Result<()>;

    async fn vault_statistics(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
    ) -> Result<VaultStatistics>;

    // -- File operations ------------------------------------------------

    /// Allocates a fresh server-assigned file id; the file starts Open.
    async fn create_file(&self, project_id: &ProjectId, vault_id: &VaultId) -> Result<FileId>;

    async fn has_file(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
    ) -> Result<bool>;

    async fn is_finalized(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
    ) -> Result<bool>;

    /// Sum of sizes of assigned, registered blocks.
    async fn file_length(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
    ) -> Result<u64>;

    /// Idempotent. Decrements the refcount of every assigned block.
    async fn delete_file(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
    ) -> Result<()>;

    async fn list_files(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        marker: Option<&str>,
        limit: Option<u32>,
        finalized: bool,
    ) -> Result<Page<FileId>>;

    /// Inserts or replaces the assignment at `offset`. Fails
    /// `AlreadyFinalized` if the file is finalized. Replacement decrements
    /// the old block's refcount and increments the new one's.
    async fn assign_block(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
        block_id: &BlockId,
        offset: i64,
    ) -> Result<()>;

    /// Runs the finalization validator against the file's assignments. On
    /// `Ok`, atomically transitions the file to Finalized in the same
    /// transaction/batch as the validating read.
    async fn finalize_file(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
        file_size: Option<i64>,
    ) -> Result<FinalizeCheck>;

    /// Ordered by `offset` ascending; `offset_marker` is an inclusive lower
    /// bound.
    async fn list_file_blocks(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
        offset_marker: Option<i64>,
        limit: Option<u32>,
    ) -> Result<(Vec<(BlockId, i64)>, Option<i64>)>;

    // -- Block operations -------------------------------------------------

    /// Idempotent replace on `(vault, block_id)`. Rejects re-registration
    /// with a differing `storage_id` as a constraint error.
    async fn register_block(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
        storage_id: &StorageId,
        size: i64,
    ) -> Result<()>;

    async fn has_block(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<bool>;

    async fn get_block_size(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<Option<i64>>;

    async fn get_block_storage_id(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<Option<StorageId>>;

    /// Inverse of `get_block_storage_id`; the two form a bijection within
    /// `(project, vault)`.
    async fn get_block_metadata_id(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        storage_id: &StorageId,
    ) -> Result<Option<BlockId>>;

    /// Fails `Constraint` unless `refcount == 0`.
    async fn unregister_block(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<()>;

    async fn list_blocks(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        marker: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<BlockId>>;

    /// `None` if the block is unregistered.
    async fn block_ref_count(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<Option<u64>>;

    /// Unix seconds of the last refcount change, or the block's own
    /// registration time if no assignment has ever touched it.
    async fn block_ref_modified(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<Option<i64>>;

    // -- Health -----------------------------------------------------------

    async fn health(&self) -> Result<HealthStatus>;
}
