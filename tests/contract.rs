//! Contract tests: every scenario here runs against both the local and the
//! distributed backend, because `spec.md` requires both to satisfy the
//! `MetadataBackend` interface identically from a caller's point of view.
//! Backend-specific tests (schema details, refcount storage strategy) live
//! next to each backend's own module instead.

use deuce::backend::distributed::DistributedBackend;
use deuce::backend::local::LocalBackend;
use deuce::backend::MetadataBackend;
use deuce::validator::Diagnostic;
use deuce::{BlockId, DeuceError, FinalizeCheck, ProjectId, StorageId, VaultId};
use std::future::Future;
use std::sync::Arc;
use tempfile::TempDir;

fn ids() -> (ProjectId, VaultId) {
    (ProjectId::from("contract-project"), VaultId::from("contract-vault"))
}

/// Runs `f` once against a fresh in-memory local backend and once against a
/// fresh on-disk distributed backend.
async fn run_on_all<F, Fut>(f: F)
where
    F: Fn(Arc<dyn MetadataBackend>) -> Fut,
    Fut: Future<Output = ()>,
{
    let local: Arc<dyn MetadataBackend> = Arc::new(LocalBackend::open_in_memory(80).unwrap());
    f(local).await;

    let dir = TempDir::new().expect("tempdir");
    let distributed: Arc<dyn MetadataBackend> =
        Arc::new(DistributedBackend::open(dir.path().join("deuce"), 80).unwrap());
    f(distributed).await;
}

#[tokio::test]
async fn e1_empty_file_finalizes_with_no_declared_size() {
    run_on_all(|backend| async move {
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let file_id = backend.create_file(&p, &v).await.unwrap();

        let check = backend.finalize_file(&p, &v, &file_id, None).await.unwrap();
        assert_eq!(check, FinalizeCheck::Ok);
        assert!(backend.is_finalized(&p, &v, &file_id).await.unwrap());
    })
    .await;
}

#[tokio::test]
async fn e3_gap_blocks_finalization_and_reports_diagnostics() {
    run_on_all(|backend| async move {
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let file_id = backend.create_file(&p, &v).await.unwrap();

        for (name, offset) in [("b1", 0), ("b2", 100), ("b3", 300)] {
            let block_id = BlockId::from(name);
            backend
                .register_block(&p, &v, &block_id, &StorageId::from(name), 100)
                .await
                .unwrap();
            backend.assign_block(&p, &v, &file_id, &block_id, offset).await.unwrap();
        }

        let check = backend.finalize_file(&p, &v, &file_id, Some(400)).await.unwrap();
        match check {
            FinalizeCheck::Diagnostics(diags) => {
                assert_eq!(diags.len(), 1);
                assert!(matches!(diags[0], Diagnostic::Gap { .. }));
            }
            FinalizeCheck::Ok => panic!("expected a gap diagnostic"),
        }
        assert!(!backend.is_finalized(&p, &v, &file_id).await.unwrap());
    })
    .await;
}

#[tokio::test]
async fn e4_overlap_blocks_finalization_and_reports_diagnostics() {
    run_on_all(|backend| async move {
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let file_id = backend.create_file(&p, &v).await.unwrap();

        for (name, offset, size) in [("b1", 0, 50), ("b2", 50, 100), ("b3", 150, 100)] {
            let block_id = BlockId::from(name);
            backend
                .register_block(&p, &v, &block_id, &StorageId::from(name), size)
                .await
                .unwrap();
            backend.assign_block(&p, &v, &file_id, &block_id, offset).await.unwrap();
        }

        let check = backend.finalize_file(&p, &v, &file_id, None).await.unwrap();
        match check {
            FinalizeCheck::Diagnostics(diags) => {
                assert_eq!(diags.len(), 1);
                assert!(matches!(diags[0], Diagnostic::Overlap { .. }));
            }
            FinalizeCheck::Ok => panic!("expected an overlap diagnostic"),
        }
        assert!(!backend.is_finalized(&p, &v, &file_id).await.unwrap());
    })
    .await;
}

#[tokio::test]
async fn e5_finalize_rejects_unregistered_blocks_until_registered() {
    run_on_all(|backend| async move {
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let file_id = backend.create_file(&p, &v).await.unwrap();

        let b1 = BlockId::from("b1");
        let b2 = BlockId::from("b2");
        let bx = BlockId::from("bx");
        backend.register_block(&p, &v, &b1, &StorageId::from("s1"), 50).await.unwrap();
        backend.register_block(&p, &v, &b2, &StorageId::from("s2"), 50).await.unwrap();

        backend.assign_block(&p, &v, &file_id, &b1, 0).await.unwrap();
        backend.assign_block(&p, &v, &file_id, &b2, 50).await.unwrap();
        backend.assign_block(&p, &v, &file_id, &bx, 100).await.unwrap();

        assert!(!backend.has_block(&p, &v, &bx).await.unwrap());
        let err = backend.finalize_file(&p, &v, &file_id, None).await.unwrap_err();
        assert!(matches!(err, DeuceError::Constraint(_)));
        assert!(!backend.is_finalized(&p, &v, &file_id).await.unwrap());

        backend.register_block(&p, &v, &bx, &StorageId::from("sx"), 50).await.unwrap();
        let check = backend.finalize_file(&p, &v, &file_id, Some(150)).await.unwrap();
        assert_eq!(check, FinalizeCheck::Ok);
    })
    .await;
}

#[tokio::test]
async fn e7_refcount_lifecycle_across_two_files() {
    run_on_all(|backend| async move {
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let f1 = backend.create_file(&p, &v).await.unwrap();
        let f2 = backend.create_file(&p, &v).await.unwrap();
        let b1 = BlockId::from("b1");
        backend.register_block(&p, &v, &b1, &StorageId::from("s1"), 10).await.unwrap();

        backend.assign_block(&p, &v, &f1, &b1, 0).await.unwrap();
        backend.assign_block(&p, &v, &f2, &b1, 0).await.unwrap();
        assert_eq!(backend.block_ref_count(&p, &v, &b1).await.unwrap(), Some(2));

        backend.delete_file(&p, &v, &f1).await.unwrap();
        assert_eq!(backend.block_ref_count(&p, &v, &b1).await.unwrap(), Some(1));
        assert!(backend.unregister_block(&p, &v, &b1).await.is_err());

        backend.delete_file(&p, &v, &f2).await.unwrap();
        assert_eq!(backend.block_ref_count(&p, &v, &b1).await.unwrap(), Some(0));
        backend.unregister_block(&p, &v, &b1).await.unwrap();
        assert!(!backend.has_block(&p, &v, &b1).await.unwrap());
    })
    .await;
}

#[tokio::test]
async fn create_vault_is_idempotent_and_assign_replacement_moves_refcount() {
    run_on_all(|backend| async move {
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        backend.create_vault(&p, &v).await.unwrap();
        let (vaults, marker) = backend.list_vaults(&p, None, None).await.unwrap();
        assert_eq!(vaults, vec![v.clone()]);
        assert_eq!(marker, None);

        let file_id = backend.create_file(&p, &v).await.unwrap();
        let b1 = BlockId::from("b1");
        let b2 = BlockId::from("b2");
        backend.register_block(&p, &v, &b1, &StorageId::from("s1"), 10).await.unwrap();
        backend.register_block(&p, &v, &b2, &StorageId::from("s2"), 10).await.unwrap();

        backend.assign_block(&p, &v, &file_id, &b1, 0).await.unwrap();
        backend.assign_block(&p, &v, &file_id, &b1, 0).await.unwrap();
        assert_eq!(backend.block_ref_count(&p, &v, &b1).await.unwrap(), Some(1));

        backend.assign_block(&p, &v, &file_id, &b2, 0).await.unwrap();
        assert_eq!(backend.block_ref_count(&p, &v, &b1).await.unwrap(), Some(0));
        assert_eq!(backend.block_ref_count(&p, &v, &b2).await.unwrap(), Some(1));
    })
    .await;
}

#[tokio::test]
async fn storage_id_and_block_id_form_a_bijection() {
    run_on_all(|backend| async move {
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let block_id = BlockId::from("b1");
        let storage_id = StorageId::from("object-store-key-1");
        backend.register_block(&p, &v, &block_id, &storage_id, 42).await.unwrap();

        assert_eq!(
            backend.get_block_storage_id(&p, &v, &block_id).await.unwrap(),
            Some(storage_id.clone())
        );
        assert_eq!(
            backend.get_block_metadata_id(&p, &v, &storage_id).await.unwrap(),
            Some(block_id)
        );
    })
    .await;
}

#[tokio::test]
async fn delete_non_empty_vault_is_a_constraint_error() {
    run_on_all(|backend| async move {
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        backend.create_file(&p, &v).await.unwrap();

        let err = backend.delete_vault(&p, &v).await.unwrap_err();
        assert!(matches!(err, DeuceError::Constraint(_)));
    })
    .await;
}

#[tokio::test]
async fn e8_listing_pagination_covers_every_created_id_exactly_once() {
    run_on_all(|backend| async move {
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        for _ in 0..120 {
            backend.create_file(&p, &v).await.unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut marker: Option<String> = None;
        loop {
            let (page, next) = backend
                .list_files(&p, &v, marker.as_deref(), None, false)
                .await
                .unwrap();
            assert!(!page.is_empty() || next.is_none());
            for id in page {
                assert!(seen.insert(id.to_string()), "id returned twice across pages");
            }
            match next {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }
        assert_eq!(seen.len(), 120);
    })
    .await;
}
