//! Deuce: a multi-tenant, content-addressed block storage metadata engine.
//!
//! Clients break large files into variable-size blocks identified by their
//! content hash, register each block's metadata once, and then compose files
//! as ordered `(block, offset)` assignments. This crate owns the vaults,
//! files, blocks, and assignments that make that composition meaningful: it
//! enforces referential integrity on block lifecycle and proves, at
//! finalization, that a file's assignments form a gapless, overlap-free
//! cover of its byte range.
//!
//! The HTTP surface, the block object store (where payload bytes actually
//! live), authentication, and tenancy extraction are all out of scope here -
//! this crate is the metadata engine those collaborators sit around. See
//! `SPEC_FULL.md` for the full component breakdown.
//!
//! # Layout
//!
//! - [`ids`] - typed identifiers and the half-open interval used by finalization.
//! - [`error`] - the domain error taxonomy every backend returns.
//! - [`validator`] - the pure, single-pass finalization algorithm.
//! - [`pagination`] - marker/limit pagination shared by every listing.
//! - [`backend`] - the [`backend::MetadataBackend`] contract plus the local
//!   (embedded relational) and distributed (wide-column) implementations.
//! - [`config`] - process-wide engine configuration.
//! - [`telemetry`] - metrics, tracing, and span recording (feature `telemetry`).
//!
//! # Example
//! ```
//! use deuce::backend::MetadataBackend;
//! use deuce::backend::local::LocalBackend;
//! use deuce::ids::{ProjectId, VaultId, BlockId, StorageId};
//!
//! # async fn run() -> deuce::error::Result<()> {
//! let backend = LocalBackend::open_in_memory(80)?;
//! let project = ProjectId::from("acme");
//! let vault = VaultId::from("documents");
//!
//! backend.create_vault(&project, &vault).await?;
//! let file_id = backend.create_file(&project, &vault).await?;
//!
//! let block_id = BlockId::from("deadbeef");
//! backend.register_block(&project, &vault, &block_id, &StorageId::from("s3://blob/1"), 100).await?;
//! backend.assign_block(&project, &vault, &file_id, &block_id, 0).await?;
//!
//! let check = backend.finalize_file(&project, &vault, &file_id, Some(100)).await?;
//! assert!(check.is_ok());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod ids;
pub mod pagination;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod validator;

pub use backend::{HealthStatus, MetadataBackend, Page, VaultStatistics};
pub use config::{BackendKind, EngineConfig};
pub use error::{DeuceError, Result};
pub use ids::{BlockId, FileId, Interval, ProjectId, StorageId, VaultId};
pub use validator::{AssignedBlock, Diagnostic, Endpoint, FinalizeCheck};

use backend::{distributed::DistributedBackend, local::LocalBackend};
use std::sync::Arc;

/// The process-wide entry point: a configured backend handle plus the
/// optional observability fixtures wired onto it.
///
/// This is the only piece of global state the engine asks callers to hold
/// (see `SPEC_FULL.md`'s Global State notes) - request handlers receive an
/// `Arc<Engine>` (or clone the inner `Arc<dyn MetadataBackend>` directly) and
/// pass it through explicitly rather than reaching for an ambient singleton.
///
/// `Engine` does not re-expose every [`MetadataBackend`] method - callers
/// that don't need tracing/metrics wrapping can call
/// [`backend()`](Engine::backend) and use the trait directly. The methods
/// defined here instrument the two operations most worth observing in
/// production: block assignment and finalization.
pub struct Engine {
    backend: Arc<dyn MetadataBackend>,
    config: EngineConfig,
    #[cfg(feature = "telemetry")]
    metrics: Option<telemetry::Metrics>,
    #[cfg(feature = "telemetry")]
    span_recorder: Option<telemetry::SpanRecorder>,
}

impl Engine {
    /// Wraps an already-constructed backend. Useful in tests or when the
    /// caller wants a backend implementation this crate doesn't provide.
    pub fn new(backend: Arc<dyn MetadataBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            #[cfg(feature = "telemetry")]
            metrics: None,
            #[cfg(feature = "telemetry")]
            span_recorder: None,
        }
    }

    /// Constructs the backend selected by `config.backend` and opens it.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let backend: Arc<dyn MetadataBackend> = match config.backend {
            BackendKind::Local => {
                Arc::new(LocalBackend::open(&config.local_db_path, config.max_return_num)?)
            }
            BackendKind::Distributed => Arc::new(DistributedBackend::open(
                &config.local_db_path,
                config.max_return_num,
            )?),
        };
        Ok(Self::new(backend, config))
    }

    /// The underlying backend, for callers that want the raw
    /// [`MetadataBackend`] contract without the instrumentation wrapper.
    pub fn backend(&self) -> &Arc<dyn MetadataBackend> {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[cfg(feature = "telemetry")]
    pub fn metrics(&self) -> Option<&telemetry::Metrics> {
        self.metrics.as_ref()
    }

    #[cfg(feature = "telemetry")]
    pub fn set_metrics(&mut self, metrics: Option<telemetry::Metrics>) {
        self.metrics = metrics;
    }

    #[cfg(feature = "telemetry")]
    pub fn span_recorder(&self) -> Option<&telemetry::SpanRecorder> {
        self.span_recorder.as_ref()
    }

    #[cfg(feature = "telemetry")]
    pub fn set_span_recorder(&mut self, recorder: Option<telemetry::SpanRecorder>) {
        self.span_recorder = recorder;
    }

    /// Instrumented `assign_block`: records `assignments_total` and, on
    /// failure, `errors_total`, and emits a span tagged with the file id.
    pub async fn assign_block(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
        block_id: &BlockId,
        offset: i64,
    ) -> Result<()> {
        #[cfg(feature = "telemetry")]
        let span = self.span_recorder.as_ref().map(|_| {
            telemetry::SpanBuilder::new("assign_block".to_string())
                .with_attribute("vault_id", vault_id.to_string())
                .with_attribute("file_id", file_id.to_string())
                .build()
        });

        let result = self
            .backend
            .assign_block(project_id, vault_id, file_id, block_id, offset)
            .await;

        #[cfg(feature = "telemetry")]
        {
            if let Some(metrics) = &self.metrics {
                match &result {
                    Ok(()) => metrics.assignments_total().inc(),
                    Err(_) => metrics.errors_total().inc(),
                }
            }
            if let (Some(recorder), Some(mut span)) = (&self.span_recorder, span) {
                span.status = match &result {
                    Ok(()) => telemetry::SpanStatus::Ok,
                    Err(e) => telemetry::SpanStatus::Error(e.to_string()),
                };
                span.end_time_ms = Some(now_ms());
                recorder.record_span(span);
            }
        }

        result
    }

    /// Instrumented `finalize_file`: records attempt/ok/diagnostic counters
    /// and the operation's wall-clock duration, per `SPEC_FULL.md`'s
    /// observability section.
    pub async fn finalize_file(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
        file_size: Option<i64>,
    ) -> Result<FinalizeCheck> {
        #[cfg(feature = "telemetry")]
        let start = now_ms();
        #[cfg(feature = "telemetry")]
        let span = self.span_recorder.as_ref().map(|_| {
            telemetry::SpanBuilder::new("finalize_file".to_string())
                .with_attribute("vault_id", vault_id.to_string())
                .with_attribute("file_id", file_id.to_string())
                .build()
        });
        #[cfg(feature = "telemetry")]
        if let Some(metrics) = &self.metrics {
            metrics.finalize_attempts_total().inc();
        }

        let result = self
            .backend
            .finalize_file(project_id, vault_id, file_id, file_size)
            .await;

        #[cfg(feature = "telemetry")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.finalize_duration().observe(now_ms() - start);
                match &result {
                    Ok(FinalizeCheck::Ok) => metrics.finalize_ok_total().inc(),
                    Ok(FinalizeCheck::Diagnostics(_)) => metrics.finalize_diagnostics_total().inc(),
                    Err(_) => metrics.errors_total().inc(),
                }
            }
            if let (Some(recorder), Some(mut span)) = (&self.span_recorder, span) {
                span.status = match &result {
                    Ok(_) => telemetry::SpanStatus::Ok,
                    Err(e) => telemetry::SpanStatus::Error(e.to_string()),
                };
                span.end_time_ms = Some(now_ms());
                recorder.record_span(span);
            }
        }

        result
    }
}

#[cfg(feature = "telemetry")]
fn now_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as f64
}
