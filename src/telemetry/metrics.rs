//! Prometheus metrics for the metadata engine.
//!
//! - **Counters**: vaults/files/blocks created, finalize attempts/diagnostics, errors.
//! - **Histograms**: finalize duration, listing duration.
//! - **Gauges**: active connections, tracked block refcount total.
//!
//! # Example
//! ```
//! use deuce::telemetry::Metrics;
//!
//! let metrics = Metrics::new().expect("failed to create metrics");
//! metrics.vaults_created_total().inc();
//! metrics.finalize_duration().observe(4.2);
//! metrics.active_connections().set(1.0);
//! ```

use crate::telemetry::TelemetryConfig;
use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Thread-safe metrics collection for a running backend, registered against a
/// shared Prometheus registry for export.
pub struct Metrics {
    registry: Arc<Registry>,

    vaults_created_total: Counter,
    vaults_deleted_total: Counter,
    files_created_total: Counter,
    files_deleted_total: Counter,
    blocks_registered_total: Counter,
    blocks_unregistered_total: Counter,
    assignments_total: Counter,
    finalize_attempts_total: Counter,
    finalize_ok_total: Counter,
    finalize_diagnostics_total: Counter,
    errors_total: Counter,

    finalize_duration: Histogram,
    listing_duration: Histogram,

    active_connections: Gauge,
    tracked_block_refcount_total: Gauge,
}

impl Metrics {
    /// Create new metrics with a fresh default registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create metrics for a given telemetry configuration.
    pub fn with_config(_config: &TelemetryConfig) -> Result<Self, prometheus::Error> {
        Self::new()
    }

    /// Create metrics registered against a caller-supplied registry. Useful
    /// for tests that want an isolated registry per case.
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let vaults_created_total = Counter::with_opts(Opts::new(
            "deuce_vaults_created_total",
            "Total number of vaults created",
        ))?;
        let vaults_deleted_total = Counter::with_opts(Opts::new(
            "deuce_vaults_deleted_total",
            "Total number of vaults deleted",
        ))?;
        let files_created_total = Counter::with_opts(Opts::new(
            "deuce_files_created_total",
            "Total number of files created",
        ))?;
        let files_deleted_total = Counter::with_opts(Opts::new(
            "deuce_files_deleted_total",
            "Total number of files deleted",
        ))?;
        let blocks_registered_total = Counter::with_opts(Opts::new(
            "deuce_blocks_registered_total",
            "Total number of blocks registered",
        ))?;
        let blocks_unregistered_total = Counter::with_opts(Opts::new(
            "deuce_blocks_unregistered_total",
            "Total number of blocks unregistered",
        ))?;
        let assignments_total = Counter::with_opts(Opts::new(
            "deuce_assignments_total",
            "Total number of block assignments written",
        ))?;
        let finalize_attempts_total = Counter::with_opts(Opts::new(
            "deuce_finalize_attempts_total",
            "Total number of finalize_file calls",
        ))?;
        let finalize_ok_total = Counter::with_opts(Opts::new(
            "deuce_finalize_ok_total",
            "Total number of finalize_file calls that transitioned a file to Finalized",
        ))?;
        let finalize_diagnostics_total = Counter::with_opts(Opts::new(
            "deuce_finalize_diagnostics_total",
            "Total number of gap/overlap diagnostics returned by finalize_file",
        ))?;
        let errors_total = Counter::with_opts(Opts::new(
            "deuce_errors_total",
            "Total number of backend operations that returned an error",
        ))?;

        let finalize_duration = Histogram::with_opts(
            HistogramOpts::new(
                "deuce_finalize_duration_ms",
                "finalize_file wall-clock duration in milliseconds",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
        )?;
        let listing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "deuce_listing_duration_ms",
                "Listing operation duration in milliseconds",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
        )?;

        let active_connections = Gauge::with_opts(Opts::new(
            "deuce_active_connections",
            "Number of active backend connections",
        ))?;
        let tracked_block_refcount_total = Gauge::with_opts(Opts::new(
            "deuce_tracked_block_refcount_total",
            "Sum of refcounts across all registered blocks, as last observed",
        ))?;

        registry.register(Box::new(vaults_created_total.clone()))?;
        registry.register(Box::new(vaults_deleted_total.clone()))?;
        registry.register(Box::new(files_created_total.clone()))?;
        registry.register(Box::new(files_deleted_total.clone()))?;
        registry.register(Box::new(blocks_registered_total.clone()))?;
        registry.register(Box::new(blocks_unregistered_total.clone()))?;
        registry.register(Box::new(assignments_total.clone()))?;
        registry.register(Box::new(finalize_attempts_total.clone()))?;
        registry.register(Box::new(finalize_ok_total.clone()))?;
        registry.register(Box::new(finalize_diagnostics_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(finalize_duration.clone()))?;
        registry.register(Box::new(listing_duration.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(tracked_block_refcount_total.clone()))?;

        Ok(Self {
            registry,
            vaults_created_total,
            vaults_deleted_total,
            files_created_total,
            files_deleted_total,
            blocks_registered_total,
            blocks_unregistered_total,
            assignments_total,
            finalize_attempts_total,
            finalize_ok_total,
            finalize_diagnostics_total,
            errors_total,
            finalize_duration,
            listing_duration,
            active_connections,
            tracked_block_refcount_total,
        })
    }

    /// The underlying registry, for exporting metrics in Prometheus text format.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn vaults_created_total(&self) -> &Counter {
        &self.vaults_created_total
    }
    pub fn vaults_deleted_total(&self) -> &Counter {
        &self.vaults_deleted_total
    }
    pub fn files_created_total(&self) -> &Counter {
        &self.files_created_total
    }
    pub fn files_deleted_total(&self) -> &Counter {
        &self.files_deleted_total
    }
    pub fn blocks_registered_total(&self) -> &Counter {
        &self.blocks_registered_total
    }
    pub fn blocks_unregistered_total(&self) -> &Counter {
        &self.blocks_unregistered_total
    }
    pub fn assignments_total(&self) -> &Counter {
        &self.assignments_total
    }
    pub fn finalize_attempts_total(&self) -> &Counter {
        &self.finalize_attempts_total
    }
    pub fn finalize_ok_total(&self) -> &Counter {
        &self.finalize_ok_total
    }
    pub fn finalize_diagnostics_total(&self) -> &Counter {
        &self.finalize_diagnostics_total
    }
    pub fn errors_total(&self) -> &Counter {
        &self.errors_total
    }

    pub fn finalize_duration(&self) -> &Histogram {
        &self.finalize_duration
    }
    pub fn listing_duration(&self) -> &Histogram {
        &self.listing_duration
    }

    pub fn active_connections(&self) -> &Gauge {
        &self.active_connections
    }
    pub fn tracked_block_refcount_total(&self) -> &Gauge {
        &self.tracked_block_refcount_total
    }

    /// Ratio of finalize attempts that succeeded outright (0.0 to 1.0).
    /// Returns 0.0 if no attempts have been recorded.
    pub fn finalize_success_ratio(&self) -> f64 {
        let attempts = self.finalize_attempts_total.get();
        if attempts == 0.0 {
            0.0
        } else {
            self.finalize_ok_total.get() / attempts
        }
    }
}

impl Clone for Metrics {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            vaults_created_total: self.vaults_created_total.clone(),
            vaults_deleted_total: self.vaults_deleted_total.clone(),
            files_created_total: self.files_created_total.clone(),
            files_deleted_total: self.files_deleted_total.clone(),
            blocks_registered_total: self.blocks_registered_total.clone(),
            blocks_unregistered_total: self.blocks_unregistered_total.clone(),
            assignments_total: self.assignments_total.clone(),
            finalize_attempts_total: self.finalize_attempts_total.clone(),
            finalize_ok_total: self.finalize_ok_total.clone(),
            finalize_diagnostics_total: self.finalize_diagnostics_total.clone(),
            errors_total: self.errors_total.clone(),
            finalize_duration: self.finalize_duration.clone(),
            listing_duration: self.listing_duration.clone(),
            active_connections: self.active_connections.clone(),
            tracked_block_refcount_total: self.tracked_block_refcount_total.clone(),
        }
    }
}
