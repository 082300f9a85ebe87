//! Observability for the metadata engine.
//!
//! - **Metrics**: Prometheus-compatible counters, histograms, gauges.
//! - **Traces**: distributed tracing via OpenTelemetry.
//! - **Configuration**: service identification and feature toggles.
//!
//! # Example
//! ```no_run
//! use deuce::telemetry::{TelemetryConfig, Metrics};
//!
//! let config = TelemetryConfig::new(
//!     "deuce".to_string(),
//!     "http://localhost:4317".to_string(),
//! );
//! config.validate().expect("invalid telemetry config");
//!
//! let metrics = Metrics::new().expect("failed to create metrics");
//! metrics.vaults_created_total().inc();
//!
//! let provider = deuce::telemetry::TracerProvider::new(&config).expect("failed to create tracer");
//! let tracer = provider.tracer("backend");
//! let span = tracer.start_span("finalize_file");
//! ```

pub mod config;
pub mod metrics;
pub mod span_recorder;
pub mod tracer;

pub use config::TelemetryConfig;
pub use metrics::Metrics;
pub use span_recorder::{RecordedSpan, Sampler, SpanBuilder, SpanContext, SpanRecorder, SpanStatus};
pub use tracer::TracerProvider;
