//! # accel-exporter
//!
//! Prometheus exporter for accelerator telemetry with Kubernetes workload
//! attribution.
//!
//! Each cycle the exporter samples the configured telemetry fields, optionally
//! attributes every device to the pod/container currently holding it, and
//! republishes the result as labeled gauges served on `/metrics`.

pub mod cli;
pub mod config;
pub mod engine;
pub mod exporter;
pub mod fields;
pub mod logging;
pub mod poll;

// Re-export commonly used types
pub use config::ExporterConfig;
pub use engine::{CorrelationEngine, CycleReport, Enrichment};
pub use exporter::Exporter;
pub use poll::{PollLoop, Sleeper, TokioSleeper};

// Error handling
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] accel_telemetry::TelemetryError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] accel_metrics::MetricsError),

    #[error("Core error: {0}")]
    Core(#[from] accel_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ExporterError>;
