//! # accel-metrics
//!
//! Prometheus exposition for the accelerator exporter.
//!
//! This crate provides:
//! - A series registry holding one gauge family per telemetry field, with a
//!   label schema chosen at construction
//! - Cycle-atomic publishing: readers never observe a half-written cycle
//! - An HTTP endpoint serving `/metrics` and `/health`

pub mod endpoint;
pub mod registry;

// Re-export commonly used types
pub use endpoint::MetricsEndpoint;
pub use registry::{
    LabelSchema, PublishReport, SeriesPoint, SeriesRegistry, SeriesRegistryBuilder, WorkloadLabels,
};

// Error handling
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use accel_core::FieldId;

    #[tokio::test]
    async fn test_prefix_is_sanitized() {
        let registry = SeriesRegistry::builder()
            .with_prefix("amd-")
            .with_fields([FieldId::GPU_UTIL])
            .build()
            .unwrap();

        registry
            .publish(&[SeriesPoint::new(FieldId::GPU_UTIL, accel_core::DeviceIndex::new(0), 1.0)])
            .await;
        let text = registry.encode().await.unwrap();
        assert!(text.contains("amd_rdc_fi_gpu_util{device_index=\"0\"} 1"));
    }

    #[test]
    fn test_error_display() {
        let error = MetricsError::Config("Server already started".to_string());
        assert_eq!(error.to_string(), "Configuration error: Server already started");
    }
}
