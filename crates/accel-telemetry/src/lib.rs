//! # accel-telemetry
//!
//! Accelerator telemetry collection and device topology for the exporter.
//!
//! This crate provides:
//! - Device enumeration and the immutable device-index → bus-id map
//! - Telemetry sources: embedded (sysfs), standalone (telemetry daemon over gRPC)
//! - A sampler that turns configured fields and devices into per-cycle samples
//!
//! ## Supported Sources
//!
//! - **Embedded**: reads the amdgpu driver's sysfs files in-process
//! - **Standalone**: talks to a telemetry daemon over gRPC, optionally with mutual TLS
//! - **Mock**: scripted values for tests (feature `mock`)
//!
//! ## Example
//!
//! ```rust,no_run
//! use accel_telemetry::{SampleSource, SamplerConfig, TelemetrySampler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SamplerConfig::embedded()
//!         .with_update_frequency(std::time::Duration::from_secs(1));
//!
//!     let mut sampler = TelemetrySampler::connect(config).await?;
//!     for sample in sampler.poll().await? {
//!         println!("{} {} {}", sample.device, sample.field, sample.value);
//!     }
//!
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub mod busmap;
pub mod config;
pub mod enumerate;
pub mod rdcd;
pub mod retention;
pub mod sampler;
pub mod source;
pub mod sysfs;

// Mock implementation for testing
#[cfg(any(feature = "mock", test))]
pub mod mock;

// Re-export main types
pub use busmap::BusMap;
pub use config::{AuthMode, SamplerConfig, TelemetryTarget, TlsFiles};
pub use enumerate::{DeviceEnumerator, SysfsDeviceEnumerator};
pub use sampler::{SampleSource, TelemetrySampler};
pub use source::{TelemetrySource, WatchSpec};

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors that can occur during telemetry operations
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("Telemetry source initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Telemetry communication error: {0}")]
    CommunicationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Telemetry daemon error: {0}")]
    DaemonError(String),

    #[error("Device map error: {0}")]
    DeviceMap(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl TelemetryError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TelemetryError::CommunicationError(_)
                | TelemetryError::Timeout(_)
                | TelemetryError::Transport(_)
        )
    }

    /// Check if this error means the connection to the telemetry source is gone
    pub fn is_connection_lost(&self) -> bool {
        match self {
            TelemetryError::CommunicationError(_) | TelemetryError::Transport(_) => true,
            TelemetryError::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::Cancelled | tonic::Code::Unknown
            ),
            _ => false,
        }
    }

    /// Check if this error indicates a permission issue
    pub fn is_permission_issue(&self) -> bool {
        match self {
            TelemetryError::PermissionDenied(_) => true,
            TelemetryError::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            TelemetryError::Grpc(status) => matches!(
                status.code(),
                tonic::Code::PermissionDenied | tonic::Code::Unauthenticated
            ),
            _ => false,
        }
    }
}
