//! # accel-core
//!
//! Core types and utilities shared by the accelerator exporter crates.
//!
//! This crate provides the foundational data structures used by every other
//! component of the exporter:
//!
//! - Device, bus and workload identifiers
//! - Telemetry samples and typed field values
//! - The catalog of telemetry field identifiers and their display names
//! - Label names used on exported series
//! - Error handling types and utilities

pub mod error;
pub mod fields;
pub mod labels;
pub mod types;

// Re-export commonly used types at the crate root
pub use error::{Error, Result};
pub use fields::{FieldDescriptor, FieldId, DEFAULT_FIELDS};
pub use types::{BusId, DeviceIndex, FieldSample, FieldValue, IdentityMap, WorkloadIdentity};

/// Resource class under which the orchestrator reports AMD accelerators
pub const DEFAULT_RESOURCE_NAME: &str = "amd.com/gpu";
