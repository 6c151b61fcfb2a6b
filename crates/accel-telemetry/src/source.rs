//! Telemetry source abstraction
//!
//! A telemetry source is the device-management layer the sampler talks to.
//! It knows which devices are visible, accepts a watch registration for a set
//! of fields and serves the latest value of a field on demand.

use crate::config::SamplerConfig;
use crate::Result;
use accel_core::{DeviceIndex, FieldId, FieldSample};
use async_trait::async_trait;
use std::time::Duration;

/// Fields, devices and retention bounds registered with a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    /// Devices to watch
    pub devices: Vec<DeviceIndex>,

    /// Fields to watch
    pub fields: Vec<FieldId>,

    /// How often the source refreshes values
    pub update_frequency: Duration,

    /// How long values are retained
    pub max_keep_age: Duration,

    /// How many values per field are retained
    pub max_keep_samples: u32,
}

impl WatchSpec {
    /// Build a watch registration from sampler configuration and a device set
    pub fn from_config(config: &SamplerConfig, devices: Vec<DeviceIndex>) -> Self {
        Self {
            devices,
            fields: config.fields.clone(),
            update_frequency: config.update_frequency,
            max_keep_age: config.max_keep_age,
            max_keep_samples: config.max_keep_samples,
        }
    }

    /// Update frequency in whole microseconds
    pub fn update_frequency_micros(&self) -> u64 {
        u64::try_from(self.update_frequency.as_micros()).unwrap_or(u64::MAX)
    }
}

/// Device-management layer that serves field values
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Devices currently visible to the source
    async fn devices(&mut self) -> Result<Vec<DeviceIndex>>;

    /// Register a field watch
    async fn watch(&mut self, spec: &WatchSpec) -> Result<()>;

    /// Latest values of `fields` for one device
    ///
    /// Fields the device cannot report are left out of the result. An error
    /// means the source itself is unusable (for example a lost connection).
    async fn fetch(&mut self, device: DeviceIndex, fields: &[FieldId]) -> Result<Vec<FieldSample>>;

    /// Drop the field watch
    async fn unwatch(&mut self) -> Result<()>;
}
