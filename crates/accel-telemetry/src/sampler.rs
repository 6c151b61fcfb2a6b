//! Telemetry sampler
//!
//! Connects to the configured telemetry source once, fixes the device set and
//! field watch, and then produces a fresh batch of samples on every poll.

use crate::config::{SamplerConfig, TelemetryTarget};
use crate::enumerate::SysfsDeviceEnumerator;
use crate::rdcd::RdcdTelemetrySource;
use crate::source::{TelemetrySource, WatchSpec};
use crate::sysfs::SysfsTelemetrySource;
use crate::{Result, TelemetryError};
use accel_core::{DeviceIndex, FieldId, FieldSample};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Anything that yields one batch of samples per cycle
#[async_trait]
pub trait SampleSource: Send {
    /// Samples currently available for the configured fields and devices
    async fn poll(&mut self) -> Result<Vec<FieldSample>>;

    /// Release whatever the source registered upstream
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sampler over a connected telemetry source
pub struct TelemetrySampler {
    source: Box<dyn TelemetrySource>,
    fields: Vec<FieldId>,
    devices: Vec<DeviceIndex>,
}

impl TelemetrySampler {
    /// Open the configured source and register the field watch
    pub async fn connect(config: SamplerConfig) -> Result<Self> {
        config.validate().map_err(TelemetryError::Configuration)?;
        info!("Connecting telemetry sampler to {}", config.target);

        let source: Box<dyn TelemetrySource> = match config.target {
            TelemetryTarget::Embedded { ref sysfs_root } => {
                let enumerator = SysfsDeviceEnumerator::new(sysfs_root).with_vendor_id(config.vendor_id.clone());
                Box::new(SysfsTelemetrySource::new(enumerator)?)
            }
            TelemetryTarget::Standalone { .. } => Box::new(RdcdTelemetrySource::connect(&config).await?),
        };

        Self::with_source(source, &config).await
    }

    /// Use an already constructed source
    pub async fn with_source(mut source: Box<dyn TelemetrySource>, config: &SamplerConfig) -> Result<Self> {
        let visible = source.devices().await?;
        let devices = select_devices(&visible, config.device_filter.as_deref());
        if devices.is_empty() {
            warn!("No devices to sample from the {} source", source.name());
        }

        let spec = WatchSpec::from_config(config, devices.clone());
        source.watch(&spec).await?;
        info!(
            "Sampling {} fields on devices {:?} from the {} source",
            config.fields.len(),
            devices.iter().map(|d| d.get()).collect::<Vec<_>>(),
            source.name()
        );

        Ok(Self {
            source,
            fields: config.fields.clone(),
            devices,
        })
    }

    /// Devices being sampled
    pub fn devices(&self) -> &[DeviceIndex] {
        &self.devices
    }

    /// Fields being sampled
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    /// Drop the field watch
    pub async fn shutdown(mut self) -> Result<()> {
        self.close().await
    }
}

#[async_trait]
impl SampleSource for TelemetrySampler {
    async fn poll(&mut self) -> Result<Vec<FieldSample>> {
        let mut samples = Vec::with_capacity(self.devices.len() * self.fields.len());
        for &device in &self.devices {
            samples.extend(self.source.fetch(device, &self.fields).await?);
        }
        debug!("Polled {} samples", samples.len());
        Ok(samples)
    }

    async fn close(&mut self) -> Result<()> {
        info!("Shutting down telemetry sampler");
        self.source.unwatch().await
    }
}

/// Intersect the configured filter with the visible devices
fn select_devices(visible: &[DeviceIndex], filter: Option<&[DeviceIndex]>) -> Vec<DeviceIndex> {
    match filter {
        None => visible.to_vec(),
        Some(filter) => {
            let mut selected = Vec::with_capacity(filter.len());
            for device in filter {
                if !visible.contains(device) {
                    warn!("Device {} is not visible and will be ignored", device);
                } else if !selected.contains(device) {
                    selected.push(*device);
                }
            }
            selected
        }
    }
}
