//! Mock telemetry source for testing
//!
//! Clones share state, so a test can keep one handle and change values,
//! take devices offline or drop the connection between cycles.

use crate::source::{TelemetrySource, WatchSpec};
use crate::{Result, TelemetryError};
use accel_core::{DeviceIndex, FieldId, FieldSample, FieldValue};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<DeviceIndex>,
    values: BTreeMap<(DeviceIndex, FieldId), FieldValue>,
    offline: BTreeSet<DeviceIndex>,
    disconnected: bool,
    watch: Option<WatchSpec>,
    fetches: usize,
}

/// Scripted telemetry source
#[derive(Debug, Clone, Default)]
pub struct MockTelemetrySource {
    state: Arc<RwLock<MockState>>,
}

impl MockTelemetrySource {
    /// Create a mock with the given visible devices and no values
    pub fn new(devices: impl IntoIterator<Item = u32>) -> Self {
        let state = MockState {
            devices: devices.into_iter().map(DeviceIndex::new).collect(),
            ..Default::default()
        };
        info!("Creating mock telemetry source with {} devices", state.devices.len());
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Create a mock with `count` devices populated with plausible values
    pub fn with_default_values(count: u32) -> Self {
        let mut state = MockState {
            devices: (0..count).map(DeviceIndex::new).collect(),
            ..Default::default()
        };
        for i in 0..count {
            let device = DeviceIndex::new(i);
            let i = i as i64;
            state.values.insert((device, FieldId::GPU_UTIL), FieldValue::Integer(45 + i * 10));
            state.values.insert((device, FieldId::GPU_TEMP), FieldValue::Integer(65_000 + i * 5_000));
            state.values.insert((device, FieldId::POWER_USAGE), FieldValue::Integer(150_000_000 + i * 25_000_000));
            state.values.insert((device, FieldId::GPU_CLOCK), FieldValue::Integer(1_500_000_000 + i * 100_000_000));
            state.values.insert((device, FieldId::GPU_MEMORY_TOTAL), FieldValue::Integer(8 << 30));
            state.values.insert((device, FieldId::GPU_MEMORY_USAGE), FieldValue::Integer((2 << 30) + i * (512 << 20)));
        }
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Set the current value of a field
    pub async fn set_value(&self, device: u32, field: FieldId, value: FieldValue) {
        let mut state = self.state.write().await;
        state.values.insert((DeviceIndex::new(device), field), value);
    }

    /// Stop reporting any values for a device
    pub async fn set_offline(&self, device: u32, offline: bool) {
        let mut state = self.state.write().await;
        if offline {
            state.offline.insert(DeviceIndex::new(device));
        } else {
            state.offline.remove(&DeviceIndex::new(device));
        }
    }

    /// Make every call fail as a lost connection
    pub async fn set_disconnected(&self, disconnected: bool) {
        self.state.write().await.disconnected = disconnected;
    }

    /// Current watch registration
    pub async fn watch_spec(&self) -> Option<WatchSpec> {
        self.state.read().await.watch.clone()
    }

    /// Number of `fetch` calls served
    pub async fn fetch_count(&self) -> usize {
        self.state.read().await.fetches
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.state.read().await.disconnected {
            Err(TelemetryError::CommunicationError("mock source disconnected".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TelemetrySource for MockTelemetrySource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn devices(&mut self) -> Result<Vec<DeviceIndex>> {
        self.ensure_connected().await?;
        Ok(self.state.read().await.devices.clone())
    }

    async fn watch(&mut self, spec: &WatchSpec) -> Result<()> {
        self.ensure_connected().await?;
        debug!("Mock watch on {} devices", spec.devices.len());
        self.state.write().await.watch = Some(spec.clone());
        Ok(())
    }

    async fn fetch(&mut self, device: DeviceIndex, fields: &[FieldId]) -> Result<Vec<FieldSample>> {
        self.ensure_connected().await?;
        let mut state = self.state.write().await;
        state.fetches += 1;
        if state.offline.contains(&device) {
            return Ok(Vec::new());
        }

        Ok(fields
            .iter()
            .filter_map(|&field| {
                state
                    .values
                    .get(&(device, field))
                    .map(|&value| FieldSample::new(device, field, value))
            })
            .collect())
    }

    async fn unwatch(&mut self) -> Result<()> {
        self.state.write().await.watch = None;
        Ok(())
    }
}
