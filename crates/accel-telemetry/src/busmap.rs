//! Device index → bus identifier map
//!
//! Built once at startup from a [`DeviceEnumerator`] and immutable afterwards.
//! Persisted as a flat JSON object, `{"0": "0000:03:00.0", "1": "0000:c1:00.0"}`.

use crate::enumerate::DeviceEnumerator;
use crate::{Result, TelemetryError};
use accel_core::{BusId, DeviceIndex};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Immutable mapping from device index to canonical bus id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusMap {
    entries: BTreeMap<DeviceIndex, BusId>,
}

impl BusMap {
    /// Build the map from every device the enumerator reports
    ///
    /// Fails if enumeration fails or any device's bus id cannot be read.
    pub fn build(enumerator: &dyn DeviceEnumerator) -> Result<Self> {
        let devices = enumerator.enumerate()?;

        let mut entries = BTreeMap::new();
        for index in devices {
            let bus_id = enumerator.bus_id_of(index)?;
            debug!("Device {} is at {}", index, bus_id);
            entries.insert(index, bus_id);
        }

        info!("Built bus map with {} devices", entries.len());
        Ok(Self { entries })
    }

    /// Create a map from explicit entries (ids are canonicalised)
    pub fn from_entries<I, B>(entries: I) -> Self
    where
        I: IntoIterator<Item = (DeviceIndex, B)>,
        B: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(index, bus_id)| (index, BusId::canonical(bus_id)))
                .collect(),
        }
    }

    /// Load a map previously written with [`BusMap::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TelemetryError::DeviceMap(format!("cannot read {}: {}", path.display(), e))
        })?;
        let raw: BTreeMap<DeviceIndex, String> = serde_json::from_str(&content)?;

        let map = Self::from_entries(raw);
        info!("Loaded bus map with {} devices from {}", map.len(), path.display());
        Ok(map)
    }

    /// Persist the map as JSON, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        fs::write(path, content)?;
        info!("Wrote bus map with {} devices to {}", self.len(), path.display());
        Ok(())
    }

    /// Bus id of a device
    pub fn lookup(&self, index: DeviceIndex) -> Option<&BusId> {
        self.entries.get(&index)
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map has no devices
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in index order
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceIndex, &BusId)> {
        self.entries.iter()
    }
}
