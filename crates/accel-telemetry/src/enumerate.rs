//! Device enumeration
//!
//! Devices are discovered from the DRM class directory in sysfs. Each
//! `card<N>` entry whose PCI vendor matches is assigned the next device index
//! in card-number order, which matches the order the device-management
//! library reports devices in.

use crate::config::{AMD_VENDOR_ID, DEFAULT_SYSFS_ROOT};
use crate::{Result, TelemetryError};
use accel_core::{BusId, DeviceIndex};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of the device set and each device's bus identifier
pub trait DeviceEnumerator: Send + Sync {
    /// All devices in index order
    fn enumerate(&self) -> Result<Vec<DeviceIndex>>;

    /// Bus identifier of a device
    fn bus_id_of(&self, index: DeviceIndex) -> Result<BusId>;
}

/// Enumerates accelerators from `/sys/class/drm`
#[derive(Debug, Clone)]
pub struct SysfsDeviceEnumerator {
    root: PathBuf,
    vendor_id: Option<String>,
}

impl SysfsDeviceEnumerator {
    /// Create an enumerator over a DRM class directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            vendor_id: Some(AMD_VENDOR_ID.to_string()),
        }
    }

    /// Only enumerate devices with this PCI vendor id (`None` accepts all)
    pub fn with_vendor_id(mut self, vendor_id: Option<String>) -> Self {
        self.vendor_id = vendor_id.map(|v| v.trim().to_lowercase());
        self
    }

    /// DRM class directory being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The PCI device directory of every enumerated device, in index order
    pub fn device_dirs(&self) -> Result<Vec<(DeviceIndex, PathBuf)>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            TelemetryError::EnumerationFailed(format!("cannot read {}: {}", self.root.display(), e))
        })?;

        let mut cards = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(number) = card_number(&name.to_string_lossy()) else {
                continue;
            };
            let device_dir = entry.path().join("device");
            if !device_dir.is_dir() {
                continue;
            }
            if !self.vendor_matches(&device_dir) {
                debug!("Skipping {} (vendor mismatch)", device_dir.display());
                continue;
            }
            cards.push((number, device_dir));
        }
        cards.sort_by_key(|(number, _)| *number);

        Ok(cards
            .into_iter()
            .enumerate()
            .map(|(i, (_, dir))| (DeviceIndex::new(i as u32), dir))
            .collect())
    }

    /// PCI device directory of one device
    pub fn device_dir(&self, index: DeviceIndex) -> Result<PathBuf> {
        self.device_dirs()?
            .into_iter()
            .find(|(i, _)| *i == index)
            .map(|(_, dir)| dir)
            .ok_or_else(|| TelemetryError::DeviceNotFound(index.to_string()))
    }

    fn vendor_matches(&self, device_dir: &Path) -> bool {
        let Some(ref wanted) = self.vendor_id else {
            return true;
        };
        match fs::read_to_string(device_dir.join("vendor")) {
            Ok(vendor) => vendor.trim().eq_ignore_ascii_case(wanted),
            Err(_) => false,
        }
    }
}

impl Default for SysfsDeviceEnumerator {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl DeviceEnumerator for SysfsDeviceEnumerator {
    fn enumerate(&self) -> Result<Vec<DeviceIndex>> {
        Ok(self.device_dirs()?.into_iter().map(|(index, _)| index).collect())
    }

    fn bus_id_of(&self, index: DeviceIndex) -> Result<BusId> {
        let dir = self.device_dir(index)?;
        read_pci_slot_name(&dir)
    }
}

/// `card<N>` with no connector suffix
fn card_number(name: &str) -> Option<u32> {
    name.strip_prefix("card")?.parse().ok()
}

/// Bus id from the `PCI_SLOT_NAME` line of a device's `uevent` file
pub(crate) fn read_pci_slot_name(device_dir: &Path) -> Result<BusId> {
    let uevent_path = device_dir.join("uevent");
    let uevent = fs::read_to_string(&uevent_path)?;
    uevent
        .lines()
        .find_map(|line| line.strip_prefix("PCI_SLOT_NAME="))
        .map(BusId::canonical)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            TelemetryError::EnumerationFailed(format!("no PCI_SLOT_NAME in {}", uevent_path.display()))
        })
}

/// Helpers for building fake DRM trees in tests
#[cfg(any(feature = "mock", test))]
pub mod testing {
    use std::fs;
    use std::path::Path;

    /// Create `card<N>/device` with a vendor and a PCI slot name
    pub fn add_card(root: &Path, card: u32, vendor: &str, slot: &str) -> std::path::PathBuf {
        let device = root.join(format!("card{}", card)).join("device");
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("vendor"), format!("{}\n", vendor)).unwrap();
        fs::write(
            device.join("uevent"),
            format!("DRIVER=amdgpu\nPCI_CLASS=38000\nPCI_SLOT_NAME={}\n", slot),
        )
        .unwrap();
        device
    }
}
