//! Embedded telemetry source reading amdgpu sysfs files
//!
//! Values are read in-process from the PCI device directory of each card.
//! A value read within the update frequency is served from the retention
//! buffer instead of touching sysfs again; a failed read falls back to the
//! newest retained value that is still within the keep age.

use crate::enumerate::SysfsDeviceEnumerator;
use crate::retention::RetentionBuffer;
use crate::source::{TelemetrySource, WatchSpec};
use crate::{Result, TelemetryError};
use accel_core::{DeviceIndex, FieldId, FieldSample, FieldValue};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Telemetry source backed by the amdgpu driver's sysfs interface
pub struct SysfsTelemetrySource {
    enumerator: SysfsDeviceEnumerator,
    devices: BTreeMap<DeviceIndex, PathBuf>,
    watch: Option<WatchSpec>,
    buffers: HashMap<(DeviceIndex, FieldId), RetentionBuffer<FieldValue>>,
}

impl SysfsTelemetrySource {
    /// Create a source over the devices of an enumerator
    pub fn new(enumerator: SysfsDeviceEnumerator) -> Result<Self> {
        let devices: BTreeMap<_, _> = enumerator.device_dirs()?.into_iter().collect();
        info!(
            "Embedded telemetry found {} devices under {}",
            devices.len(),
            enumerator.root().display()
        );

        Ok(Self {
            enumerator,
            devices,
            watch: None,
            buffers: HashMap::new(),
        })
    }

    /// Whether the embedded source can report a field at all
    pub fn supports(field: FieldId) -> bool {
        matches!(
            field,
            FieldId::GPU_CLOCK
                | FieldId::MEM_CLOCK
                | FieldId::MEMORY_TEMP
                | FieldId::GPU_TEMP
                | FieldId::POWER_USAGE
                | FieldId::GPU_UTIL
                | FieldId::GPU_MEMORY_USAGE
                | FieldId::GPU_MEMORY_TOTAL
                | FieldId::ECC_CORRECT_TOTAL
                | FieldId::ECC_UNCORRECT_TOTAL
        )
    }

    fn refresh_interval(&self) -> Duration {
        self.watch
            .as_ref()
            .map(|w| w.update_frequency)
            .unwrap_or(Duration::ZERO)
    }

    fn buffer(&mut self, device: DeviceIndex, field: FieldId) -> &mut RetentionBuffer<FieldValue> {
        let (max_age, max_samples) = self
            .watch
            .as_ref()
            .map(|w| (w.max_keep_age, w.max_keep_samples))
            .unwrap_or((Duration::from_secs(3600), 1000));
        self.buffers
            .entry((device, field))
            .or_insert_with(|| RetentionBuffer::new(max_age, max_samples))
    }

    fn sample(&mut self, device: DeviceIndex, dir: &Path, field: FieldId, now: Instant) -> Option<FieldValue> {
        let refresh = self.refresh_interval();
        if let Some((at, value)) = self.buffer(device, field).latest() {
            if now.saturating_duration_since(at) < refresh {
                return Some(value);
            }
        }

        match read_field(dir, field) {
            Ok(Some(value)) => {
                self.buffer(device, field).push(now, value);
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Reading {} for device {} failed: {}", field, device, e);
                self.buffer(device, field).latest_fresh(now)
            }
        }
    }
}

#[async_trait]
impl TelemetrySource for SysfsTelemetrySource {
    fn name(&self) -> &str {
        "embedded"
    }

    async fn devices(&mut self) -> Result<Vec<DeviceIndex>> {
        Ok(self.devices.keys().copied().collect())
    }

    async fn watch(&mut self, spec: &WatchSpec) -> Result<()> {
        for field in &spec.fields {
            if !Self::supports(*field) {
                warn!("Field {} is not available in embedded mode", field);
            }
        }
        for device in &spec.devices {
            if !self.devices.contains_key(device) {
                return Err(TelemetryError::DeviceNotFound(device.to_string()));
            }
        }

        debug!(
            "Watching {} fields on {} devices every {:?}",
            spec.fields.len(),
            spec.devices.len(),
            spec.update_frequency
        );
        self.buffers.clear();
        self.watch = Some(spec.clone());
        Ok(())
    }

    async fn fetch(&mut self, device: DeviceIndex, fields: &[FieldId]) -> Result<Vec<FieldSample>> {
        let dir = match self.devices.get(&device) {
            Some(dir) => dir.clone(),
            None => return Err(TelemetryError::DeviceNotFound(device.to_string())),
        };
        if !dir.exists() {
            let root = self.enumerator.root();
            if !root.exists() {
                return Err(TelemetryError::CommunicationError(format!(
                    "{} is no longer available",
                    root.display()
                )));
            }
            warn!("Device {} disappeared from {}; skipping it this cycle", device, root.display());
            return Ok(Vec::new());
        }

        let now = Instant::now();
        let mut samples = Vec::with_capacity(fields.len());
        for &field in fields {
            if let Some(value) = self.sample(device, &dir, field, now) {
                samples.push(FieldSample::new(device, field, value));
            }
        }
        Ok(samples)
    }

    async fn unwatch(&mut self) -> Result<()> {
        self.watch = None;
        self.buffers.clear();
        Ok(())
    }
}

/// Read one field from a PCI device directory
///
/// `Ok(None)` means the field has no sysfs source on this device.
fn read_field(dir: &Path, field: FieldId) -> io::Result<Option<FieldValue>> {
    let value = match field {
        FieldId::GPU_UTIL => read_integer(&dir.join("gpu_busy_percent"))?,
        FieldId::GPU_MEMORY_USAGE => read_integer(&dir.join("mem_info_vram_used"))?,
        FieldId::GPU_MEMORY_TOTAL => read_integer(&dir.join("mem_info_vram_total"))?,
        FieldId::GPU_TEMP => read_integer(&hwmon_dir(dir)?.join("temp1_input"))?,
        FieldId::MEMORY_TEMP => read_integer(&hwmon_dir(dir)?.join("temp3_input"))?,
        FieldId::POWER_USAGE => read_integer(&hwmon_dir(dir)?.join("power1_average"))?,
        FieldId::GPU_CLOCK => active_clock_hz(&fs::read_to_string(dir.join("pp_dpm_sclk"))?)?,
        FieldId::MEM_CLOCK => active_clock_hz(&fs::read_to_string(dir.join("pp_dpm_mclk"))?)?,
        FieldId::ECC_CORRECT_TOTAL => ras_count(&fs::read_to_string(dir.join("ras").join("umc_err_count"))?, "ce")?,
        FieldId::ECC_UNCORRECT_TOTAL => ras_count(&fs::read_to_string(dir.join("ras").join("umc_err_count"))?, "ue")?,
        _ => return Ok(None),
    };
    Ok(Some(FieldValue::Integer(value)))
}

fn read_integer(path: &Path) -> io::Result<i64> {
    let content = fs::read_to_string(path)?;
    parse_integer(content.trim())
}

fn parse_integer(s: &str) -> io::Result<i64> {
    s.parse::<i64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("'{}': {}", s, e)))
}

/// First `hwmon/hwmon<N>` directory of a device
fn hwmon_dir(dir: &Path) -> io::Result<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir.join("hwmon"))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .map_or(false, |name| name.to_string_lossy().starts_with("hwmon"))
        })
        .collect();
    entries.sort();
    entries
        .into_iter()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no hwmon directory"))
}

/// Frequency of the DPM level marked active (`1: 1700Mhz *`), in Hz
fn active_clock_hz(table: &str) -> io::Result<i64> {
    let line = table
        .lines()
        .find(|line| line.trim_end().ends_with('*'))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no active DPM level"))?;

    let level = line
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(line)
        .trim()
        .trim_end_matches('*')
        .trim();
    let lowered = level.to_ascii_lowercase();
    let mhz = lowered.strip_suffix("mhz").unwrap_or(&lowered).trim();
    Ok(parse_integer(mhz)? * 1_000_000)
}

/// Count from a RAS error file (`ue: 0\nce: 3`)
fn ras_count(content: &str, key: &str) -> io::Result<i64> {
    content
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| parse_integer(v.trim()))
        .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::InvalidData, format!("no '{}' count", key))))
}
