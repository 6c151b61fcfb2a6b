//! Core type definitions for the exporter

use crate::fields::FieldId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable small-integer handle for an accelerator slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIndex(u32);

impl DeviceIndex {
    /// Create a new device index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl std::str::FromStr for DeviceIndex {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|e| crate::Error::invalid_identifier(format!("device index '{}': {}", s, e)))
    }
}

/// Hardware bus address identifying a device, in canonical form
///
/// The canonical form is trimmed and lower-cased. A short `bus:device.function`
/// address gets the default PCI domain `0000:` prepended so that identifiers
/// reported with and without a domain compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(String);

impl BusId {
    /// Canonicalise a raw bus address
    pub fn canonical(raw: impl AsRef<str>) -> Self {
        let lowered = raw.as_ref().trim().to_lowercase();
        if is_short_bdf(&lowered) {
            Self(format!("0000:{}", lowered))
        } else {
            Self(lowered)
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the identifier is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BusId {
    fn from(raw: &str) -> Self {
        Self::canonical(raw)
    }
}

impl From<String> for BusId {
    fn from(raw: String) -> Self {
        Self::canonical(raw)
    }
}

/// `bb:dd.f` with hex digits and no domain
fn is_short_bdf(s: &str) -> bool {
    let Some((bus, rest)) = s.split_once(':') else {
        return false;
    };
    let Some((device, function)) = rest.split_once('.') else {
        return false;
    };
    let hex = |part: &str, len: usize| part.len() == len && part.chars().all(|c| c.is_ascii_hexdigit());
    hex(bus, 2) && hex(device, 2) && hex(function, 1)
}

/// Workload currently holding a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadIdentity {
    /// Namespace of the pod
    pub namespace: String,

    /// Pod name
    pub pod: String,

    /// Container name within the pod
    pub container: String,
}

impl WorkloadIdentity {
    /// Create a new workload identity
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }

    /// Identity used when no assignment is known
    pub fn unassigned() -> Self {
        Self::default()
    }

    /// Check whether this identity carries no assignment
    pub fn is_unassigned(&self) -> bool {
        self.namespace.is_empty() && self.pod.is_empty() && self.container.is_empty()
    }
}

/// Mapping from device identifier to the workload that holds it
pub type IdentityMap = HashMap<BusId, WorkloadIdentity>;

/// Typed telemetry value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Integer valued field (counters, bytes, milli-units)
    Integer(i64),
    /// Floating point field
    Double(f64),
}

impl FieldValue {
    /// Value as published on a gauge
    pub fn as_f64(&self) -> f64 {
        match *self {
            FieldValue::Integer(v) => v as f64,
            FieldValue::Double(v) => v,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
        }
    }
}

/// A single telemetry value for one field of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSample {
    /// Device the value was read from
    pub device: DeviceIndex,

    /// Field identifier
    pub field: FieldId,

    /// Sampled value
    pub value: FieldValue,
}

impl FieldSample {
    /// Create a new sample
    pub fn new(device: impl Into<DeviceIndex>, field: FieldId, value: FieldValue) -> Self {
        Self {
            device: device.into(),
            field,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_index_parsing() {
        assert_eq!("3".parse::<DeviceIndex>().unwrap(), DeviceIndex::new(3));
        assert_eq!(" 12 ".parse::<DeviceIndex>().unwrap().get(), 12);
        assert!("gpu0".parse::<DeviceIndex>().is_err());
        assert_eq!(DeviceIndex::new(7).to_string(), "7");
    }

    #[test]
    fn test_bus_id_canonical_lowercases() {
        let id = BusId::canonical("  0000:0A:00.0 ");
        assert_eq!(id.as_str(), "0000:0a:00.0");
        assert_eq!(BusId::from("0000:0a:00.0"), id);
    }

    #[test]
    fn test_bus_id_short_form_gets_domain() {
        assert_eq!(BusId::canonical("03:00.0").as_str(), "0000:03:00.0");
        assert_eq!(BusId::canonical("C1:00.1").as_str(), "0000:c1:00.1");
        assert_eq!(BusId::canonical("0000:03:00.0"), BusId::canonical("03:00.0"));
    }

    #[test]
    fn test_bus_id_leaves_other_schemes_alone() {
        assert_eq!(BusId::canonical("GPU-ABC").as_str(), "gpu-abc");
        assert_eq!(BusId::canonical("").as_str(), "");
        assert!(BusId::canonical("").is_empty());
    }

    #[test]
    fn test_workload_identity() {
        let identity = WorkloadIdentity::new("default", "train-7", "gpu");
        assert!(!identity.is_unassigned());
        assert!(WorkloadIdentity::unassigned().is_unassigned());
        assert_eq!(WorkloadIdentity::unassigned().pod, "");
    }

    #[test]
    fn test_field_value_conversion() {
        assert_eq!(FieldValue::Integer(42).as_f64(), 42.0);
        assert_eq!(FieldValue::Double(1.5).as_f64(), 1.5);
        assert_eq!(FieldValue::Integer(-3).to_string(), "-3");
    }

    #[test]
    fn test_device_index_as_json_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(DeviceIndex::new(0), BusId::canonical("0000:01:00.0"));
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"0":"0000:01:00.0"}"#);
        let back: std::collections::BTreeMap<DeviceIndex, BusId> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
