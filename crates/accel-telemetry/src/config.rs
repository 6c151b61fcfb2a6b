//! Telemetry sampler configuration

use accel_core::{DeviceIndex, FieldId, DEFAULT_FIELDS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default standalone telemetry daemon address
pub const DEFAULT_DAEMON_ADDRESS: &str = "localhost:50051";

/// Default sysfs class directory for DRM devices
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/drm";

/// PCI vendor id of AMD devices
pub const AMD_VENDOR_ID: &str = "0x1002";

/// Where telemetry comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryTarget {
    /// Read driver sysfs files in-process
    Embedded {
        /// DRM class directory
        sysfs_root: PathBuf,
    },
    /// Talk to a telemetry daemon over gRPC
    Standalone {
        /// `host:port` of the daemon
        address: String,
        /// Channel authentication
        auth: AuthMode,
    },
}

/// Authentication of the standalone daemon channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    /// Plaintext channel
    Unauthenticated,
    /// Mutual TLS with the given certificate files
    MutualTls(TlsFiles),
}

/// Certificate files for mutual TLS with the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    /// CA certificate used to verify the daemon
    pub ca_cert: PathBuf,

    /// Client certificate presented to the daemon
    pub client_cert: PathBuf,

    /// Client private key
    pub client_key: PathBuf,

    /// Server name expected in the daemon certificate
    pub domain_name: Option<String>,
}

impl TlsFiles {
    /// Standard certificate locations under a directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            ca_cert: dir.join("rdc_cacert.pem"),
            client_cert: dir.join("rdc_client_cert.pem"),
            client_key: dir.join("rdc_client_cert.key"),
            domain_name: None,
        }
    }
}

impl Default for TlsFiles {
    fn default() -> Self {
        Self::in_dir("/etc/rdc/client/certs")
    }
}

/// Telemetry sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Telemetry source
    pub target: TelemetryTarget,

    /// Fields to watch
    pub fields: Vec<FieldId>,

    /// How often the source refreshes watched fields
    pub update_frequency: Duration,

    /// How long the source keeps samples
    pub max_keep_age: Duration,

    /// How many samples per field the source keeps
    pub max_keep_samples: u32,

    /// Devices to sample; all visible devices when `None`
    pub device_filter: Option<Vec<DeviceIndex>>,

    /// Connection timeout for the standalone daemon
    pub connection_timeout: Duration,

    /// Per-request timeout for the standalone daemon
    pub request_timeout: Duration,

    /// PCI vendor id used by the embedded source
    pub vendor_id: Option<String>,

    /// Name of the device group created on the daemon
    pub group_name: String,

    /// Name of the field group created on the daemon
    pub field_group_name: String,
}

impl SamplerConfig {
    /// Create a configuration for the given target
    pub fn new(target: TelemetryTarget) -> Self {
        Self {
            target,
            fields: DEFAULT_FIELDS.to_vec(),
            update_frequency: Duration::from_secs(10),
            max_keep_age: Duration::from_secs(3600),
            max_keep_samples: 1000,
            device_filter: None,
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            vendor_id: Some(AMD_VENDOR_ID.to_string()),
            group_name: "rdc_prometheus_plugin_group".to_string(),
            field_group_name: "rdc_prometheus_plugin_fieldgroup".to_string(),
        }
    }

    /// Embedded configuration reading the default sysfs root
    pub fn embedded() -> Self {
        Self::new(TelemetryTarget::Embedded {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
        })
    }

    /// Standalone configuration for a daemon address
    pub fn standalone(address: impl Into<String>, auth: AuthMode) -> Self {
        Self::new(TelemetryTarget::Standalone {
            address: address.into(),
            auth,
        })
    }

    /// Set the watched fields
    pub fn with_fields(mut self, fields: Vec<FieldId>) -> Self {
        self.fields = fields;
        self
    }

    /// Set the update frequency
    pub fn with_update_frequency(mut self, frequency: Duration) -> Self {
        self.update_frequency = frequency;
        self
    }

    /// Set retention bounds
    pub fn with_retention(mut self, max_keep_age: Duration, max_keep_samples: u32) -> Self {
        self.max_keep_age = max_keep_age;
        self.max_keep_samples = max_keep_samples;
        self
    }

    /// Set device filter
    pub fn with_device_filter(mut self, devices: Vec<DeviceIndex>) -> Self {
        self.device_filter = Some(devices);
        self
    }

    /// Set the PCI vendor id used for embedded enumeration
    pub fn with_vendor_id(mut self, vendor_id: Option<String>) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.update_frequency.is_zero() {
            return Err("Update frequency must be greater than zero".to_string());
        }

        if self.max_keep_samples == 0 {
            return Err("Max keep samples must be greater than zero".to_string());
        }

        if self.max_keep_age.is_zero() {
            return Err("Max keep age must be greater than zero".to_string());
        }

        if let Some(ref filter) = self.device_filter {
            if filter.is_empty() {
                return Err("Device filter must not be empty when set".to_string());
            }
        }

        match self.target {
            TelemetryTarget::Standalone { ref address, .. } => {
                if address.trim().is_empty() {
                    return Err("Telemetry daemon address must not be empty".to_string());
                }
            }
            TelemetryTarget::Embedded { ref sysfs_root } => {
                if sysfs_root.as_os_str().is_empty() {
                    return Err("Sysfs root must not be empty".to_string());
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for TelemetryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryTarget::Embedded { sysfs_root } => write!(f, "embedded ({})", sysfs_root.display()),
            TelemetryTarget::Standalone { address, auth } => match auth {
                AuthMode::Unauthenticated => write!(f, "standalone {} (unauthenticated)", address),
                AuthMode::MutualTls(_) => write!(f, "standalone {} (mutual TLS)", address),
            },
        }
    }
}
