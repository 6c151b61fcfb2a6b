//! Configuration management for the exporter

use crate::{ExporterError, Result};
use accel_kube::DEFAULT_KUBELET_SOCKET;
use accel_telemetry::config::{DEFAULT_DAEMON_ADDRESS, DEFAULT_SYSFS_ROOT};
use accel_telemetry::{AuthMode, SamplerConfig, TelemetryTarget, TlsFiles};
use accel_core::{DeviceIndex, FieldId, DEFAULT_RESOURCE_NAME};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for the exporter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// HTTP exposition
    pub exposition: ExpositionConfig,

    /// Telemetry source and sampling
    pub telemetry: TelemetryConfig,

    /// Workload attribution
    pub kubernetes: KubernetesConfig,

    /// Correlation engine cadence and naming
    pub engine: EngineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP exposition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpositionConfig {
    /// Listen address
    pub bind_address: IpAddr,

    /// Listen port
    pub listen_port: u16,

    /// Export the exporter's own process metrics
    pub enable_plugin_monitoring: bool,
}

/// Telemetry source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Read sysfs in-process instead of talking to the daemon
    pub embedded: bool,

    /// Daemon address in standalone mode
    pub address: String,

    /// Use a plaintext channel to the daemon
    pub unauthenticated: bool,

    /// Directory holding the daemon client certificates
    pub cert_dir: PathBuf,

    /// DRM class directory used in embedded mode and for device map generation
    pub sysfs_root: PathBuf,

    /// Field update frequency (seconds)
    pub update_frequency_seconds: u64,

    /// Retention age (seconds)
    pub max_keep_age_seconds: u64,

    /// Retention sample cap
    pub max_keep_samples: u32,

    /// Field allow-list by name
    pub fields: Option<Vec<String>>,

    /// File with one field name per line
    pub fields_file: Option<PathBuf>,

    /// Device allow-list
    pub gpu_indexes: Option<Vec<u32>>,
}

/// Workload attribution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Attach workload identity labels
    pub enabled: bool,

    /// Persisted device index → bus id map
    pub device_map: PathBuf,

    /// Kubelet pod-resources socket
    pub kubelet_socket: PathBuf,

    /// Accelerator resource class
    pub resource_name: String,

    /// Value of the `node` label
    pub node_name: String,

    /// Kubelet request timeout (seconds)
    pub request_timeout_seconds: u64,
}

/// Correlation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause between cycles (seconds)
    pub cycle_interval_seconds: u64,

    /// Pause before the first cycle (seconds)
    pub startup_delay_seconds: u64,

    /// Prefix prepended to every series name
    pub prefix: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Show target in logs
    pub show_target: bool,

    /// Show thread IDs in logs
    pub show_thread_ids: bool,

    /// Show line numbers in logs
    pub show_line_numbers: bool,
}

impl Default for ExpositionConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 5000,
            enable_plugin_monitoring: false,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            embedded: false,
            address: DEFAULT_DAEMON_ADDRESS.to_string(),
            unauthenticated: false,
            cert_dir: PathBuf::from("/etc/rdc/client/certs"),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            update_frequency_seconds: 10,
            max_keep_age_seconds: 3600,
            max_keep_samples: 1000,
            fields: None,
            fields_file: None,
            gpu_indexes: None,
        }
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_map: PathBuf::from("/data/devices.json"),
            kubelet_socket: PathBuf::from(DEFAULT_KUBELET_SOCKET),
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
            node_name: String::new(),
            request_timeout_seconds: 10,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_seconds: 1,
            startup_delay_seconds: 3,
            prefix: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            show_target: true,
            show_thread_ids: false,
            show_line_numbers: false,
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExporterError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ExporterConfig = serde_yaml::from_str(&content)
            .map_err(|e| ExporterError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| ExporterError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ExporterError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.exposition.listen_port == 0 {
            return Err(ExporterError::Config("Listen port must be greater than 0".to_string()));
        }

        if !self.telemetry.embedded && self.telemetry.address.trim().is_empty() {
            return Err(ExporterError::Config(
                "Telemetry daemon address cannot be empty in standalone mode".to_string(),
            ));
        }

        if self.telemetry.update_frequency_seconds == 0 {
            return Err(ExporterError::Config("Update frequency must be greater than 0".to_string()));
        }

        if self.telemetry.max_keep_age_seconds == 0 || self.telemetry.max_keep_samples == 0 {
            return Err(ExporterError::Config("Retention bounds must be greater than 0".to_string()));
        }

        if let Some(ref indexes) = self.telemetry.gpu_indexes {
            if indexes.is_empty() {
                return Err(ExporterError::Config("GPU index list cannot be empty".to_string()));
            }
        }

        if self.kubernetes.enabled && self.kubernetes.resource_name.trim().is_empty() {
            return Err(ExporterError::Config("Resource name cannot be empty".to_string()));
        }

        // Validate logging configuration
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(ExporterError::Config(format!("Invalid log level: {}", self.logging.level))),
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            _ => return Err(ExporterError::Config(format!("Invalid log format: {}", self.logging.format))),
        }

        Ok(())
    }

    /// Exposition listen address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.exposition.bind_address, self.exposition.listen_port)
    }

    /// Pause between cycles
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.engine.cycle_interval_seconds)
    }

    /// Pause before the first cycle
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.engine.startup_delay_seconds)
    }

    /// Sampler configuration for the given managed fields
    pub fn sampler_config(&self, fields: Vec<FieldId>) -> SamplerConfig {
        let telemetry = &self.telemetry;
        let target = if telemetry.embedded {
            TelemetryTarget::Embedded {
                sysfs_root: telemetry.sysfs_root.clone(),
            }
        } else {
            let auth = if telemetry.unauthenticated {
                AuthMode::Unauthenticated
            } else {
                AuthMode::MutualTls(TlsFiles::in_dir(&telemetry.cert_dir))
            };
            TelemetryTarget::Standalone {
                address: telemetry.address.clone(),
                auth,
            }
        };

        let mut config = SamplerConfig::new(target)
            .with_fields(fields)
            .with_update_frequency(Duration::from_secs(telemetry.update_frequency_seconds))
            .with_retention(
                Duration::from_secs(telemetry.max_keep_age_seconds),
                telemetry.max_keep_samples,
            );
        if let Some(ref indexes) = telemetry.gpu_indexes {
            config = config.with_device_filter(indexes.iter().copied().map(DeviceIndex::new).collect());
        }
        config
    }
}
