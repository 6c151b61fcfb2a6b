//! Command line interface of the exporter binary

use crate::config::ExporterConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "accel-exporter")]
#[command(about = "Prometheus exporter for accelerator telemetry with Kubernetes workload labels")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Exposition port
    #[arg(long = "listen_port", value_name = "PORT")]
    pub listen_port: Option<u16>,

    /// Read telemetry in-process instead of from the daemon
    #[arg(long = "rdc_embedded")]
    pub rdc_embedded: bool,

    /// Telemetry daemon address
    #[arg(long = "rdc_ip_port", value_name = "HOST:PORT")]
    pub rdc_ip_port: Option<String>,

    /// Plaintext channel to the telemetry daemon
    #[arg(long = "rdc_unauth")]
    pub rdc_unauth: bool,

    /// Directory holding the daemon client certificates
    #[arg(long = "rdc_cert_dir", value_name = "DIR")]
    pub rdc_cert_dir: Option<PathBuf>,

    /// Field update frequency in seconds
    #[arg(long = "rdc_update_freq", value_name = "SECS")]
    pub rdc_update_freq: Option<u64>,

    /// Retention age in seconds
    #[arg(long = "rdc_max_keep_age", value_name = "SECS")]
    pub rdc_max_keep_age: Option<u64>,

    /// Retention sample cap
    #[arg(long = "rdc_max_keep_samples", value_name = "N")]
    pub rdc_max_keep_samples: Option<u32>,

    /// Field allow-list
    #[arg(long = "rdc_fields", value_name = "NAME", num_args = 1..)]
    pub rdc_fields: Option<Vec<String>>,

    /// File with one field name per line
    #[arg(long = "rdc_fields_file", value_name = "FILE")]
    pub rdc_fields_file: Option<PathBuf>,

    /// Device allow-list
    #[arg(long = "rdc_gpu_indexes", value_name = "N", num_args = 1..)]
    pub rdc_gpu_indexes: Option<Vec<u32>>,

    /// Export the exporter's own process metrics
    #[arg(long = "enable_plugin_monitoring")]
    pub enable_plugin_monitoring: bool,

    /// Attach pod, namespace and container labels
    #[arg(long = "enable_kubernetes_integration")]
    pub enable_kubernetes_integration: bool,

    /// Persisted device map
    #[arg(long = "device_map", value_name = "FILE")]
    pub device_map: Option<PathBuf>,

    /// Kubelet pod-resources socket
    #[arg(long = "kubelet_socket", value_name = "PATH")]
    pub kubelet_socket: Option<PathBuf>,

    /// Accelerator resource class
    #[arg(long = "resource_name", value_name = "NAME")]
    pub resource_name: Option<String>,

    /// Value of the node label
    #[arg(long = "node_name", env = "NODE_NAME", value_name = "NAME")]
    pub node_name: Option<String>,

    /// Prefix prepended to every series name
    #[arg(long = "prefix", env = "PREFIX", value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Pause between cycles in seconds
    #[arg(long = "cycle_interval", value_name = "SECS")]
    pub cycle_interval: Option<u64>,

    /// Log level
    #[arg(long = "log_level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long = "log_format", value_name = "FORMAT")]
    pub log_format: Option<String>,
}

impl Cli {
    /// Load the configuration file, if any, and apply the flags on top
    pub fn load_config(&self) -> crate::Result<ExporterConfig> {
        let mut config = match self.config {
            Some(ref path) => ExporterConfig::from_file(path)?,
            None => ExporterConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Override configuration values with the flags that were given
    pub fn apply(&self, config: &mut ExporterConfig) {
        if let Some(port) = self.listen_port {
            config.exposition.listen_port = port;
        }
        if self.enable_plugin_monitoring {
            config.exposition.enable_plugin_monitoring = true;
        }

        let telemetry = &mut config.telemetry;
        if self.rdc_embedded {
            telemetry.embedded = true;
        }
        if let Some(ref address) = self.rdc_ip_port {
            telemetry.address = address.clone();
        }
        if self.rdc_unauth {
            telemetry.unauthenticated = true;
        }
        if let Some(ref dir) = self.rdc_cert_dir {
            telemetry.cert_dir = dir.clone();
        }
        if let Some(secs) = self.rdc_update_freq {
            telemetry.update_frequency_seconds = secs;
        }
        if let Some(secs) = self.rdc_max_keep_age {
            telemetry.max_keep_age_seconds = secs;
        }
        if let Some(samples) = self.rdc_max_keep_samples {
            telemetry.max_keep_samples = samples;
        }
        if let Some(ref fields) = self.rdc_fields {
            telemetry.fields = Some(fields.clone());
        }
        if let Some(ref file) = self.rdc_fields_file {
            telemetry.fields_file = Some(file.clone());
        }
        if let Some(ref indexes) = self.rdc_gpu_indexes {
            telemetry.gpu_indexes = Some(indexes.clone());
        }

        let kubernetes = &mut config.kubernetes;
        if self.enable_kubernetes_integration {
            kubernetes.enabled = true;
        }
        if let Some(ref path) = self.device_map {
            kubernetes.device_map = path.clone();
        }
        if let Some(ref path) = self.kubelet_socket {
            kubernetes.kubelet_socket = path.clone();
        }
        if let Some(ref name) = self.resource_name {
            kubernetes.resource_name = name.clone();
        }
        if let Some(ref node) = self.node_name {
            kubernetes.node_name = node.clone();
        }

        if let Some(ref prefix) = self.prefix {
            config.engine.prefix = prefix.clone();
        }
        if let Some(secs) = self.cycle_interval {
            config.engine.cycle_interval_seconds = secs;
        }

        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref format) = self.log_format {
            config.logging.format = format.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "accel-exporter",
            "--listen_port",
            "9400",
            "--rdc_embedded",
            "--rdc_fields",
            "RDC_FI_GPU_UTIL",
            "RDC_FI_GPU_TEMP",
            "--rdc_gpu_indexes",
            "0",
            "2",
            "--enable_kubernetes_integration",
            "--node_name",
            "node-a",
            "--log_format",
            "json",
        ])
        .unwrap();

        let mut config = ExporterConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.exposition.listen_port, 9400);
        assert!(config.telemetry.embedded);
        assert_eq!(
            config.telemetry.fields,
            Some(vec!["RDC_FI_GPU_UTIL".to_string(), "RDC_FI_GPU_TEMP".to_string()])
        );
        assert_eq!(config.telemetry.gpu_indexes, Some(vec![0, 2]));
        assert!(config.kubernetes.enabled);
        assert_eq!(config.kubernetes.node_name, "node-a");
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_override_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("exporter.yaml");
        std::fs::write(
            &config_path,
            "exposition:\n  listen_port: 9400\nengine:\n  cycle_interval_seconds: 5\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "accel-exporter",
            "--config",
            config_path.to_str().unwrap(),
            "--cycle_interval",
            "2",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();

        assert_eq!(config.exposition.listen_port, 9400);
        assert_eq!(config.engine.cycle_interval_seconds, 2);
    }

    #[test]
    fn test_invalid_flag_value_fails_validation() {
        let cli = Cli::try_parse_from(["accel-exporter", "--log_level", "verbose"]).unwrap();
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn test_absent_flags_leave_config_untouched() {
        let cli = Cli::default();
        let mut config = ExporterConfig::default();
        config.telemetry.unauthenticated = true;
        cli.apply(&mut config);
        assert!(config.telemetry.unauthenticated);
        assert_eq!(config.exposition.listen_port, 5000);
    }
}
