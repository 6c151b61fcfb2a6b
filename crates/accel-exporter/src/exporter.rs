//! Exporter runtime
//!
//! Wires the sampler, the optional workload attribution and the metrics
//! endpoint together, then drives the poll loop until a termination signal.

use crate::config::ExporterConfig;
use crate::engine::{CorrelationEngine, Enrichment};
use crate::fields::managed_fields;
use crate::poll::PollLoop;
use crate::{ExporterError, Result};
use accel_core::FieldId;
use accel_kube::{IdentityResolver, KubeletClient, WorkloadResolver};
use accel_metrics::{LabelSchema, MetricsEndpoint, SeriesRegistry};
use accel_telemetry::{BusMap, SampleSource, SysfsDeviceEnumerator, TelemetrySampler};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// The running exporter
pub struct Exporter {
    config: ExporterConfig,
    registry: Arc<SeriesRegistry>,
    endpoint: MetricsEndpoint,
    poll: PollLoop,
}

impl Exporter {
    /// Connect to the telemetry source and the kubelet as configured
    pub async fn connect(config: ExporterConfig) -> Result<Self> {
        config.validate()?;

        let fields = managed_fields(
            config.telemetry.fields.as_deref(),
            config.telemetry.fields_file.as_deref(),
        );

        let enrichment = if config.kubernetes.enabled {
            let bus_map = load_bus_map(&config)?;
            let client = KubeletClient::new(&config.kubernetes.kubelet_socket)
                .with_request_timeout(Duration::from_secs(config.kubernetes.request_timeout_seconds));
            let resolver: Arc<dyn IdentityResolver> = Arc::new(
                WorkloadResolver::new(Arc::new(client)).with_resource_name(&config.kubernetes.resource_name),
            );
            info!(
                "Attributing {} devices via {}",
                config.kubernetes.resource_name,
                config.kubernetes.kubelet_socket.display()
            );
            Some(Enrichment::new(bus_map, resolver).with_node_name(&config.kubernetes.node_name))
        } else {
            None
        };

        let sampler = TelemetrySampler::connect(config.sampler_config(fields.clone())).await?;
        Self::assemble(config, fields, Box::new(sampler), enrichment)
    }

    /// Build the exporter around an already connected sampler
    pub fn assemble(
        config: ExporterConfig,
        fields: Vec<FieldId>,
        sampler: Box<dyn SampleSource>,
        enrichment: Option<Enrichment>,
    ) -> Result<Self> {
        let schema = if enrichment.is_some() {
            LabelSchema::Workload
        } else {
            LabelSchema::Device
        };

        let registry = Arc::new(
            SeriesRegistry::builder()
                .with_schema(schema)
                .with_prefix(&config.engine.prefix)
                .with_fields(fields)
                .with_process_metrics(config.exposition.enable_plugin_monitoring)
                .build()?,
        );

        let engine = CorrelationEngine::new(registry.clone(), sampler, enrichment)?;
        let poll = PollLoop::new(engine)
            .with_startup_delay(config.startup_delay())
            .with_interval(config.cycle_interval());
        let endpoint = MetricsEndpoint::new(registry.clone(), config.bind_addr());

        Ok(Self {
            config,
            registry,
            endpoint,
            poll,
        })
    }

    /// Get the exporter configuration
    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// Get the series registry
    pub fn registry(&self) -> &Arc<SeriesRegistry> {
        &self.registry
    }

    /// Serve metrics and run cycles until SIGINT/SIGTERM or a sampler failure
    pub async fn run(&mut self) -> Result<()> {
        self.endpoint.start().await?;
        info!("Exporter started, metrics at {}", self.endpoint.metrics_url());

        let outcome = self.poll.run_until(wait_for_termination()).await;
        if let Err(ref e) = outcome {
            error!("Exporter stopping after error: {}", e);
        }

        self.stop().await;
        outcome
    }

    /// Stop serving and release the telemetry source
    pub async fn stop(&mut self) {
        info!("Stopping exporter");
        self.endpoint.stop().await;
        if let Err(e) = self.poll.engine_mut().close().await {
            warn!("Failed to release telemetry source: {}", e);
        }
        info!("Exporter stopped");
    }
}

/// Load the persisted bus map, or enumerate devices when no file exists
pub fn load_bus_map(config: &ExporterConfig) -> Result<BusMap> {
    let path = &config.kubernetes.device_map;
    if path.exists() {
        return Ok(BusMap::load(path)?);
    }

    warn!("Device map {} not found; enumerating devices", path.display());
    let enumerator = SysfsDeviceEnumerator::new(&config.telemetry.sysfs_root);
    let map = BusMap::build(&enumerator).map_err(|e| {
        error!("Cannot build the device map: {}", e);
        ExporterError::from(e)
    })?;
    Ok(map)
}

/// Wait for termination signals (Unix)
#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Cannot install signal handlers ({}); falling back to Ctrl+C", e);
            let _ = signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
}

/// Wait for termination signals (Windows)
#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = signal::ctrl_c().await;
}
