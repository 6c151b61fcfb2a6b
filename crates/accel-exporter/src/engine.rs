//! Correlation engine
//!
//! One cycle samples telemetry, drops fields without a series, optionally joins
//! every sample with the workload that holds its device, and publishes the
//! result to the series registry in a single step.

use crate::{ExporterError, Result};
use accel_core::{FieldSample, IdentityMap, WorkloadIdentity};
use accel_kube::IdentityResolver;
use accel_metrics::{LabelSchema, SeriesPoint, SeriesRegistry, WorkloadLabels};
use accel_telemetry::{BusMap, SampleSource};
use std::sync::Arc;
use tracing::debug;

/// Workload attribution inputs
pub struct Enrichment {
    bus_map: BusMap,
    resolver: Arc<dyn IdentityResolver>,
    node_name: String,
}

impl Enrichment {
    pub fn new(bus_map: BusMap, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            bus_map,
            resolver,
            node_name: String::new(),
        }
    }

    /// Value of the `node` label
    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    fn labels(&self, sample: &FieldSample, identities: &IdentityMap) -> (WorkloadLabels, bool) {
        let bus_id = self.bus_map.lookup(sample.device);
        let identity = bus_id.and_then(|id| identities.get(id));
        let attributed = identity.is_some();
        let WorkloadIdentity {
            namespace,
            pod,
            container,
        } = identity.cloned().unwrap_or_default();

        let labels = WorkloadLabels {
            pod,
            namespace,
            container,
            node: self.node_name.clone(),
            device_bus_id: bus_id.map(|id| id.to_string()).unwrap_or_default(),
        };
        (labels, attributed)
    }
}

/// Counters of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Samples returned by the sampler
    pub samples: usize,
    /// Values written to a series
    pub published: usize,
    /// Samples dropped because their field has no series
    pub unmanaged: usize,
    /// Entries in the identity map
    pub identities: usize,
    /// Published values carrying a workload identity
    pub attributed: usize,
}

/// Joins telemetry with workload identity and publishes it
pub struct CorrelationEngine {
    registry: Arc<SeriesRegistry>,
    sampler: Box<dyn SampleSource>,
    enrichment: Option<Enrichment>,
}

impl CorrelationEngine {
    /// Create an engine; enrichment requires a workload-schema registry
    pub fn new(
        registry: Arc<SeriesRegistry>,
        sampler: Box<dyn SampleSource>,
        enrichment: Option<Enrichment>,
    ) -> Result<Self> {
        let expected = if enrichment.is_some() {
            LabelSchema::Workload
        } else {
            LabelSchema::Device
        };
        if registry.schema() != expected {
            return Err(ExporterError::Config(format!(
                "Series registry uses the {:?} label schema but the engine needs {:?}",
                registry.schema(),
                expected
            )));
        }

        Ok(Self {
            registry,
            sampler,
            enrichment,
        })
    }

    /// Registry the engine publishes to
    pub fn registry(&self) -> &Arc<SeriesRegistry> {
        &self.registry
    }

    /// Whether workload labels are attached
    pub fn is_enriched(&self) -> bool {
        self.enrichment.is_some()
    }

    /// Run one sample → enrich → publish cycle
    ///
    /// Sampler errors are returned; resolver failures only leave the identity
    /// labels empty.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let samples = self.sampler.poll().await?;

        let mut report = CycleReport {
            samples: samples.len(),
            ..Default::default()
        };

        let managed: Vec<&FieldSample> = samples
            .iter()
            .filter(|sample| self.registry.manages(sample.field))
            .collect();
        report.unmanaged = samples.len() - managed.len();

        let points: Vec<SeriesPoint> = match self.enrichment {
            None => managed
                .iter()
                .map(|s| SeriesPoint::new(s.field, s.device, s.value.as_f64()))
                .collect(),
            Some(ref enrichment) => {
                let identities = enrichment.resolver.resolve().await;
                report.identities = identities.len();

                managed
                    .iter()
                    .map(|s| {
                        let (labels, attributed) = enrichment.labels(s, &identities);
                        if attributed {
                            report.attributed += 1;
                        }
                        SeriesPoint::new(s.field, s.device, s.value.as_f64()).with_workload(labels)
                    })
                    .collect()
            }
        };

        report.published = self.registry.publish(&points).await.published;

        debug!(
            "Cycle: {} samples, {} published, {} unmanaged, {} identities, {} attributed",
            report.samples, report.published, report.unmanaged, report.identities, report.attributed
        );
        Ok(report)
    }

    /// Release the sampler's upstream registrations
    pub async fn close(&mut self) -> Result<()> {
        self.sampler.close().await?;
        Ok(())
    }
}
