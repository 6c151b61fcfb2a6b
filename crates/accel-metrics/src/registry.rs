//! Series registry
//!
//! One gauge family per managed field, all sharing a label schema fixed at
//! construction. Writers publish a whole cycle at once under the write side of
//! the registry's gate and scrapes encode under the read side, so a scrape sees
//! either the complete previous cycle or the complete current one.

use crate::{MetricsError, Result};
use accel_core::labels::{self, sanitize_metric_name};
use accel_core::{DeviceIndex, FieldId};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Label set carried by every series of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSchema {
    /// `device_index` only
    Device,
    /// `device_index` plus workload identity, node and bus id
    Workload,
}

impl LabelSchema {
    /// Label names in the order values are supplied
    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            LabelSchema::Device => labels::DEVICE_LABELS,
            LabelSchema::Workload => labels::WORKLOAD_LABELS,
        }
    }

    /// Whether the label space is rebuilt from scratch every cycle
    pub fn resets_each_cycle(&self) -> bool {
        matches!(self, LabelSchema::Workload)
    }
}

/// Workload labels of one enriched series
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadLabels {
    pub pod: String,
    pub namespace: String,
    pub container: String,
    pub node: String,
    pub device_bus_id: String,
}

/// One value to publish
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub field: FieldId,
    pub device: DeviceIndex,
    pub workload: Option<WorkloadLabels>,
    pub value: f64,
}

impl SeriesPoint {
    /// A point without workload labels
    pub fn new(field: FieldId, device: DeviceIndex, value: f64) -> Self {
        Self {
            field,
            device,
            workload: None,
            value,
        }
    }

    /// Attach workload labels
    pub fn with_workload(mut self, workload: WorkloadLabels) -> Self {
        self.workload = Some(workload);
        self
    }

    fn label_values(&self, schema: LabelSchema) -> Vec<String> {
        let device_index = self.device.to_string();
        match schema {
            LabelSchema::Device => vec![device_index],
            LabelSchema::Workload => {
                let w = self.workload.clone().unwrap_or_default();
                vec![device_index, w.pod, w.namespace, w.container, w.node, w.device_bus_id]
            }
        }
    }
}

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Points written to a series
    pub published: usize,
    /// Points for fields this registry does not manage
    pub unmanaged: usize,
}

/// Registry of the exported gauge families
#[derive(Debug)]
pub struct SeriesRegistry {
    registry: Registry,
    schema: LabelSchema,
    series: BTreeMap<FieldId, GaugeVec>,
    gate: RwLock<()>,
}

impl SeriesRegistry {
    /// Start building a registry
    pub fn builder() -> SeriesRegistryBuilder {
        SeriesRegistryBuilder::new()
    }

    /// Label schema of every series
    pub fn schema(&self) -> LabelSchema {
        self.schema
    }

    /// Whether a field has a series
    pub fn manages(&self, field: FieldId) -> bool {
        self.series.contains_key(&field)
    }

    /// Managed fields in code order
    pub fn fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.series.keys().copied()
    }

    /// Number of managed fields
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether no field is managed
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Replace the published values with one cycle's points
    ///
    /// With the workload schema every existing label combination is cleared
    /// first; with the device schema values are overwritten in place.
    pub async fn publish(&self, points: &[SeriesPoint]) -> PublishReport {
        let _guard = self.gate.write().await;

        if self.schema.resets_each_cycle() {
            for gauge in self.series.values() {
                gauge.reset();
            }
            // Widen the reset/repopulate window so scrapes in unit tests can land in it
            #[cfg(test)]
            tokio::task::yield_now().await;
        }

        let mut report = PublishReport::default();
        for point in points {
            let Some(gauge) = self.series.get(&point.field) else {
                report.unmanaged += 1;
                continue;
            };
            let values = point.label_values(self.schema);
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            gauge.with_label_values(&values).set(point.value);
            report.published += 1;
        }

        debug!("Published {} points ({} unmanaged)", report.published, report.unmanaged);
        report
    }

    /// Encode every family in the Prometheus text format
    pub async fn encode(&self) -> Result<String> {
        let families = {
            let _guard = self.gate.read().await;
            self.registry.gather()
        };

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| MetricsError::Export(format!("Failed to convert metrics to string: {}", e)))
    }

    /// Content type of [`SeriesRegistry::encode`] output
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

/// Builder for [`SeriesRegistry`]
#[derive(Debug, Clone)]
pub struct SeriesRegistryBuilder {
    schema: LabelSchema,
    prefix: String,
    fields: Vec<FieldId>,
    process_metrics: bool,
}

impl SeriesRegistryBuilder {
    /// Create a builder with the device schema and no fields
    pub fn new() -> Self {
        Self {
            schema: LabelSchema::Device,
            prefix: String::new(),
            fields: Vec::new(),
            process_metrics: false,
        }
    }

    /// Set the label schema
    pub fn with_schema(mut self, schema: LabelSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Prefix prepended to every series name
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Fields to create series for
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldId>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Also export the exporter's own process metrics
    pub fn with_process_metrics(mut self, enabled: bool) -> Self {
        self.process_metrics = enabled;
        self
    }

    /// Register one gauge family per field
    pub fn build(self) -> Result<SeriesRegistry> {
        let registry = Registry::new();
        let label_names = self.schema.label_names();

        let mut series = BTreeMap::new();
        for field in self.fields {
            if series.contains_key(&field) {
                continue;
            }
            let name = sanitize_metric_name(&format!("{}{}", self.prefix, field.display_name()));
            let gauge = GaugeVec::new(Opts::new(name, field.help()), label_names)?;
            registry.register(Box::new(gauge.clone()))?;
            series.insert(field, gauge);
        }

        if self.process_metrics {
            register_process_metrics(&registry)?;
        }

        info!(
            "Created {} series with {:?} labels",
            series.len(),
            label_names
        );
        Ok(SeriesRegistry {
            registry,
            schema: self.schema,
            series,
            gate: RwLock::new(()),
        })
    }
}

impl Default for SeriesRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the process collector for the current process
fn register_process_metrics(registry: &Registry) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        use prometheus::process_collector::ProcessCollector;
        registry
            .register(Box::new(ProcessCollector::for_self()))
            .map_err(|e| MetricsError::Registry(format!("Failed to register process collector: {}", e)))?;
    }
    #[cfg(not(target_os = "linux"))]
    let _ = registry;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(pod: &str, namespace: &str, bus: &str) -> WorkloadLabels {
        WorkloadLabels {
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            container: "main".to_string(),
            node: "node-a".to_string(),
            device_bus_id: bus.to_string(),
        }
    }

    #[tokio::test]
    async fn test_device_schema_publish() {
        let registry = SeriesRegistry::builder()
            .with_fields([FieldId::GPU_UTIL, FieldId::GPU_TEMP])
            .build()
            .unwrap();

        let report = registry
            .publish(&[
                SeriesPoint::new(FieldId::GPU_UTIL, DeviceIndex::new(0), 37.0),
                SeriesPoint::new(FieldId::POWER_USAGE, DeviceIndex::new(0), 1.0),
            ])
            .await;
        assert_eq!(report, PublishReport { published: 1, unmanaged: 1 });

        let text = registry.encode().await.unwrap();
        assert!(text.contains("# HELP rdc_fi_gpu_util GPU busy percent"));
        assert!(text.contains("rdc_fi_gpu_util{device_index=\"0\"} 37"));
        assert!(!text.contains("rdc_fi_power_usage"));
    }

    #[tokio::test]
    async fn test_device_schema_keeps_previous_values() {
        let registry = SeriesRegistry::builder().with_fields([FieldId::GPU_UTIL]).build().unwrap();

        registry
            .publish(&[
                SeriesPoint::new(FieldId::GPU_UTIL, DeviceIndex::new(0), 10.0),
                SeriesPoint::new(FieldId::GPU_UTIL, DeviceIndex::new(1), 20.0),
            ])
            .await;
        registry
            .publish(&[SeriesPoint::new(FieldId::GPU_UTIL, DeviceIndex::new(1), 25.0)])
            .await;

        let text = registry.encode().await.unwrap();
        assert!(text.contains("rdc_fi_gpu_util{device_index=\"0\"} 10"));
        assert!(text.contains("rdc_fi_gpu_util{device_index=\"1\"} 25"));
    }

    #[tokio::test]
    async fn test_workload_schema_drops_stale_labels() {
        let registry = SeriesRegistry::builder()
            .with_schema(LabelSchema::Workload)
            .with_fields([FieldId::GPU_UTIL])
            .build()
            .unwrap();

        registry
            .publish(&[SeriesPoint::new(FieldId::GPU_UTIL, DeviceIndex::new(0), 50.0)
                .with_workload(workload("train-7", "default", "0000:03:00.0"))])
            .await;
        registry
            .publish(&[SeriesPoint::new(FieldId::GPU_UTIL, DeviceIndex::new(0), 60.0)
                .with_workload(workload("infer-2", "ml", "0000:03:00.0"))])
            .await;

        let text = registry.encode().await.unwrap();
        assert!(!text.contains("train-7"));
        assert!(text.contains(
            "rdc_fi_gpu_util{container=\"main\",device_bus_id=\"0000:03:00.0\",device_index=\"0\",namespace=\"ml\",node=\"node-a\",pod=\"infer-2\"} 60"
        ));
    }

    #[tokio::test]
    async fn test_workload_schema_fills_missing_labels() {
        let registry = SeriesRegistry::builder()
            .with_schema(LabelSchema::Workload)
            .with_fields([FieldId::GPU_UTIL])
            .build()
            .unwrap();

        registry
            .publish(&[SeriesPoint::new(FieldId::GPU_UTIL, DeviceIndex::new(2), 5.0)])
            .await;

        let text = registry.encode().await.unwrap();
        assert!(text.contains("pod=\"\""));
        assert!(text.contains("device_index=\"2\""));
    }

    #[tokio::test]
    async fn test_prefix_and_duplicate_fields() {
        let registry = SeriesRegistry::builder()
            .with_prefix("amd_")
            .with_fields([FieldId::GPU_UTIL, FieldId::GPU_UTIL, FieldId::GPU_TEMP])
            .build()
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.manages(FieldId::GPU_TEMP));

        registry
            .publish(&[SeriesPoint::new(FieldId::GPU_TEMP, DeviceIndex::new(0), 45000.0)])
            .await;
        let text = registry.encode().await.unwrap();
        assert!(text.contains("amd_rdc_fi_gpu_temp{device_index=\"0\"} 45000"));
    }

    #[tokio::test]
    async fn test_process_metrics_toggle() {
        let without = SeriesRegistry::builder().with_fields([FieldId::GPU_UTIL]).build().unwrap();
        assert!(!without.encode().await.unwrap().contains("process_"));

        let with = SeriesRegistry::builder()
            .with_fields([FieldId::GPU_UTIL])
            .with_process_metrics(true)
            .build()
            .unwrap();
        #[cfg(target_os = "linux")]
        assert!(with.encode().await.unwrap().contains("process_"));
        #[cfg(not(target_os = "linux"))]
        let _ = with;
    }

    #[tokio::test]
    async fn test_scrape_never_lands_between_reset_and_publish() {
        let registry = std::sync::Arc::new(
            SeriesRegistry::builder()
                .with_schema(LabelSchema::Workload)
                .with_fields([FieldId::GPU_UTIL])
                .build()
                .unwrap(),
        );
        let point = |pod: &str| {
            SeriesPoint::new(FieldId::GPU_UTIL, DeviceIndex::new(0), 1.0)
                .with_workload(workload(pod, "default", "0000:03:00.0"))
        };
        registry.publish(&[point("even")]).await;

        let writer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for cycle in 0..100 {
                    let pod = if cycle % 2 == 0 { "even" } else { "odd" };
                    registry.publish(&[point(pod)]).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..100 {
            let text = registry.encode().await.unwrap();
            let series = text.lines().filter(|l| l.starts_with("rdc_fi_gpu_util{")).count();
            assert_eq!(series, 1, "scrape saw a partial cycle:\n{}", text);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    #[test]
    fn test_label_schema_names() {
        assert_eq!(LabelSchema::Device.label_names(), &["device_index"]);
        assert_eq!(LabelSchema::Workload.label_names().len(), 6);
        assert!(LabelSchema::Workload.resets_each_cycle());
        assert!(!LabelSchema::Device.resets_each_cycle());
    }
}
