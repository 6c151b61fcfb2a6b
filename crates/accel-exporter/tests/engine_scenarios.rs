//! End-to-end cycles of the correlation engine over a mock telemetry source

use accel_core::{BusId, DeviceIndex, FieldId, FieldValue, IdentityMap, WorkloadIdentity};
use accel_exporter::fields::managed_fields;
use accel_exporter::{CorrelationEngine, Enrichment, PollLoop, Sleeper};
use accel_kube::{AllocationSource, IdentityResolver, KubeError, PodAllocation, WorkloadResolver};
use accel_metrics::{LabelSchema, SeriesRegistry};
use accel_telemetry::enumerate::testing::add_card;
use accel_telemetry::mock::MockTelemetrySource;
use accel_telemetry::{BusMap, SamplerConfig, SysfsDeviceEnumerator, TelemetrySampler};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Resolver whose answer the test controls
#[derive(Default)]
struct ScriptedResolver {
    identities: Mutex<IdentityMap>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    fn assign(&self, bus_id: &str, identity: WorkloadIdentity) {
        self.identities.lock().unwrap().insert(BusId::canonical(bus_id), identity);
    }

    fn clear(&self) {
        self.identities.lock().unwrap().clear();
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityResolver for ScriptedResolver {
    async fn resolve(&self) -> IdentityMap {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.identities.lock().unwrap().clone()
    }
}

struct UnreachableKubelet;

#[async_trait]
impl AllocationSource for UnreachableKubelet {
    async fn list(&self) -> accel_kube::Result<Vec<PodAllocation>> {
        Err(KubeError::SocketNotFound(PathBuf::from("/var/lib/kubelet/pod-resources/kubelet.sock")))
    }
}

struct PanickingKubelet;

#[async_trait]
impl AllocationSource for PanickingKubelet {
    async fn list(&self) -> accel_kube::Result<Vec<PodAllocation>> {
        panic!("allocation query blew up");
    }
}

#[derive(Clone, Default)]
struct RecordingSleeper(Arc<Mutex<Vec<Duration>>>);

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

fn bus_map() -> BusMap {
    BusMap::from_entries([
        (DeviceIndex::new(0), "0000:01:00.0"),
        (DeviceIndex::new(1), "0000:02:00.0"),
    ])
}

fn registry(schema: LabelSchema, fields: Vec<FieldId>) -> Arc<SeriesRegistry> {
    Arc::new(
        SeriesRegistry::builder()
            .with_schema(schema)
            .with_fields(fields)
            .build()
            .unwrap(),
    )
}

async fn sampler(source: &MockTelemetrySource, fields: Vec<FieldId>) -> TelemetrySampler {
    TelemetrySampler::with_source(Box::new(source.clone()), &SamplerConfig::embedded().with_fields(fields))
        .await
        .unwrap()
}

/// Mock with devices 0 and 1 reporting GPU_UTIL 42 and 5
async fn two_devices() -> MockTelemetrySource {
    let source = MockTelemetrySource::new([0, 1]);
    source.set_value(0, FieldId::GPU_UTIL, FieldValue::Integer(42)).await;
    source.set_value(1, FieldId::GPU_UTIL, FieldValue::Integer(5)).await;
    source
}

async fn enriched_engine(source: &MockTelemetrySource, resolver: Arc<dyn IdentityResolver>) -> CorrelationEngine {
    let enrichment = Enrichment::new(bus_map(), resolver).with_node_name("node-a");
    CorrelationEngine::new(
        registry(LabelSchema::Workload, vec![FieldId::GPU_UTIL]),
        Box::new(sampler(source, vec![FieldId::GPU_UTIL]).await),
        Some(enrichment),
    )
    .unwrap()
}

fn util_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|line| line.starts_with("rdc_fi_gpu_util{")).collect()
}

#[tokio::test]
async fn test_two_device_scenario_and_reassignment() {
    let source = two_devices().await;
    let resolver = Arc::new(ScriptedResolver::default());
    resolver.assign("0000:01:00.0", WorkloadIdentity::new("default", "train-7", "gpu"));

    let mut engine = enriched_engine(&source, resolver.clone()).await;

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.samples, 2);
    assert_eq!(report.published, 2);
    assert_eq!(report.attributed, 1);

    let text = engine.registry().encode().await.unwrap();
    assert_eq!(
        util_lines(&text),
        vec![
            "rdc_fi_gpu_util{container=\"\",device_bus_id=\"0000:02:00.0\",device_index=\"1\",namespace=\"\",node=\"node-a\",pod=\"\"} 5",
            "rdc_fi_gpu_util{container=\"gpu\",device_bus_id=\"0000:01:00.0\",device_index=\"0\",namespace=\"default\",node=\"node-a\",pod=\"train-7\"} 42",
        ]
    );

    // Device 0 goes offline, device 1 is handed to another workload
    source.set_offline(0, true).await;
    resolver.clear();
    resolver.assign("0000:02:00.0", WorkloadIdentity::new("ml", "infer-2", "main"));

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.published, 1);

    let text = engine.registry().encode().await.unwrap();
    assert_eq!(
        util_lines(&text),
        vec![
            "rdc_fi_gpu_util{container=\"main\",device_bus_id=\"0000:02:00.0\",device_index=\"1\",namespace=\"ml\",node=\"node-a\",pod=\"infer-2\"} 5",
        ]
    );
    assert!(!text.contains("device_index=\"0\""));
    assert!(!text.contains("train-7"));
}

#[tokio::test]
async fn test_resolver_called_once_per_cycle() {
    let source = MockTelemetrySource::with_default_values(2);
    let resolver = Arc::new(ScriptedResolver::default());
    let enrichment = Enrichment::new(bus_map(), resolver.clone());
    let fields = vec![FieldId::GPU_UTIL, FieldId::GPU_TEMP, FieldId::POWER_USAGE];
    let mut engine = CorrelationEngine::new(
        registry(LabelSchema::Workload, fields.clone()),
        Box::new(sampler(&source, fields).await),
        Some(enrichment),
    )
    .unwrap();

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.published, 6);
    assert_eq!(resolver.calls(), 1);

    engine.run_cycle().await.unwrap();
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test]
async fn test_unreachable_kubelet_keeps_values() {
    let source = two_devices().await;
    let resolver = Arc::new(WorkloadResolver::new(Arc::new(UnreachableKubelet)));
    let mut engine = enriched_engine(&source, resolver).await;

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(report.identities, 0);

    let text = engine.registry().encode().await.unwrap();
    assert!(text.contains(
        "rdc_fi_gpu_util{container=\"\",device_bus_id=\"0000:01:00.0\",device_index=\"0\",namespace=\"\",node=\"node-a\",pod=\"\"} 42"
    ));
    assert!(text.contains(
        "rdc_fi_gpu_util{container=\"\",device_bus_id=\"0000:02:00.0\",device_index=\"1\",namespace=\"\",node=\"node-a\",pod=\"\"} 5"
    ));
}

#[tokio::test]
async fn test_panicking_lookup_keeps_values() {
    let source = two_devices().await;
    let resolver = Arc::new(WorkloadResolver::new(Arc::new(PanickingKubelet)));
    let mut engine = enriched_engine(&source, resolver).await;

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(report.attributed, 0);
}

#[tokio::test]
async fn test_no_stale_labels_across_cycles() {
    let source = MockTelemetrySource::with_default_values(2);
    let resolver = Arc::new(ScriptedResolver::default());
    let mut engine = enriched_engine(&source, resolver.clone()).await;

    let owners = [
        WorkloadIdentity::new("a", "pod-a", "c"),
        WorkloadIdentity::new("b", "pod-b", "c"),
        WorkloadIdentity::new("c", "pod-c", "c"),
    ];
    for (cycle, owner) in owners.iter().enumerate() {
        resolver.clear();
        resolver.assign("0000:01:00.0", owner.clone());
        source.set_offline(1, cycle % 2 == 1).await;

        engine.run_cycle().await.unwrap();
        let text = engine.registry().encode().await.unwrap();
        let lines = util_lines(&text);

        let expected_devices = if cycle % 2 == 1 { 1 } else { 2 };
        assert_eq!(lines.len(), expected_devices);
        assert_eq!(lines.iter().filter(|l| l.contains("device_index=\"0\"")).count(), 1);
        for stale in owners.iter().filter(|o| *o != owner) {
            assert!(!text.contains(&format!("pod=\"{}\"", stale.pod)));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scrapes_never_see_a_mixed_cycle() {
    let source = two_devices().await;
    let resolver = Arc::new(ScriptedResolver::default());
    let mut engine = enriched_engine(&source, resolver.clone()).await;
    engine.run_cycle().await.unwrap();
    let registry = engine.registry().clone();

    let writer = tokio::spawn(async move {
        for cycle in 0..500 {
            resolver.clear();
            let pod = if cycle % 2 == 0 { "even" } else { "odd" };
            resolver.assign("0000:01:00.0", WorkloadIdentity::new("ns", pod, "c"));
            engine.run_cycle().await.unwrap();
        }
    });

    let scrapers: Vec<_> = (0..3)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let text = registry.encode().await.unwrap();
                    let lines = util_lines(&text);
                    assert_eq!(lines.len(), 2, "scrape saw a partial cycle:\n{}", text);
                    assert_eq!(lines.iter().filter(|l| l.contains("device_index=\"0\"")).count(), 1);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for scraper in scrapers {
        scraper.await.unwrap();
    }
}

#[tokio::test]
async fn test_plain_mode_overwrites_in_place() {
    let source = two_devices().await;
    let mut engine = CorrelationEngine::new(
        registry(LabelSchema::Device, vec![FieldId::GPU_UTIL]),
        Box::new(sampler(&source, vec![FieldId::GPU_UTIL]).await),
        None,
    )
    .unwrap();

    engine.run_cycle().await.unwrap();
    source.set_value(0, FieldId::GPU_UTIL, FieldValue::Integer(99)).await;
    engine.run_cycle().await.unwrap();

    let text = engine.registry().encode().await.unwrap();
    assert_eq!(
        util_lines(&text),
        vec![
            "rdc_fi_gpu_util{device_index=\"0\"} 99",
            "rdc_fi_gpu_util{device_index=\"1\"} 5",
        ]
    );
}

#[tokio::test]
async fn test_unknown_allow_list_names_are_excluded() {
    let names = vec![
        "RDC_FI_GPU_UTIL".to_string(),
        "RDC_FI_NOT_A_FIELD".to_string(),
        "RDC_FI_GPU_TEMP".to_string(),
    ];
    let fields = managed_fields(Some(&names), None);
    assert_eq!(fields, vec![FieldId::GPU_UTIL, FieldId::GPU_TEMP]);

    let source = MockTelemetrySource::with_default_values(1);
    let mut engine = CorrelationEngine::new(
        registry(LabelSchema::Device, fields.clone()),
        Box::new(sampler(&source, fields).await),
        None,
    )
    .unwrap();
    engine.run_cycle().await.unwrap();

    let text = engine.registry().encode().await.unwrap();
    assert!(text.contains("rdc_fi_gpu_util{device_index=\"0\"} 45"));
    assert!(text.contains("rdc_fi_gpu_temp{device_index=\"0\"} 65000"));
    assert!(!text.contains("rdc_fi_power_usage"));
}

#[test]
fn test_bus_map_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let drm = temp_dir.path().join("drm");
    add_card(&drm, 0, "0x1002", "0000:03:00.0");
    add_card(&drm, 1, "0x1002", "0000:C1:00.0");
    add_card(&drm, 2, "0x8086", "0000:00:02.0");

    let built = BusMap::build(&SysfsDeviceEnumerator::new(&drm)).unwrap();
    let path = temp_dir.path().join("data").join("devices.json");
    built.save(&path).unwrap();

    let loaded = BusMap::load(&path).unwrap();
    assert_eq!(loaded, built);
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.lookup(DeviceIndex::new(0)).unwrap().as_str(), "0000:03:00.0");
    assert_eq!(loaded.lookup(DeviceIndex::new(1)).unwrap().as_str(), "0000:c1:00.0");
    assert!(loaded.lookup(DeviceIndex::new(2)).is_none());
}

#[tokio::test]
async fn test_poll_loop_drives_cycles() {
    let source = two_devices().await;
    let resolver = Arc::new(ScriptedResolver::default());
    let engine = enriched_engine(&source, resolver.clone()).await;
    let sleeper = RecordingSleeper::default();

    let mut poll = PollLoop::with_sleeper(engine, sleeper.clone())
        .with_startup_delay(Duration::from_secs(3))
        .with_interval(Duration::from_secs(1));
    let reports = poll.run_cycles(3).await.unwrap();

    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.published == 2));
    assert_eq!(resolver.calls(), 3);
    assert_eq!(sleeper.0.lock().unwrap().first(), Some(&Duration::from_secs(3)));
    assert_eq!(sleeper.0.lock().unwrap().len(), 4);

    source.set_disconnected(true).await;
    assert!(poll.run_cycles(1).await.is_err());
}

#[tokio::test]
async fn test_embedded_device_going_offline_keeps_the_rest() {
    let temp_dir = TempDir::new().unwrap();
    let drm = temp_dir.path().join("drm");
    for (card, slot, busy) in [(0, "0000:01:00.0", "42"), (1, "0000:02:00.0", "5")] {
        let device = add_card(&drm, card, "0x1002", slot);
        std::fs::write(device.join("gpu_busy_percent"), format!("{}\n", busy)).unwrap();
    }

    let config = SamplerConfig::new(accel_telemetry::TelemetryTarget::Embedded { sysfs_root: drm.clone() })
        .with_fields(vec![FieldId::GPU_UTIL])
        .with_update_frequency(Duration::from_millis(1));
    let sampler = TelemetrySampler::connect(config).await.unwrap();

    let resolver = Arc::new(ScriptedResolver::default());
    resolver.assign("0000:02:00.0", WorkloadIdentity::new("ml", "infer-2", "main"));
    let enrichment = Enrichment::new(BusMap::build(&SysfsDeviceEnumerator::new(&drm)).unwrap(), resolver);
    let mut engine = CorrelationEngine::new(
        registry(LabelSchema::Workload, vec![FieldId::GPU_UTIL]),
        Box::new(sampler),
        Some(enrichment),
    )
    .unwrap();
    assert_eq!(engine.run_cycle().await.unwrap().published, 2);

    std::fs::remove_dir_all(drm.join("card0")).unwrap();
    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.published, 1);

    let text = engine.registry().encode().await.unwrap();
    assert_eq!(
        util_lines(&text),
        vec![
            "rdc_fi_gpu_util{container=\"main\",device_bus_id=\"0000:02:00.0\",device_index=\"1\",namespace=\"ml\",node=\"\",pod=\"infer-2\"} 5",
        ]
    );
}
