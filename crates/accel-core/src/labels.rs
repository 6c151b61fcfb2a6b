//! Label names used on exported series
//!
//! Every series carries `device_index`. Series with workload attribution
//! additionally carry the workload identity, the node name and the device's
//! bus identifier, in the order given by [`WORKLOAD_LABELS`].

pub const DEVICE_INDEX: &str = "device_index";
pub const POD: &str = "pod";
pub const NAMESPACE: &str = "namespace";
pub const CONTAINER: &str = "container";
pub const NODE: &str = "node";
pub const DEVICE_BUS_ID: &str = "device_bus_id";

/// Label names of a series without workload attribution
pub const DEVICE_LABELS: &[&str] = &[DEVICE_INDEX];

/// Label names of a series with workload attribution
pub const WORKLOAD_LABELS: &[&str] = &[DEVICE_INDEX, POD, NAMESPACE, CONTAINER, NODE, DEVICE_BUS_ID];

/// Sanitize a series name for Prometheus (alphanumeric + underscore + colon)
pub fn sanitize_metric_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if sanitized.chars().next().map_or(false, |c| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}
