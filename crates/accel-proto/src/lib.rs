//! # accel-proto
//!
//! Protocol buffer definitions and generated gRPC bindings used by the exporter:
//! - Kubelet pod-resources API (`v1.PodResourcesLister`) for device-to-workload attribution
//! - Telemetry daemon API (`rdc.RdcAPI`) for standalone telemetry collection

// Generated protobuf code
pub mod podresources {
    pub mod v1 {
        tonic::include_proto!("v1");
    }
}

pub mod rdc {
    tonic::include_proto!("rdc");
}

// Re-export commonly used types for convenience (both server and client)
pub use podresources::v1::{
    pod_resources_lister_client::PodResourcesListerClient,
    pod_resources_lister_server::{PodResourcesLister, PodResourcesListerServer},
    ContainerDevices, ContainerResources, ListPodResourcesRequest, ListPodResourcesResponse,
    PodResources,
};

pub use rdc::{
    get_latest_field_value_response::Value as LatestValue,
    rdc_api_client::RdcApiClient,
    rdc_api_server::{RdcApi, RdcApiServer},
    AddToGpuGroupRequest, CreateFieldGroupRequest, CreateGpuGroupRequest, Empty,
    GetLatestFieldValueRequest, GetLatestFieldValueResponse, UnWatchFieldsRequest,
    WatchFieldsRequest,
};

/// Status code the telemetry daemon returns on success
pub const RDC_ST_OK: u32 = 0;

/// Status code the telemetry daemon returns when a value is not available
pub const RDC_ST_NOT_FOUND: u32 = 2;
