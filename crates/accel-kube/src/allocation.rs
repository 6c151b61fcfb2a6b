//! Device allocations as reported by the orchestrator

use crate::{KubeError, Result};
use accel_proto::{ContainerDevices, ContainerResources, PodResources};
use async_trait::async_trait;

/// A container's claim on devices of one resource class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClaim {
    /// Resource class, e.g. `amd.com/gpu`
    pub resource_name: String,

    /// Device ids as the device plugin reported them
    pub device_ids: Vec<String>,
}

/// Devices held by one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerAllocation {
    pub name: String,
    pub devices: Vec<DeviceClaim>,
}

/// Devices held by the containers of one pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodAllocation {
    pub namespace: String,
    pub name: String,
    pub containers: Vec<ContainerAllocation>,
}

impl PodAllocation {
    /// Create an allocation for a pod
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            containers: Vec::new(),
        }
    }

    /// Add a container holding devices of one resource class
    pub fn with_container(
        mut self,
        name: impl Into<String>,
        resource_name: impl Into<String>,
        device_ids: &[&str],
    ) -> Self {
        self.containers.push(ContainerAllocation {
            name: name.into(),
            devices: vec![DeviceClaim {
                resource_name: resource_name.into(),
                device_ids: device_ids.iter().map(|id| id.to_string()).collect(),
            }],
        });
        self
    }
}

impl TryFrom<PodResources> for PodAllocation {
    type Error = KubeError;

    fn try_from(pod: PodResources) -> Result<Self> {
        if pod.name.is_empty() {
            return Err(KubeError::MalformedResponse(format!(
                "pod without a name in namespace '{}'",
                pod.namespace
            )));
        }

        Ok(Self {
            namespace: pod.namespace,
            name: pod.name,
            containers: pod.containers.into_iter().map(ContainerAllocation::from).collect(),
        })
    }
}

impl From<ContainerResources> for ContainerAllocation {
    fn from(container: ContainerResources) -> Self {
        Self {
            name: container.name,
            devices: container.devices.into_iter().map(DeviceClaim::from).collect(),
        }
    }
}

impl From<ContainerDevices> for DeviceClaim {
    fn from(devices: ContainerDevices) -> Self {
        Self {
            resource_name: devices.resource_name,
            device_ids: devices.device_ids,
        }
    }
}

/// Source of the current device allocations on this node
#[async_trait]
pub trait AllocationSource: Send + Sync + 'static {
    /// Every pod with its containers' device claims
    async fn list(&self) -> Result<Vec<PodAllocation>>;
}
