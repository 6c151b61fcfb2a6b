//! # accel-kube
//!
//! Workload attribution for accelerator devices.
//!
//! The kubelet's pod-resources service reports which container holds which
//! device. This crate queries it over the kubelet's Unix domain socket and
//! turns the answer into a `{bus id → workload identity}` map for the current
//! cycle.
//!
//! - [`KubeletClient`] speaks `v1.PodResourcesLister/List`
//! - [`WorkloadResolver`] filters allocations to the accelerator resource class
//!   and never fails: any error yields an empty map plus a logged diagnosis

pub mod allocation;
pub mod client;
pub mod resolver;

pub use allocation::{AllocationSource, ContainerAllocation, DeviceClaim, PodAllocation};
pub use client::{KubeletClient, DEFAULT_KUBELET_SOCKET};
pub use resolver::{IdentityResolver, WorkloadResolver};

use std::path::PathBuf;
use thiserror::Error;

/// Result type for kubelet operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors talking to the kubelet pod-resources service
#[derive(Error, Debug)]
pub enum KubeError {
    #[error("Kubelet socket not found at {0}")]
    SocketNotFound(PathBuf),

    #[error("Kubelet socket {path} is not accessible: {source}")]
    SocketInaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid kubelet endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl KubeError {
    /// Short name of the failure class for logs
    pub fn category(&self) -> &'static str {
        match self {
            KubeError::SocketNotFound(_) => "socket_not_found",
            KubeError::SocketInaccessible { .. } => "socket_inaccessible",
            KubeError::InvalidEndpoint(_) => "invalid_endpoint",
            KubeError::Transport(_) => "transport",
            KubeError::Grpc(_) => "rpc",
            KubeError::Timeout(_) => "timeout",
            KubeError::MalformedResponse(_) => "malformed_response",
        }
    }

    /// Things an operator should check for this failure
    pub fn remediation_hints(&self) -> Vec<&'static str> {
        match self {
            KubeError::SocketNotFound(_) => vec![
                "Check that the kubelet is running on this node",
                "Check that the kubelet socket path is correct",
                "Check that the pod-resources directory is mounted into the exporter",
            ],
            KubeError::SocketInaccessible { .. } => vec![
                "Check that the socket file exists and is readable by the exporter",
                "Check that the exporter runs with enough privileges for the kubelet socket",
            ],
            KubeError::InvalidEndpoint(_) => vec!["Check that the kubelet socket path is correct"],
            KubeError::Transport(_) => vec![
                "Check that the kubelet is running on this node",
                "Check that the pod-resources service is enabled in the kubelet",
                "Check that the Unix socket file is present and readable",
                "If connecting over TCP, check the port and firewall rules",
            ],
            KubeError::Grpc(status) => match status.code() {
                tonic::Code::Unavailable => vec![
                    "Check that the kubelet is running on this node",
                    "Check that the pod-resources service is enabled in the kubelet",
                ],
                tonic::Code::Unimplemented => vec![
                    "Check that the kubelet serves the v1 pod-resources API",
                ],
                tonic::Code::Unauthenticated | tonic::Code::PermissionDenied => vec![
                    "Check whether the endpoint expects TLS while the client uses an insecure channel",
                    "Check that the TLS certificates match the endpoint",
                ],
                tonic::Code::DeadlineExceeded => vec![
                    "Check that the kubelet is responsive",
                ],
                _ => vec![
                    "Check the kubelet logs for pod-resources errors",
                ],
            },
            KubeError::Timeout(_) => vec![
                "Check that the kubelet is responsive",
                "Check that the kubelet socket path is correct",
            ],
            KubeError::MalformedResponse(_) => vec![
                "Check that the kubelet version supports the v1 pod-resources API",
            ],
        }
    }
}
