//! Kubelet pod-resources client over a Unix domain socket

use crate::allocation::{AllocationSource, PodAllocation};
use crate::{KubeError, Result};
use accel_proto::{ListPodResourcesRequest, PodResourcesListerClient};
use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, warn};

/// Default location of the kubelet pod-resources socket
pub const DEFAULT_KUBELET_SOCKET: &str = "/var/lib/kubelet/pod-resources/kubelet.sock";

/// Client for `v1.PodResourcesLister`
///
/// A fresh connection is made for every query; nothing is cached between
/// calls.
#[derive(Debug, Clone)]
pub struct KubeletClient {
    socket_path: PathBuf,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl KubeletClient {
    /// Create a client for a kubelet socket
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Socket the client connects to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn connect(&self) -> Result<PodResourcesListerClient<Channel>> {
        match tokio::fs::metadata(&self.socket_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(KubeError::SocketNotFound(self.socket_path.clone()));
            }
            Err(e) => {
                return Err(KubeError::SocketInaccessible {
                    path: self.socket_path.clone(),
                    source: e,
                });
            }
        }

        let socket_path = self.socket_path.clone();
        // The URI is ignored by the connector; tonic needs a syntactically valid one
        let endpoint = Endpoint::try_from("http://[::]:50051")
            .map_err(|e| KubeError::InvalidEndpoint(e.to_string()))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);

        let connecting = endpoint.connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket_path).await?)) }
        }));

        let channel = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| {
                KubeError::Timeout(format!("connecting to {}", self.socket_path.display()))
            })??;

        Ok(PodResourcesListerClient::new(channel))
    }
}

impl Default for KubeletClient {
    fn default() -> Self {
        Self::new(DEFAULT_KUBELET_SOCKET)
    }
}

#[async_trait]
impl AllocationSource for KubeletClient {
    async fn list(&self) -> Result<Vec<PodAllocation>> {
        let mut client = self.connect().await?;

        let response = tokio::time::timeout(self.request_timeout, client.list(ListPodResourcesRequest {}))
            .await
            .map_err(|_| KubeError::Timeout("pod-resources List".to_string()))??
            .into_inner();

        debug!("Kubelet reported {} pods", response.pod_resources.len());
        let pods = response
            .pod_resources
            .into_iter()
            .filter_map(|pod| match PodAllocation::try_from(pod) {
                Ok(pod) => Some(pod),
                Err(e) => {
                    warn!("Skipping pod from kubelet: {}", e);
                    None
                }
            })
            .collect();
        Ok(pods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_proto::{
        ContainerDevices, ContainerResources, ListPodResourcesResponse, PodResources, PodResourcesLister,
        PodResourcesListerServer,
    };
    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio_stream::wrappers::UnixListenerStream;
    use tonic::{Request, Response, Status};

    struct FakeKubelet {
        pods: Vec<PodResources>,
    }

    #[tonic::async_trait]
    impl PodResourcesLister for FakeKubelet {
        async fn list(
            &self,
            _: Request<ListPodResourcesRequest>,
        ) -> std::result::Result<Response<ListPodResourcesResponse>, Status> {
            Ok(Response::new(ListPodResourcesResponse {
                pod_resources: self.pods.clone(),
            }))
        }
    }

    fn pod(namespace: &str, name: &str, container: &str, device_ids: &[&str]) -> PodResources {
        PodResources {
            name: name.to_string(),
            namespace: namespace.to_string(),
            containers: vec![ContainerResources {
                name: container.to_string(),
                devices: vec![ContainerDevices {
                    resource_name: "amd.com/gpu".to_string(),
                    device_ids: device_ids.iter().map(|id| id.to_string()).collect(),
                    topology: None,
                }],
                cpu_ids: vec![],
            }],
        }
    }

    fn serve(socket: &Path, pods: Vec<PodResources>) {
        let listener = UnixListener::bind(socket).unwrap();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(PodResourcesListerServer::new(FakeKubelet { pods }))
                .serve_with_incoming(UnixListenerStream::new(listener))
                .await
                .unwrap();
        });
    }

    #[tokio::test]
    async fn test_list_over_unix_socket() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("kubelet.sock");
        serve(
            &socket,
            vec![
                pod("default", "train-7", "main", &["0000:03:00.0"]),
                pod("ml", "infer-2", "main", &["0000:83:00.0"]),
            ],
        );

        let client = KubeletClient::new(&socket);
        let pods = client.list().await.unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].name, "train-7");
        assert_eq!(pods[1].namespace, "ml");
        assert_eq!(pods[1].containers[0].devices[0].device_ids, vec!["0000:83:00.0"]);
    }

    #[tokio::test]
    async fn test_missing_socket() {
        let dir = TempDir::new().unwrap();
        let client = KubeletClient::new(dir.path().join("absent.sock"));

        let err = client.list().await.unwrap_err();
        assert!(matches!(err, KubeError::SocketNotFound(_)));
    }

    #[tokio::test]
    async fn test_socket_without_listener() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("stale.sock");
        drop(UnixListener::bind(&socket).unwrap());

        let client = KubeletClient::new(&socket).with_connect_timeout(Duration::from_secs(1));
        let err = client.list().await.unwrap_err();
        assert!(matches!(err, KubeError::Transport(_) | KubeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unnamed_pod_is_skipped() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("kubelet.sock");
        serve(
            &socket,
            vec![
                pod("default", "", "main", &["0000:03:00.0"]),
                pod("ml", "infer-2", "main", &["0000:83:00.0"]),
            ],
        );

        let pods = KubeletClient::new(&socket).list().await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "infer-2");
        assert_eq!(pods[0].containers[0].devices[0].device_ids, vec!["0000:83:00.0"]);
    }

    #[test]
    fn test_default_socket() {
        assert_eq!(KubeletClient::default().socket_path(), Path::new(DEFAULT_KUBELET_SOCKET));
    }
}
