//! Standalone telemetry source talking to the telemetry daemon over gRPC
//!
//! On watch the source creates an empty device group and a field group on the
//! daemon, adds the selected devices and fields, and starts the field watch.
//! Values are then read one `(device, field)` pair at a time.

use crate::config::{AuthMode, SamplerConfig, TelemetryTarget, TlsFiles};
use crate::source::{TelemetrySource, WatchSpec};
use crate::{Result, TelemetryError};
use accel_core::{DeviceIndex, FieldId, FieldSample, FieldValue};
use accel_proto::rdc::create_gpu_group_request::GpuGroupType;
use accel_proto::{
    AddToGpuGroupRequest, CreateFieldGroupRequest, CreateGpuGroupRequest, Empty,
    GetLatestFieldValueRequest, LatestValue, RdcApiClient, UnWatchFieldsRequest, WatchFieldsRequest,
    RDC_ST_OK,
};
use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, info, warn};

/// Group and field group registered on the daemon
#[derive(Debug, Clone, Copy)]
struct Registration {
    group_id: u32,
    field_group_id: u32,
}

/// Telemetry source backed by the telemetry daemon
pub struct RdcdTelemetrySource {
    client: RdcApiClient<Channel>,
    address: String,
    group_name: String,
    field_group_name: String,
    registration: Option<Registration>,
}

impl RdcdTelemetrySource {
    /// Connect using the standalone target of a sampler configuration
    pub async fn connect(config: &SamplerConfig) -> Result<Self> {
        let TelemetryTarget::Standalone { ref address, ref auth } = config.target else {
            return Err(TelemetryError::Configuration(
                "standalone source requires a daemon address".to_string(),
            ));
        };

        let endpoint = build_endpoint(address, auth, config.connection_timeout, config.request_timeout).await?;
        info!("Connecting to telemetry daemon at {}", address);
        let channel = endpoint.connect().await.map_err(|e| {
            TelemetryError::InitializationFailed(format!("cannot reach telemetry daemon at {}: {}", address, e))
        })?;

        Ok(Self::from_channel(channel, address.clone(), config))
    }

    /// Wrap an already established channel
    pub fn from_channel(channel: Channel, address: String, config: &SamplerConfig) -> Self {
        Self {
            client: RdcApiClient::new(channel),
            address,
            group_name: config.group_name.clone(),
            field_group_name: config.field_group_name.clone(),
            registration: None,
        }
    }

    /// Address of the daemon
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Build the channel endpoint, plaintext or mutual TLS
async fn build_endpoint(
    address: &str,
    auth: &AuthMode,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<Endpoint> {
    let scheme = match auth {
        AuthMode::Unauthenticated => "http",
        AuthMode::MutualTls(_) => "https",
    };
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("{}://{}", scheme, address)
    };

    let mut endpoint = Endpoint::from_shared(uri)
        .map_err(|e| TelemetryError::Configuration(format!("invalid daemon address '{}': {}", address, e)))?
        .connect_timeout(connect_timeout)
        .timeout(request_timeout);

    if let AuthMode::MutualTls(files) = auth {
        let host = address
            .rsplit_once("://")
            .map_or(address, |(_, rest)| rest)
            .rsplit_once(':')
            .map_or(address, |(host, _)| host)
            .to_string();
        endpoint = endpoint.tls_config(load_tls(files, host).await?)?;
    }

    Ok(endpoint)
}

async fn load_tls(files: &TlsFiles, host: String) -> Result<ClientTlsConfig> {
    let read = |path: std::path::PathBuf| async move {
        tokio::fs::read(&path).await.map_err(|e| {
            TelemetryError::Configuration(format!("cannot read certificate {}: {}", path.display(), e))
        })
    };

    let ca = read(files.ca_cert.clone()).await?;
    let cert = read(files.client_cert.clone()).await?;
    let key = read(files.client_key.clone()).await?;

    Ok(ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(ca))
        .identity(Identity::from_pem(cert, key))
        .domain_name(files.domain_name.clone().unwrap_or(host)))
}

fn check_status(call: &str, status: u32) -> Result<()> {
    if status == RDC_ST_OK {
        Ok(())
    } else {
        Err(TelemetryError::DaemonError(format!("{} returned status {}", call, status)))
    }
}

#[async_trait]
impl TelemetrySource for RdcdTelemetrySource {
    fn name(&self) -> &str {
        "standalone"
    }

    async fn devices(&mut self) -> Result<Vec<DeviceIndex>> {
        let response = self.client.get_all_devices(Empty {}).await?.into_inner();
        check_status("GetAllDevices", response.status)?;
        Ok(response.gpus.into_iter().map(DeviceIndex::new).collect())
    }

    async fn watch(&mut self, spec: &WatchSpec) -> Result<()> {
        if self.registration.is_some() {
            self.unwatch().await?;
        }

        let group = self
            .client
            .create_gpu_group(CreateGpuGroupRequest {
                r#type: GpuGroupType::RdcGroupEmpty as i32,
                group_name: self.group_name.clone(),
            })
            .await?
            .into_inner();
        check_status("CreateGpuGroup", group.status)?;

        for device in &spec.devices {
            let added = self
                .client
                .add_to_gpu_group(AddToGpuGroupRequest {
                    group_id: group.group_id,
                    gpu_index: device.get(),
                })
                .await?
                .into_inner();
            check_status("AddToGpuGroup", added.status)?;
        }

        let field_group = self
            .client
            .create_field_group(CreateFieldGroupRequest {
                field_group_name: self.field_group_name.clone(),
                field_ids: spec.fields.iter().map(|f| f.code()).collect(),
            })
            .await?
            .into_inner();
        check_status("CreateFieldGroup", field_group.status)?;

        let watched = self
            .client
            .watch_fields(WatchFieldsRequest {
                group_id: group.group_id,
                field_group_id: field_group.field_group_id,
                update_freq: spec.update_frequency_micros(),
                max_keep_age: spec.max_keep_age.as_secs_f64(),
                max_keep_samples: spec.max_keep_samples,
            })
            .await?
            .into_inner();
        check_status("WatchFields", watched.status)?;

        info!(
            "Watching {} fields on {} devices (group {}, field group {})",
            spec.fields.len(),
            spec.devices.len(),
            group.group_id,
            field_group.field_group_id
        );
        self.registration = Some(Registration {
            group_id: group.group_id,
            field_group_id: field_group.field_group_id,
        });
        Ok(())
    }

    async fn fetch(&mut self, device: DeviceIndex, fields: &[FieldId]) -> Result<Vec<FieldSample>> {
        let mut samples = Vec::with_capacity(fields.len());
        for &field in fields {
            let response = self
                .client
                .get_latest_field_value(GetLatestFieldValueRequest {
                    gpu_index: device.get(),
                    field_id: field.code(),
                })
                .await?
                .into_inner();

            if response.status != RDC_ST_OK || response.rdc_status != RDC_ST_OK {
                debug!(
                    "No value for {} on device {} (status {}, rdc status {})",
                    field, device, response.status, response.rdc_status
                );
                continue;
            }

            let value = match response.value {
                Some(LatestValue::LInt(v)) => FieldValue::Integer(v),
                Some(LatestValue::Dbl(v)) => FieldValue::Double(v),
                Some(LatestValue::Str(_)) | None => {
                    debug!("Skipping non-numeric value of {} on device {}", field, device);
                    continue;
                }
            };
            samples.push(FieldSample::new(device, field, value));
        }
        Ok(samples)
    }

    async fn unwatch(&mut self) -> Result<()> {
        let Some(registration) = self.registration.take() else {
            return Ok(());
        };

        let response = self
            .client
            .un_watch_fields(UnWatchFieldsRequest {
                group_id: registration.group_id,
                field_group_id: registration.field_group_id,
            })
            .await?
            .into_inner();
        if response.status != RDC_ST_OK {
            warn!("UnWatchFields returned status {}", response.status);
        }
        Ok(())
    }
}
