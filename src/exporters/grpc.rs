//! OTLP/gRPC transport.

use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use std::time::Duration;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::{debug, warn};

use super::encode::ExportRequest;
use super::Transport;
use crate::config::TransportConfig;
use crate::error::{ExportError, PipelineError};
use crate::record::Batch;

/// Exports over one lazily-connected, multiplexed HTTP/2 channel.
///
/// Cloning the generated clients only clones the channel handle, so traces
/// and metrics share the connection.
pub struct GrpcTransport {
    endpoint: String,
    traces: TraceServiceClient<Channel>,
    metrics: MetricsServiceClient<Channel>,
    metadata: MetadataMap,
    timeout: Duration,
}

impl GrpcTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, PipelineError> {
        let mut metadata = MetadataMap::new();
        for (key, value) in &config.headers {
            let parsed_key = key.to_ascii_lowercase().parse::<MetadataKey<Ascii>>();
            match (parsed_key, value.parse::<MetadataValue<Ascii>>()) {
                (Ok(key), Ok(value)) => {
                    metadata.insert(key, value);
                }
                _ => warn!(header = %key, "Skipping header that is not valid gRPC metadata"),
            }
        }

        let channel = Endpoint::from_shared(config.endpoint.clone())
            .map_err(|e| PipelineError::Transport(format!("invalid gRPC endpoint: {e}")))?
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .connect_lazy();

        debug!(endpoint = %config.endpoint, "gRPC transport created");

        Ok(Self {
            endpoint: config.endpoint.clone(),
            traces: TraceServiceClient::new(channel.clone()),
            metrics: MetricsServiceClient::new(channel),
            metadata,
            timeout: config.timeout,
        })
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = self.metadata.clone();
        request
    }

    async fn export_traces(&self, message: ExportTraceServiceRequest) -> Result<(), ExportError> {
        let mut client = self.traces.clone();
        let call = client.export(self.request(message));
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|status| classify_status(&status))?;

        if let Some(partial) = response.into_inner().partial_success {
            if partial.rejected_spans > 0 {
                warn!(
                    rejected = partial.rejected_spans,
                    message = %partial.error_message,
                    "Collector rejected part of the span batch"
                );
            }
        }
        Ok(())
    }

    async fn export_metrics(
        &self,
        message: ExportMetricsServiceRequest,
    ) -> Result<(), ExportError> {
        let mut client = self.metrics.clone();
        let call = client.export(self.request(message));
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|status| classify_status(&status))?;

        if let Some(partial) = response.into_inner().partial_success {
            if partial.rejected_data_points > 0 {
                warn!(
                    rejected = partial.rejected_data_points,
                    message = %partial.error_message,
                    "Collector rejected part of the metric batch"
                );
            }
        }
        Ok(())
    }

    fn timed_out(&self) -> ExportError {
        ExportError::RetryableNetwork(format!(
            "export to {} timed out after {:?}",
            self.endpoint, self.timeout
        ))
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, batch: &Batch) -> Result<(), ExportError> {
        match ExportRequest::from_batch(batch) {
            ExportRequest::Traces(message) => self.export_traces(message).await,
            ExportRequest::Metrics(message) => self.export_metrics(message).await,
        }
    }

    /// An empty trace export: exercises connect, framing and the service.
    async fn probe(&self) -> Result<(), ExportError> {
        self.export_traces(ExportTraceServiceRequest::default()).await
    }

    fn name(&self) -> &'static str {
        "rpc"
    }
}

/// Map a gRPC status onto the export taxonomy.
pub fn classify_status(status: &tonic::Status) -> ExportError {
    let message = format!("{:?}: {}", status.code(), status.message());
    if is_framing_failure(status.message()) {
        return ExportError::ProtocolMismatch(message);
    }

    match status.code() {
        Code::Unavailable
        | Code::DeadlineExceeded
        | Code::ResourceExhausted
        | Code::Aborted
        | Code::Cancelled
        | Code::OutOfRange
        | Code::DataLoss => ExportError::RetryableNetwork(message),
        Code::Unimplemented => ExportError::ProtocolMismatch(message),
        Code::Internal | Code::Unknown => ExportError::RetryableProtocol(message),
        _ => ExportError::Fatal(message),
    }
}

fn is_framing_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["h2 protocol error", "http2 error", "frame with invalid size", "invalid http version"]
        .iter()
        .any(|needle| message.contains(needle))
}
