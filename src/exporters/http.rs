//! OTLP/HTTP transport with binary protobuf bodies.

use async_trait::async_trait;
use bytes::Bytes;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::error::Error as _;
use tracing::debug;

use super::encode::ExportRequest;
use super::Transport;
use crate::config::TransportConfig;
use crate::error::{ExportError, PipelineError};
use crate::record::Batch;

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

pub struct HttpTransport {
    endpoint: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| PipelineError::Transport(format!("invalid header name {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| PipelineError::Transport(format!("invalid value for {key}: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        debug!(endpoint = %config.endpoint, "HTTP transport created");

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }

    async fn post(&self, request: &ExportRequest) -> Result<(), ExportError> {
        let url = format!("{}{}", self.endpoint, request.path());
        let body = Bytes::from(request.to_protobuf());

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> Result<(), ExportError> {
        self.post(&ExportRequest::from_batch(batch)).await
    }

    async fn probe(&self) -> Result<(), ExportError> {
        self.post(&ExportRequest::Traces(ExportTraceServiceRequest::default()))
            .await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Map a non-2xx response onto the export taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> ExportError {
    let message = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), body.trim())
    };

    match status.as_u16() {
        408 | 429 | 502 | 503 | 504 => ExportError::RetryableNetwork(message),
        415 | 505 => ExportError::ProtocolMismatch(message),
        500..=599 => ExportError::RetryableProtocol(message),
        _ => ExportError::Fatal(message),
    }
}

fn classify_reqwest_error(error: &reqwest::Error) -> ExportError {
    let message = error_chain(error);
    if error.is_timeout() || error.is_connect() {
        return ExportError::RetryableNetwork(message);
    }
    if error.is_decode() || error.is_body() {
        return ExportError::RetryableProtocol(message);
    }
    if error.is_builder() {
        return ExportError::Fatal(message);
    }

    let lowered = message.to_ascii_lowercase();
    if lowered.contains("invalid http version")
        || lowered.contains("http2")
        || lowered.contains("invalid status")
    {
        return ExportError::ProtocolMismatch(message);
    }
    ExportError::RetryableNetwork(message)
}

fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
