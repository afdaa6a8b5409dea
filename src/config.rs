//! Configuration for the export pipeline.
//!
//! Everything is resolved once, at startup, into immutable values that are
//! passed explicitly to each component. Nothing re-reads the environment
//! after [`Config::load`] returns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::PipelineError;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorConfig,
    pub batch: BatchConfig,
    pub health: HealthConfig,
    pub resource: ResourceConfig,
    pub shutdown: ShutdownConfig,
}

/// Wire protocol used to reach the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// OTLP/gRPC over a persistent multiplexed connection.
    #[serde(alias = "grpc")]
    Rpc,
    /// OTLP/HTTP with binary protobuf bodies.
    #[serde(alias = "http/protobuf")]
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rpc => "rpc",
            Protocol::Http => "http",
        }
    }
}

/// What a degraded pipeline does with its batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackMode {
    /// Drop batches while degraded.
    Disabled,
    /// Write batches to the local log.
    #[default]
    LocalLog,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub endpoint: String,
    pub protocol: Protocol,
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4317".to_string(),
            protocol: Protocol::Rpc,
            headers: BTreeMap::new(),
            timeout_ms: 30_000,
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl CollectorConfig {
    /// Resolve into the immutable settings used by transports.
    pub fn resolve(&self) -> Result<TransportConfig, PipelineError> {
        let endpoint = normalize_endpoint(&self.endpoint)?;
        if self.timeout_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "collector.timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(TransportConfig {
            protocol: self.protocol,
            endpoint,
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
        })
    }
}

/// Resolved, read-only transport settings.
///
/// Replaced only through `Pipeline::reconfigure`, which swaps the whole
/// transport at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub protocol: Protocol,
    /// Base URL without trailing slash, e.g. `http://collector:4318`.
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl TransportConfig {
    pub fn new(protocol: Protocol, endpoint: &str) -> Result<Self, PipelineError> {
        CollectorConfig {
            endpoint: endpoint.to_string(),
            protocol,
            ..Default::default()
        }
        .resolve()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub max_batch_age_ms: u64,
    pub hard_cap: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 512,
            max_batch_age_ms: 5_000,
            hard_cap: 2_048,
        }
    }
}

impl BatchConfig {
    pub fn max_batch_age(&self) -> Duration {
        Duration::from_millis(self.max_batch_age_ms)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch.max_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.hard_cap < self.max_batch_size {
            return Err(PipelineError::InvalidConfig(format!(
                "batch.hard_cap ({}) must be at least batch.max_batch_size ({})",
                self.hard_cap, self.max_batch_size
            )));
        }
        if self.max_batch_age_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch.max_batch_age_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_ms: u64,
    pub fallback: FallbackMode,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 30_000,
            fallback: FallbackMode::LocalLog,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub service_name: String,
    pub service_version: Option<String>,
    pub environment: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown_service".to_string(),
            service_version: None,
            environment: None,
            attributes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("OLLYSTACK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("collector.endpoint", "http://localhost:4317")?
            .set_default("collector.protocol", "rpc")?;

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.apply_otel_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay the standard `OTEL_*` exporter variables.
    pub fn apply_otel_env<F>(&mut self, lookup: F) -> Result<(), PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.collector.endpoint = endpoint;
        }

        if let Some(protocol) = lookup("OTEL_EXPORTER_OTLP_PROTOCOL") {
            self.collector.protocol = match protocol.trim() {
                "grpc" => Protocol::Rpc,
                "http/protobuf" => Protocol::Http,
                other => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "unsupported OTEL_EXPORTER_OTLP_PROTOCOL: {other}"
                    )))
                }
            };
        }

        if let Some(headers) = lookup("OTEL_EXPORTER_OTLP_HEADERS") {
            self.collector.headers.extend(parse_key_values(&headers));
        }

        if let Some(timeout) = lookup("OTEL_EXPORTER_OTLP_TIMEOUT") {
            self.collector.timeout_ms = timeout.trim().parse().map_err(|_| {
                PipelineError::InvalidConfig(format!(
                    "OTEL_EXPORTER_OTLP_TIMEOUT is not a number of milliseconds: {timeout}"
                ))
            })?;
        }

        if let Some(attributes) = lookup("OTEL_RESOURCE_ATTRIBUTES") {
            for (key, value) in parse_key_values(&attributes) {
                if key == "service.name" {
                    self.resource.service_name = value;
                } else {
                    self.resource.attributes.insert(key, value);
                }
            }
        }

        if let Some(service_name) = lookup("OTEL_SERVICE_NAME") {
            self.resource.service_name = service_name;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.collector.resolve()?;
        self.batch.validate()?;
        if self.health.probe_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "health.probe_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse `k1=v1,k2=v2`. Malformed pairs are skipped.
fn parse_key_values(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .filter_map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Some((key.trim().to_string(), value.trim().to_string()))
            }
            _ => {
                warn!(pair = %pair, "Ignoring malformed key=value pair");
                None
            }
        })
        .collect()
}

fn normalize_endpoint(raw: &str) -> Result<String, PipelineError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "collector.endpoint is required".to_string(),
        ));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    reqwest::Url::parse(&with_scheme).map_err(|e| {
        PipelineError::InvalidConfig(format!("invalid collector endpoint '{raw}': {e}"))
    })?;

    Ok(with_scheme)
}
