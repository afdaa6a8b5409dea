//! OllyStack OTLP export pipeline
//!
//! Buffers spans and metric points produced by the application, batches them
//! per signal and ships them to an OpenTelemetry collector over OTLP/gRPC or
//! OTLP/HTTP. While the collector is unreachable batches go to a local
//! fallback sink, and a background probe switches back once it recovers.
//!
//! Producer calls never block on the network and never return transport
//! errors.

pub mod config;
pub mod error;
pub mod exporters;
pub mod health;
pub mod pipeline;
mod processor;
pub mod record;
pub mod retry;
pub mod stats;

pub use config::{Config, FallbackMode, Protocol, TransportConfig};
pub use error::{ErrorClass, ExportError, PipelineError};
pub use exporters::{FallbackSink, GrpcTransport, HttpTransport, Transport};
pub use health::HealthState;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineStatus, SpanHandle};
pub use record::{
    AttributeValue, Batch, KeyValue, MetricKind, MetricPoint, Record, RecordKind, Resource,
    SpanKind, StatusCode,
};
pub use retry::RetryController;
pub use stats::StatsSnapshot;
