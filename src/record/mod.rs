//! In-memory telemetry records.
//!
//! Records are immutable once built: spans are only turned into a [`Record`]
//! when their handle is ended, metric points are complete at construction.

use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::trace::{SpanId, TraceId};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ResourceConfig;

/// Telemetry signal a record belongs to. Batches never mix kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Span,
    Metric,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Span, RecordKind::Metric];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Span => "traces",
            RecordKind::Metric => "metrics",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute value: string or number (plus booleans).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(value as i64)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Int(value as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AttributeValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Resource attributes shared by every record of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resource {
    attributes: Vec<KeyValue>,
}

impl Resource {
    pub fn new(attributes: Vec<KeyValue>) -> Self {
        Self { attributes }
    }

    /// Build the resource from configuration, adding runtime attributes.
    pub fn from_config(config: &ResourceConfig) -> Self {
        let mut attributes = vec![KeyValue::new("service.name", config.service_name.as_str())];
        if let Some(version) = &config.service_version {
            attributes.push(KeyValue::new("service.version", version.as_str()));
        }
        if let Some(environment) = &config.environment {
            attributes.push(KeyValue::new("deployment.environment", environment.as_str()));
        }
        for (key, value) in &config.attributes {
            attributes.push(KeyValue::new(key.as_str(), value.as_str()));
        }
        attributes.push(KeyValue::new("process.pid", std::process::id()));
        attributes.push(KeyValue::new("telemetry.sdk.language", "rust"));
        attributes.push(KeyValue::new("telemetry.sdk.name", env!("CARGO_PKG_NAME")));
        attributes.push(KeyValue::new("telemetry.sdk.version", env!("CARGO_PKG_VERSION")));
        Self { attributes }
    }

    pub fn attributes(&self) -> &[KeyValue] {
        &self.attributes
    }

    pub fn service_name(&self) -> &str {
        self.attributes
            .iter()
            .find(|kv| kv.key == "service.name")
            .and_then(|kv| match &kv.value {
                AttributeValue::String(name) => Some(name.as_str()),
                _ => None,
            })
            .unwrap_or("unknown_service")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SpanStatus {
    pub code: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    #[serde(serialize_with = "serialize_time")]
    pub time: SystemTime,
    pub attributes: Vec<KeyValue>,
}

/// A finished span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    #[serde(serialize_with = "serialize_display")]
    pub trace_id: TraceId,
    #[serde(serialize_with = "serialize_display")]
    pub span_id: SpanId,
    #[serde(serialize_with = "serialize_opt_display")]
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    #[serde(serialize_with = "serialize_time")]
    pub start_time: SystemTime,
    #[serde(serialize_with = "serialize_time")]
    pub end_time: SystemTime,
    pub status: SpanStatus,
    pub events: Vec<SpanEvent>,
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Last observed value.
    #[default]
    Gauge,
    /// Monotonic increment since the previous point.
    Counter,
}

/// A single numeric measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub kind: MetricKind,
    #[serde(serialize_with = "serialize_time")]
    pub time: SystemTime,
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordData {
    Span(SpanRecord),
    Metric(MetricPoint),
}

/// A single observability event, owned by the batch processor until flushed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(skip)]
    resource: Arc<Resource>,
    #[serde(flatten)]
    data: RecordData,
}

impl Record {
    pub fn new(resource: Arc<Resource>, data: RecordData) -> Self {
        Self { resource, data }
    }

    pub fn span(resource: Arc<Resource>, span: SpanRecord) -> Self {
        Self::new(resource, RecordData::Span(span))
    }

    pub fn metric(resource: Arc<Resource>, point: MetricPoint) -> Self {
        Self::new(resource, RecordData::Metric(point))
    }

    pub fn kind(&self) -> RecordKind {
        match self.data {
            RecordData::Span(_) => RecordKind::Span,
            RecordData::Metric(_) => RecordKind::Metric,
        }
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    pub fn data(&self) -> &RecordData {
        &self.data
    }

    /// Span or metric name.
    pub fn name(&self) -> &str {
        match &self.data {
            RecordData::Span(span) => &span.name,
            RecordData::Metric(point) => &point.name,
        }
    }

    pub fn as_span(&self) -> Option<&SpanRecord> {
        match &self.data {
            RecordData::Span(span) => Some(span),
            RecordData::Metric(_) => None,
        }
    }

    pub fn as_metric(&self) -> Option<&MetricPoint> {
        match &self.data {
            RecordData::Metric(point) => Some(point),
            RecordData::Span(_) => None,
        }
    }
}

/// An ordered, immutable snapshot of records of one kind: the unit of
/// transport.
#[derive(Debug, Clone)]
pub struct Batch {
    kind: RecordKind,
    resource: Arc<Resource>,
    records: Vec<Record>,
}

impl Batch {
    /// Records of another kind are discarded.
    pub fn new(kind: RecordKind, resource: Arc<Resource>, records: Vec<Record>) -> Self {
        let records = records.into_iter().filter(|r| r.kind() == kind).collect();
        Self {
            kind,
            resource,
            records,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub(crate) fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn serialize_time<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let time: DateTime<Utc> = (*time).into();
    serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

fn serialize_display<T: fmt::Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn serialize_opt_display<T: fmt::Display, S: Serializer>(
    value: &Option<T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.collect_str(value),
        None => serializer.serialize_none(),
    }
}
