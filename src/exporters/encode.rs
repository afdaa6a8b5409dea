//! Batch to OTLP protobuf conversion.

use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope};
use opentelemetry_proto::tonic::metrics::v1::{
    metric, number_data_point, AggregationTemporality, Gauge, Metric, NumberDataPoint,
    ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource as ProtoResource;
use opentelemetry_proto::tonic::trace::v1::{span, status, ResourceSpans, ScopeSpans, Span, Status};
use prost::Message;

use crate::record::{
    unix_nanos, AttributeValue, Batch, KeyValue, MetricKind, MetricPoint, RecordKind, Resource,
    SpanKind, SpanRecord, StatusCode,
};

/// Wire message for one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportRequest {
    Traces(ExportTraceServiceRequest),
    Metrics(ExportMetricsServiceRequest),
}

impl ExportRequest {
    pub fn from_batch(batch: &Batch) -> Self {
        match batch.kind() {
            RecordKind::Span => ExportRequest::Traces(encode_traces(batch)),
            RecordKind::Metric => ExportRequest::Metrics(encode_metrics(batch)),
        }
    }

    /// OTLP/HTTP path for this signal.
    pub fn path(&self) -> &'static str {
        match self {
            ExportRequest::Traces(_) => "/v1/traces",
            ExportRequest::Metrics(_) => "/v1/metrics",
        }
    }

    pub fn to_protobuf(&self) -> Vec<u8> {
        match self {
            ExportRequest::Traces(req) => req.encode_to_vec(),
            ExportRequest::Metrics(req) => req.encode_to_vec(),
        }
    }
}

fn scope() -> Option<InstrumentationScope> {
    Some(InstrumentationScope {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    })
}

fn encode_resource(resource: &Resource) -> Option<ProtoResource> {
    Some(ProtoResource {
        attributes: encode_attributes(resource.attributes()),
        ..Default::default()
    })
}

pub(crate) fn encode_attributes(
    attributes: &[KeyValue],
) -> Vec<opentelemetry_proto::tonic::common::v1::KeyValue> {
    attributes
        .iter()
        .map(|kv| opentelemetry_proto::tonic::common::v1::KeyValue {
            key: kv.key.clone(),
            value: Some(encode_value(&kv.value)),
        })
        .collect()
}

fn encode_value(value: &AttributeValue) -> AnyValue {
    let value = match value {
        AttributeValue::String(s) => any_value::Value::StringValue(s.clone()),
        AttributeValue::Int(i) => any_value::Value::IntValue(*i),
        AttributeValue::Double(d) => any_value::Value::DoubleValue(*d),
        AttributeValue::Bool(b) => any_value::Value::BoolValue(*b),
    };
    AnyValue { value: Some(value) }
}

pub fn encode_traces(batch: &Batch) -> ExportTraceServiceRequest {
    let spans = batch
        .records()
        .iter()
        .filter_map(|record| record.as_span())
        .map(encode_span)
        .collect();

    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: encode_resource(batch.resource()),
            scope_spans: vec![ScopeSpans {
                scope: scope(),
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn encode_span(record: &SpanRecord) -> Span {
    let kind = match record.kind {
        SpanKind::Internal => span::SpanKind::Internal,
        SpanKind::Server => span::SpanKind::Server,
        SpanKind::Client => span::SpanKind::Client,
        SpanKind::Producer => span::SpanKind::Producer,
        SpanKind::Consumer => span::SpanKind::Consumer,
    };
    let code = match record.status.code {
        StatusCode::Unset => status::StatusCode::Unset,
        StatusCode::Ok => status::StatusCode::Ok,
        StatusCode::Error => status::StatusCode::Error,
    };

    Span {
        trace_id: record.trace_id.to_bytes().to_vec(),
        span_id: record.span_id.to_bytes().to_vec(),
        parent_span_id: record
            .parent_span_id
            .map(|id| id.to_bytes().to_vec())
            .unwrap_or_default(),
        name: record.name.clone(),
        kind: kind as i32,
        start_time_unix_nano: unix_nanos(record.start_time),
        end_time_unix_nano: unix_nanos(record.end_time),
        attributes: encode_attributes(&record.attributes),
        events: record
            .events
            .iter()
            .map(|event| span::Event {
                time_unix_nano: unix_nanos(event.time),
                name: event.name.clone(),
                attributes: encode_attributes(&event.attributes),
                ..Default::default()
            })
            .collect(),
        status: Some(Status {
            message: record.status.message.clone().unwrap_or_default(),
            code: code as i32,
        }),
        ..Default::default()
    }
}

pub fn encode_metrics(batch: &Batch) -> ExportMetricsServiceRequest {
    let metrics = batch
        .records()
        .iter()
        .filter_map(|record| record.as_metric())
        .map(encode_metric)
        .collect();

    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: encode_resource(batch.resource()),
            scope_metrics: vec![ScopeMetrics {
                scope: scope(),
                metrics,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn encode_metric(point: &MetricPoint) -> Metric {
    let time = unix_nanos(point.time);
    let data_point = NumberDataPoint {
        attributes: encode_attributes(&point.attributes),
        time_unix_nano: time,
        value: Some(number_data_point::Value::AsDouble(point.value)),
        ..Default::default()
    };

    let data = match point.kind {
        MetricKind::Gauge => metric::Data::Gauge(Gauge {
            data_points: vec![data_point],
        }),
        MetricKind::Counter => metric::Data::Sum(Sum {
            data_points: vec![NumberDataPoint {
                start_time_unix_nano: time,
                ..data_point
            }],
            aggregation_temporality: AggregationTemporality::Delta as i32,
            is_monotonic: true,
        }),
    };

    Metric {
        name: point.name.clone(),
        data: Some(data),
        ..Default::default()
    }
}
