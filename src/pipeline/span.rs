//! Open span builder handed out by [`Pipeline::start_span`].

use opentelemetry::trace::{SpanId, TraceId};
use std::time::SystemTime;
use tracing::warn;

use super::Pipeline;
use crate::record::{
    AttributeValue, KeyValue, Record, SpanEvent, SpanKind, SpanRecord, SpanStatus, StatusCode,
};

/// A span that is still open.
///
/// Mutations are buffered locally; nothing reaches the pipeline until
/// [`end`](SpanHandle::end) turns the span into an immutable record.
pub struct SpanHandle {
    pipeline: Pipeline,
    trace_id: TraceId,
    span_id: SpanId,
    span: Option<SpanRecord>,
}

impl SpanHandle {
    pub(super) fn new(
        pipeline: Pipeline,
        name: String,
        attributes: Vec<KeyValue>,
        trace_id: TraceId,
        parent_span_id: Option<SpanId>,
    ) -> Self {
        let span_id = pipeline.new_span_id();
        let now = SystemTime::now();
        Self {
            trace_id,
            span_id,
            span: Some(SpanRecord {
                trace_id,
                span_id,
                parent_span_id,
                name,
                kind: SpanKind::default(),
                start_time: now,
                end_time: now,
                status: SpanStatus::default(),
                events: Vec::new(),
                attributes,
            }),
            pipeline,
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn is_ended(&self) -> bool {
        self.span.is_none()
    }

    /// Start a span in the same trace with this span as parent.
    pub fn child(&self, name: impl Into<String>) -> SpanHandle {
        SpanHandle::new(
            self.pipeline.clone(),
            name.into(),
            Vec::new(),
            self.trace_id,
            Some(self.span_id),
        )
    }

    pub fn set_kind(&mut self, kind: SpanKind) -> &mut Self {
        if let Some(span) = self.span.as_mut() {
            span.kind = kind;
        }
        self
    }

    /// Set an attribute, replacing an existing value for the same key.
    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> &mut Self {
        if let Some(span) = self.span.as_mut() {
            let attribute = KeyValue::new(key, value);
            match span.attributes.iter_mut().find(|kv| kv.key == attribute.key) {
                Some(existing) => existing.value = attribute.value,
                None => span.attributes.push(attribute),
            }
        }
        self
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: Vec<KeyValue>) -> &mut Self {
        if let Some(span) = self.span.as_mut() {
            span.events.push(SpanEvent {
                name: name.into(),
                time: SystemTime::now(),
                attributes,
            });
        }
        self
    }

    /// Record an `exception` event carrying the error's message. The status
    /// is left untouched.
    pub fn record_exception(&mut self, error: &dyn std::error::Error) -> &mut Self {
        self.add_event(
            "exception",
            vec![KeyValue::new("exception.message", error.to_string())],
        )
    }

    pub fn set_status(&mut self, code: StatusCode, message: Option<String>) -> &mut Self {
        if let Some(span) = self.span.as_mut() {
            // A description is only meaningful for errors.
            let message = if code == StatusCode::Error { message } else { None };
            span.status = SpanStatus { code, message };
        }
        self
    }

    /// Freeze the span and submit it. A second call only logs a warning.
    pub fn end(&mut self) {
        match self.span.take() {
            Some(mut span) => {
                span.end_time = SystemTime::now().max(span.start_time);
                self.pipeline
                    .submit(Record::span(self.pipeline.resource(), span));
            }
            None => warn!(
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                "Span already ended, ignoring repeated end()"
            ),
        }
    }
}

impl std::fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanHandle")
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("ended", &self.is_ended())
            .finish()
    }
}
