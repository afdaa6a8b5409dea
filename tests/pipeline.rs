mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{test_config, Behavior, MockTransport};
use ollystack_otel_pipeline::{
    Config, FallbackMode, HealthState, KeyValue, Pipeline, PipelineError, Protocol, RecordKind,
    StatusCode, TransportConfig,
};

async fn start(
    config: Config,
    transport: &Arc<MockTransport>,
    fallback: &Arc<MockTransport>,
) -> Pipeline {
    Pipeline::builder(config)
        .with_transport(transport.clone())
        .with_fallback(fallback.clone())
        .start()
        .await
        .unwrap()
}

fn names(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{prefix}{i}")).collect()
}

#[tokio::test]
async fn test_batches_split_in_submission_order() {
    let transport = MockTransport::new(Behavior::Succeed);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(2), &transport, &fallback).await;

    for name in names("s", 5) {
        pipeline.start_span(name, vec![]).end();
    }
    pipeline.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(
        transport.batches(RecordKind::Span),
        vec![
            vec!["s1".to_string(), "s2".to_string()],
            vec!["s3".to_string(), "s4".to_string()],
            vec!["s5".to_string()],
        ]
    );
    assert_eq!(fallback.sends(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifo_per_kind_with_one_send_in_flight() {
    let transport = MockTransport::with_delay(Behavior::Succeed, Duration::from_millis(2));
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(7), &transport, &fallback).await;

    let spans = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            for name in names("span-", 200) {
                pipeline.start_span(name, vec![]).end();
                tokio::task::yield_now().await;
            }
        })
    };
    let metrics = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            for name in names("metric-", 200) {
                pipeline.record_metric(name, 1.0, vec![]);
                tokio::task::yield_now().await;
            }
        })
    };
    spans.await.unwrap();
    metrics.await.unwrap();
    pipeline.shutdown(Duration::from_secs(10)).await.unwrap();

    assert_eq!(transport.names(RecordKind::Span), names("span-", 200));
    assert_eq!(transport.names(RecordKind::Metric), names("metric-", 200));
    assert!(transport
        .batches(RecordKind::Span)
        .iter()
        .all(|batch| batch.len() <= 7));
    assert_eq!(transport.violations(), 0);
}

#[tokio::test]
async fn test_producer_never_blocks_and_drops_oldest_on_overflow() {
    let transport = MockTransport::new(Behavior::Stall);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(2), &transport, &fallback).await;

    // Let both workers park a batch in the stalled transport.
    pipeline.record_metric("warmup-1", 1.0, vec![]);
    pipeline.record_metric("warmup-2", 1.0, vec![]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.sends(), 1);

    let started = Instant::now();
    for i in 0..1_000 {
        pipeline.record_metric(format!("m{i}"), i as f64, vec![]);
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    let status = pipeline.status();
    assert_eq!(status.buffered_metrics, 8);
    assert_eq!(status.stats.records_dropped, 992);
    assert_eq!(
        status.last_error,
        Some(ollystack_otel_pipeline::ErrorClass::BufferOverflow)
    );

    let err = pipeline
        .shutdown(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ShutdownTimeout { pending: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_buffered_records() {
    let transport = MockTransport::with_delay(Behavior::Succeed, Duration::from_millis(20));
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(10), &transport, &fallback).await;

    for name in names("m", 35) {
        pipeline.record_metric(name, 0.5, vec![KeyValue::new("host", "web-1")]);
    }
    pipeline.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(transport.names(RecordKind::Metric), names("m", 35));
    let stats = pipeline.stats();
    assert_eq!(stats.records_exported, 35);
    assert_eq!(stats.batches_exported, 4);
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_rejects_late_records() {
    let transport = MockTransport::new(Behavior::Succeed);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(4), &transport, &fallback).await;

    pipeline.record_metric("before", 1.0, vec![]);
    pipeline.shutdown(Duration::from_secs(1)).await.unwrap();
    pipeline.shutdown(Duration::from_secs(1)).await.unwrap();

    pipeline.record_metric("after", 1.0, vec![]);
    assert_eq!(transport.names(RecordKind::Metric), vec!["before".to_string()]);
    assert_eq!(pipeline.stats().records_dropped, 1);
}

#[tokio::test]
async fn test_span_end_is_idempotent() {
    let transport = MockTransport::new(Behavior::Succeed);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(4), &transport, &fallback).await;

    let mut span = pipeline.start_span("GET /fortune", vec![]);
    span.set_status(StatusCode::Ok, None);
    span.end();
    span.end();
    assert!(span.is_ended());

    pipeline.force_flush().await;
    assert_eq!(transport.names(RecordKind::Span), vec!["GET /fortune".to_string()]);
    assert_eq!(pipeline.stats().records_submitted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_switches_to_fallback() {
    let transport = MockTransport::new(Behavior::Retryable);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(2), &transport, &fallback).await;

    pipeline.record_metric("m1", 1.0, vec![]);
    pipeline.force_flush().await;

    // max_retries = 2: three attempts, then the batch goes to the fallback.
    assert_eq!(transport.sends(), 3);
    assert_eq!(pipeline.health(), HealthState::Degraded);
    assert_eq!(fallback.names(RecordKind::Metric), vec!["m1".to_string()]);

    pipeline.record_metric("m2", 2.0, vec![]);
    pipeline.start_span("s1", vec![]).end();
    pipeline.force_flush().await;

    assert_eq!(transport.sends(), 3);
    assert_eq!(
        fallback.names(RecordKind::Metric),
        vec!["m1".to_string(), "m2".to_string()]
    );
    assert_eq!(fallback.names(RecordKind::Span), vec!["s1".to_string()]);

    let status = pipeline.status();
    assert_eq!(status.stats.batches_fallback, 3);
    assert_eq!(
        status.last_error,
        Some(ollystack_otel_pipeline::ErrorClass::RetryableNetwork)
    );
}

#[tokio::test(start_paused = true)]
async fn test_protocol_mismatch_skips_retries() {
    let transport = MockTransport::new(Behavior::Mismatch);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(2), &transport, &fallback).await;

    pipeline.start_span("s1", vec![]).end();
    pipeline.force_flush().await;

    assert_eq!(transport.sends(), 1);
    assert_eq!(pipeline.health(), HealthState::Degraded);
    assert_eq!(fallback.names(RecordKind::Span), vec!["s1".to_string()]);
}

#[tokio::test]
async fn test_fatal_error_discards_batch_and_stays_healthy() {
    let transport = MockTransport::new(Behavior::Fatal);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(2), &transport, &fallback).await;

    pipeline.record_metric("m1", 1.0, vec![]);
    pipeline.force_flush().await;

    assert_eq!(transport.sends(), 1);
    assert_eq!(pipeline.health(), HealthState::Healthy);
    assert_eq!(fallback.sends(), 0);
    assert_eq!(pipeline.stats().batches_discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_fallback_drops_batches() {
    let transport = MockTransport::new(Behavior::Retryable);
    let fallback = MockTransport::new(Behavior::Succeed);
    let mut config = test_config(2);
    config.health.fallback = FallbackMode::Disabled;
    let pipeline = start(config, &transport, &fallback).await;

    pipeline.record_metric("m1", 1.0, vec![]);
    pipeline.force_flush().await;
    pipeline.record_metric("m2", 1.0, vec![]);
    pipeline.force_flush().await;

    assert_eq!(fallback.sends(), 0);
    assert_eq!(pipeline.stats().batches_discarded, 2);
    assert_eq!(pipeline.health(), HealthState::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_failed_probes() {
    let transport = MockTransport::new(Behavior::Retryable);
    let fallback = MockTransport::new(Behavior::Succeed);
    let mut config = test_config(2);
    config.health.probe_interval_ms = 1_000;
    let pipeline = start(config, &transport, &fallback).await;

    pipeline.record_metric("m1", 1.0, vec![]);
    pipeline.force_flush().await;
    assert_eq!(pipeline.health(), HealthState::Degraded);

    // The collector comes back but the first two probes still fail.
    transport.set_behavior(Behavior::Succeed);
    transport.fail_probes(2);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(pipeline.health(), HealthState::Degraded);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(pipeline.health(), HealthState::Healthy);
    assert_eq!(transport.probes(), 3);

    pipeline.record_metric("m2", 2.0, vec![]);
    pipeline.force_flush().await;
    assert_eq!(transport.names(RecordKind::Metric), vec!["m2".to_string()]);
    assert_eq!(fallback.names(RecordKind::Metric), vec!["m1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_replace_transport_resets_health() {
    let failing = MockTransport::new(Behavior::Retryable);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(2), &failing, &fallback).await;

    pipeline.record_metric("m1", 1.0, vec![]);
    pipeline.force_flush().await;
    assert_eq!(pipeline.health(), HealthState::Degraded);

    let replacement = MockTransport::new(Behavior::Succeed);
    let config = TransportConfig::new(Protocol::Http, "collector-b:4318").unwrap();
    pipeline.replace_transport(config, replacement.clone());
    assert_eq!(pipeline.health(), HealthState::Healthy);

    pipeline.record_metric("m2", 1.0, vec![]);
    pipeline.force_flush().await;
    assert_eq!(replacement.names(RecordKind::Metric), vec!["m2".to_string()]);

    let status = pipeline.status();
    assert_eq!(status.protocol, Protocol::Http);
    assert_eq!(status.endpoint, "http://collector-b:4318");
}

#[tokio::test(start_paused = true)]
async fn test_late_failure_from_old_transport_keeps_new_one_healthy() {
    let old = MockTransport::new(Behavior::Retryable);
    let fallback = MockTransport::new(Behavior::Succeed);
    let mut config = test_config(2);
    config.collector.base_delay_ms = 1_000;
    config.collector.max_delay_ms = 1_000;
    let pipeline = start(config, &old, &fallback).await;

    // A full batch starts sending against the old collector and backs off.
    pipeline.record_metric("m1", 1.0, vec![]);
    pipeline.record_metric("m2", 1.0, vec![]);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(old.sends(), 1);

    let new = MockTransport::new(Behavior::Succeed);
    let config = TransportConfig::new(Protocol::Http, "collector-b:4318").unwrap();
    pipeline.replace_transport(config, new.clone());

    // The in-flight send exhausts its retries after the swap.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(old.sends(), 3);
    assert_eq!(pipeline.health(), HealthState::Healthy);
    assert_eq!(fallback.names(RecordKind::Metric), names("m", 2));

    pipeline.record_metric("m3", 1.0, vec![]);
    pipeline.force_flush().await;
    assert_eq!(new.names(RecordKind::Metric), vec!["m3".to_string()]);
}

#[tokio::test]
async fn test_reconfigure_builds_transport_for_new_protocol() {
    let transport = MockTransport::new(Behavior::Succeed);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(2), &transport, &fallback).await;
    assert_eq!(pipeline.status().protocol, Protocol::Rpc);

    let config = TransportConfig::new(Protocol::Http, "collector-b:4318").unwrap();
    pipeline.reconfigure(config).unwrap();

    let status = pipeline.status();
    assert_eq!(status.protocol, Protocol::Http);
    assert_eq!(status.endpoint, "http://collector-b:4318");
    assert_eq!(status.state, HealthState::Healthy);
    pipeline.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconfigure_from_thread_outside_runtime() {
    let transport = MockTransport::new(Behavior::Succeed);
    let fallback = MockTransport::new(Behavior::Succeed);
    let mut config = test_config(2);
    config.collector.protocol = Protocol::Http;
    let pipeline = start(config, &transport, &fallback).await;

    let handle = pipeline.clone();
    let result = std::thread::spawn(move || {
        let config = TransportConfig::new(Protocol::Rpc, "collector-b:4317").unwrap();
        handle.reconfigure(config)
    })
    .join()
    .unwrap();
    assert!(result.is_ok());

    let status = pipeline.status();
    assert_eq!(status.protocol, Protocol::Rpc);
    assert_eq!(status.endpoint, "http://collector-b:4317");
    pipeline.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_recovery_check_leaves_degraded() {
    let transport = MockTransport::new(Behavior::Retryable);
    let fallback = MockTransport::new(Behavior::Succeed);
    let mut config = test_config(2);
    config.health.probe_interval_ms = 1_000;
    let pipeline = start(config, &transport, &fallback).await;

    pipeline.record_metric("m1", 1.0, vec![]);
    pipeline.force_flush().await;
    assert_eq!(pipeline.health(), HealthState::Degraded);

    transport.stall_probes();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(pipeline.health(), HealthState::Probing);

    pipeline.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(pipeline.health(), HealthState::Degraded);
}

#[tokio::test]
async fn test_status_serializes_for_hosts() {
    let transport = MockTransport::new(Behavior::Succeed);
    let fallback = MockTransport::new(Behavior::Succeed);
    let pipeline = start(test_config(2), &transport, &fallback).await;
    pipeline.record_counter("requests", 1.0, vec![]);

    let json = serde_json::to_value(pipeline.status()).unwrap();
    assert_eq!(json["state"], "healthy");
    assert_eq!(json["protocol"], "rpc");
    assert_eq!(json["endpoint"], "http://collector.test:4318");
    assert_eq!(json["records_submitted"], 1);
    assert!(json["last_error"].is_null());
}

#[tokio::test]
async fn test_invalid_batch_config_is_rejected() {
    let transport = MockTransport::new(Behavior::Succeed);
    let mut config = test_config(8);
    config.batch.hard_cap = 4;

    let err = Pipeline::builder(config)
        .with_transport(transport)
        .start()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfig(_)));
}
