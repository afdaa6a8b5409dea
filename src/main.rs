//! OllyStack OTLP pipeline agent
//!
//! Emits demo request telemetry through the export pipeline until it is
//! asked to stop, then drains the pipeline before exiting.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ollystack_otel_pipeline::{Config, KeyValue, Pipeline, PipelineError, SpanKind, StatusCode};

/// Exit code when shutdown could not drain every buffered record in time.
const EXIT_TRUNCATED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "otel-pipeline")]
#[command(about = "OTLP export pipeline with collector fallback")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/ollystack/otel-pipeline.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Interval between demo requests in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting OllyStack OTLP pipeline agent");

    let config = Config::load(&args.config).context("Failed to load configuration")?;
    let shutdown_timeout = config.shutdown.timeout();

    info!(
        endpoint = %config.collector.endpoint,
        protocol = config.collector.protocol.as_str(),
        service = %config.resource.service_name,
        "Configuration loaded"
    );

    let pipeline = Pipeline::start(config)
        .await
        .context("Failed to start telemetry pipeline")?;

    info!("Agent running - press Ctrl+C to stop");
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut request: u64 = 0;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                request += 1;
                emit_demo_request(&pipeline, request);
            }
        }
    }

    info!(status = ?pipeline.status(), "Stopping agent");
    match pipeline.shutdown(shutdown_timeout).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(PipelineError::ShutdownTimeout { pending }) => {
            error!(pending, "Telemetry was not fully drained before exit");
            Ok(ExitCode::from(EXIT_TRUNCATED))
        }
        Err(e) => Err(e).context("Failed to shut down telemetry pipeline"),
    }
}

/// One fake request: a server span with an event and a child span, plus a
/// latency gauge and a request counter.
fn emit_demo_request(pipeline: &Pipeline, request: u64) {
    let started = Instant::now();
    let route = if request % 5 == 0 { "/api/error" } else { "/api/fortune" };

    let mut span = pipeline.start_span(
        format!("GET {route}"),
        vec![
            KeyValue::new("http.method", "GET"),
            KeyValue::new("http.route", route),
        ],
    );
    span.set_kind(SpanKind::Server);

    let mut lookup = span.child("fortune.lookup");
    lookup.set_attribute("fortune.index", (request % 42) as i64);
    lookup.end();

    if route == "/api/error" {
        let err = std::io::Error::other("fortune store unavailable");
        span.record_exception(&err)
            .set_status(StatusCode::Error, Some(err.to_string()))
            .set_attribute("http.status_code", 500);
    } else {
        span.add_event("fortune.selected", vec![KeyValue::new("request", request as i64)])
            .set_status(StatusCode::Ok, None)
            .set_attribute("http.status_code", 200);
    }
    span.end();

    let attributes = vec![KeyValue::new("http.route", route)];
    pipeline.record_metric(
        "http.server.duration_ms",
        started.elapsed().as_secs_f64() * 1000.0,
        attributes.clone(),
    );
    pipeline.record_counter("http.server.requests", 1.0, attributes);
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = term.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C");
}
