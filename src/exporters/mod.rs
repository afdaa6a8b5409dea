//! Transports that move batches off the process.
//!
//! Two network variants ([`GrpcTransport`], [`HttpTransport`]) share one
//! encoder and one error taxonomy. [`FallbackSink`] implements the same
//! trait so the dispatcher can treat every destination uniformly.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Protocol, TransportConfig};
use crate::error::{ExportError, PipelineError};
use crate::record::Batch;

pub mod encode;
pub mod fallback;
pub mod grpc;
pub mod http;

pub use encode::ExportRequest;
pub use fallback::FallbackSink;
pub use grpc::GrpcTransport;
pub use http::HttpTransport;

/// A destination for batches.
///
/// Implementations own their connection state; callers serialize sends per
/// record kind, so `send` may be entered concurrently only for different
/// kinds.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one batch. `Ok(())` is the success outcome.
    async fn send(&self, batch: &Batch) -> Result<(), ExportError>;

    /// Lightweight connectivity check used while degraded.
    async fn probe(&self) -> Result<(), ExportError> {
        Ok(())
    }

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Build the network transport selected by `config.protocol`.
pub fn build_transport(config: &TransportConfig) -> Result<Arc<dyn Transport>, PipelineError> {
    let transport: Arc<dyn Transport> = match config.protocol {
        Protocol::Rpc => Arc::new(GrpcTransport::new(config)?),
        Protocol::Http => Arc::new(HttpTransport::new(config)?),
    };
    Ok(transport)
}
