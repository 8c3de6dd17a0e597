//! Boundary to the external BLE upstream pipeline.
//!
//! The pipeline (BLE scanning, packet resolution, cloud transport) is not
//! part of this crate. This module defines what the gateway hands it and the
//! two lifecycle calls it consumes, plus a dry-run implementation that only
//! logs and reports synthetic activity.

pub mod config;
pub mod dry_run;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::UpstreamError;

pub use config::{
    ExternalLogger, ExternalReceivers, TracingLogger, UpstreamEndpoint, UpstreamServiceConfig,
    UpstreamSignals, PLACEHOLDER_ACCOUNT_ID, PLACEHOLDER_APP_VERSION,
};
pub use dry_run::{DryRunFactory, DryRunUpstream};

/// A configured upstream pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamService: Send + Sync {
    /// Authorize the pipeline with the gateway auth token.
    async fn prepare(&self, token: &str) -> Result<(), UpstreamError>;

    /// Start scanning and uploading.
    async fn start(&self) -> Result<(), UpstreamError>;

    /// Stop scanning and uploading.
    async fn stop(&self) -> Result<(), UpstreamError>;
}

/// Builds upstream pipelines from a configuration.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamServiceFactory: Send + Sync {
    /// Construct a pipeline. Construction itself may fail.
    fn create(
        &self,
        config: UpstreamServiceConfig,
    ) -> Result<Arc<dyn UpstreamService>, UpstreamError>;
}
