//! Upstream pipeline stand-in that uploads nothing.
//!
//! Useful for running the full bootstrap on a machine without the vendor
//! pipeline: it validates the lifecycle order, reports a connection, and can
//! emit a periodic heartbeat with synthetic BLE activity.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};

use crate::error::UpstreamError;
use crate::upstream::config::UpstreamServiceConfig;
use crate::upstream::{UpstreamService, UpstreamServiceFactory};

/// Lifecycle of a [`DryRunUpstream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DryRunState {
    /// Constructed, not prepared.
    #[default]
    Created,
    /// Holding a token.
    Prepared,
    /// Started.
    Running,
    /// Stopped after running.
    Stopped,
}

/// Upstream pipeline that only logs and reports synthetic signals.
pub struct DryRunUpstream {
    config: UpstreamServiceConfig,
    state: Arc<RwLock<DryRunState>>,
    heartbeat: Option<Duration>,
    heartbeat_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
    heartbeats: Arc<AtomicU64>,
}

impl DryRunUpstream {
    /// Create a pipeline. With `heartbeat` set, a running pipeline reports
    /// activity and an outgoing message at that interval.
    pub fn new(config: UpstreamServiceConfig, heartbeat: Option<Duration>) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(DryRunState::Created)),
            heartbeat,
            heartbeat_handle: RwLock::new(None),
            heartbeats: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DryRunState {
        *self.state.read()
    }

    /// Configuration this pipeline was built with.
    pub fn config(&self) -> &UpstreamServiceConfig {
        &self.config
    }

    /// Number of heartbeats emitted so far.
    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::SeqCst)
    }

    fn spawn_heartbeat(&self, period: Duration) {
        let config = self.config.clone();
        let state = self.state.clone();
        let heartbeats = self.heartbeats.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            while *state.read() == DryRunState::Running {
                interval.tick().await;
                let n = heartbeats.fetch_add(1, Ordering::SeqCst) + 1;
                let signals = &config.receivers().signals;

                signals.set_ble_activity((n % 10) as f32 / 10.0);

                let position = match config.coordinates().coordinates() {
                    Some(fix) => format!("{:.5}, {:.5}", fix.latitude, fix.longitude),
                    None => "no location".to_string(),
                };
                signals.message_sent(format!("Heartbeat #{} ({})", n, position));
                debug!("Dry-run heartbeat {}", n);
            }

            debug!("Dry-run heartbeat ended");
        });

        *self.heartbeat_handle.write() = Some(handle);
    }
}

#[async_trait]
impl UpstreamService for DryRunUpstream {
    async fn prepare(&self, token: &str) -> Result<(), UpstreamError> {
        if token.is_empty() {
            return Err(UpstreamError::Prepare("empty gateway token".to_string()));
        }

        let mut state = self.state.write();
        if *state == DryRunState::Running {
            return Err(UpstreamError::Prepare("already running".to_string()));
        }
        *state = DryRunState::Prepared;
        drop(state);

        info!(
            "Dry-run upstream prepared for account {} on {} endpoint",
            self.config.account_id(),
            self.config.endpoint()
        );
        self.config.log(Level::INFO, "dry-run upstream prepared");
        Ok(())
    }

    async fn start(&self) -> Result<(), UpstreamError> {
        {
            let mut state = self.state.write();
            match *state {
                DryRunState::Prepared | DryRunState::Stopped => {}
                DryRunState::Running => return Ok(()),
                DryRunState::Created => {
                    return Err(UpstreamError::Start("not prepared".to_string()))
                }
            }
            *state = DryRunState::Running;
        }

        let signals = &self.config.receivers().signals;
        signals.set_connected(true);
        signals.set_ble_activity(0.0);
        signals.message_sent(format!(
            "Upstream connected as {} (app {})",
            self.config.device_id(),
            self.config.app_version()
        ));

        if let Some(period) = self.heartbeat {
            self.spawn_heartbeat(period);
        }

        info!("Dry-run upstream started");
        self.config.log(Level::INFO, "dry-run upstream started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), UpstreamError> {
        *self.state.write() = DryRunState::Stopped;

        if let Some(handle) = self.heartbeat_handle.write().take() {
            handle.abort();
        }

        let signals = &self.config.receivers().signals;
        signals.set_connected(false);
        signals.set_ble_activity(0.0);

        info!("Dry-run upstream stopped");
        Ok(())
    }
}

impl Drop for DryRunUpstream {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat_handle.write().take() {
            handle.abort();
        }
    }
}

/// Builds [`DryRunUpstream`] pipelines.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunFactory {
    heartbeat: Option<Duration>,
}

impl DryRunFactory {
    /// Factory for pipelines without a heartbeat.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for pipelines that emit a heartbeat every `period`.
    pub fn with_heartbeat(period: Duration) -> Self {
        Self {
            heartbeat: Some(period),
        }
    }
}

impl UpstreamServiceFactory for DryRunFactory {
    fn create(
        &self,
        config: UpstreamServiceConfig,
    ) -> Result<Arc<dyn UpstreamService>, UpstreamError> {
        debug!("Creating dry-run upstream: {:?}", config);
        Ok(Arc::new(DryRunUpstream::new(config, self.heartbeat)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Coordinates, LocationService};
    use crate::upstream::config::{ExternalReceivers, UpstreamSignals};

    fn config_with(signals: UpstreamSignals, location: Arc<LocationService>) -> UpstreamServiceConfig {
        UpstreamServiceConfig::new(
            "O1",
            "1.0 (build 1)",
            "DEV-1",
            location,
            ExternalReceivers::new(signals),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_reports_connection() {
        let signals = UpstreamSignals::new();
        let upstream = DryRunUpstream::new(
            config_with(signals.clone(), Arc::new(LocationService::new())),
            None,
        );

        upstream.prepare("A1").await.unwrap();
        assert_eq!(upstream.state(), DryRunState::Prepared);
        assert!(!signals.is_connected());

        upstream.start().await.unwrap();
        assert_eq!(upstream.state(), DryRunState::Running);
        assert!(signals.is_connected());
        assert_eq!(
            signals.last_message().as_deref(),
            Some("Upstream connected as DEV-1 (app 1.0 (build 1))")
        );

        upstream.stop().await.unwrap();
        assert_eq!(upstream.state(), DryRunState::Stopped);
        assert!(!signals.is_connected());
    }

    #[tokio::test]
    async fn test_start_requires_prepare() {
        let upstream = DryRunUpstream::new(
            config_with(UpstreamSignals::new(), Arc::new(LocationService::new())),
            None,
        );
        assert!(matches!(upstream.start().await, Err(UpstreamError::Start(_))));
        assert!(matches!(upstream.prepare("").await, Err(UpstreamError::Prepare(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_reports_location() {
        let signals = UpstreamSignals::new();
        let location = Arc::new(LocationService::new());
        location.update(Coordinates::new(52.5, 13.4).unwrap());

        let upstream = DryRunUpstream::new(
            config_with(signals.clone(), location),
            Some(Duration::from_millis(10)),
        );
        let mut messages = signals.subscribe_messages();

        upstream.prepare("A1").await.unwrap();
        upstream.start().await.unwrap();

        let mut heartbeat = None;
        for _ in 0..3 {
            let message = tokio::time::timeout(Duration::from_secs(2), messages.recv())
                .await
                .unwrap()
                .unwrap();
            if message.starts_with("Heartbeat") {
                heartbeat = Some(message);
                break;
            }
        }

        let heartbeat = heartbeat.expect("no heartbeat received");
        assert!(heartbeat.contains("52.50000, 13.40000"));
        assert!(upstream.heartbeat_count() >= 1);

        upstream.stop().await.unwrap();
    }

    #[test]
    fn test_factory_builds_pipeline() {
        let factory = DryRunFactory::with_heartbeat(Duration::from_secs(1));
        let config = config_with(UpstreamSignals::new(), Arc::new(LocationService::new()));
        assert!(factory.create(config).is_ok());
    }
}
