//! Configuration handed to the upstream pipeline.

use parking_lot::RwLock;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn, Level};

use crate::error::UpstreamError;
use crate::location::CoordinatesProvider;
use crate::utils::{clamp_activity, non_empty_or};

/// Account id used when the owner id is empty.
pub const PLACEHOLDER_ACCOUNT_ID: &str = "gateway-test-account";

/// App version used when build info is not available.
pub const PLACEHOLDER_APP_VERSION: &str = "<unknown app version>";

/// Which backend the upstream pipeline talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum UpstreamEndpoint {
    /// Production cloud.
    #[default]
    Prod,
    /// Test cloud.
    Test,
    /// Explicit URL.
    Custom(String),
}

impl FromStr for UpstreamEndpoint {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "prod" | "production" => Ok(Self::Prod),
            "test" => Ok(Self::Test),
            url if url.starts_with("https://") || url.starts_with("http://") => {
                Ok(Self::Custom(url.to_string()))
            }
            other => Err(UpstreamError::Prepare(format!(
                "unknown upstream endpoint '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for UpstreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prod => write!(f, "prod"),
            Self::Test => write!(f, "test"),
            Self::Custom(url) => write!(f, "{}", url),
        }
    }
}

/// Log sink the upstream pipeline may write into.
pub trait ExternalLogger: Send + Sync {
    /// Record one pipeline log line.
    fn log(&self, level: Level, message: &str);
}

/// Forwards pipeline log lines to `tracing` under the `upstream` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ExternalLogger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => error!(target: "upstream", "{}", message),
            Level::WARN => warn!(target: "upstream", "{}", message),
            Level::INFO => info!(target: "upstream", "{}", message),
            Level::DEBUG => debug!(target: "upstream", "{}", message),
            _ => trace!(target: "upstream", "{}", message),
        }
    }
}

struct SignalsInner {
    connection_tx: watch::Sender<bool>,
    ble_activity_tx: watch::Sender<f32>,
    message_tx: broadcast::Sender<String>,
    last_message: RwLock<Option<String>>,
}

/// Channels the upstream pipeline reports into.
///
/// Connection state and BLE activity keep their last value; outgoing
/// message descriptions are fire-and-forget.
#[derive(Clone)]
pub struct UpstreamSignals {
    inner: Arc<SignalsInner>,
}

impl UpstreamSignals {
    /// Create a fresh set of channels: disconnected, no activity.
    pub fn new() -> Self {
        let (connection_tx, _) = watch::channel(false);
        let (ble_activity_tx, _) = watch::channel(0.0);
        let (message_tx, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(SignalsInner {
                connection_tx,
                ble_activity_tx,
                message_tx,
                last_message: RwLock::new(None),
            }),
        }
    }

    /// Report the cloud connection state.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connection_tx.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    /// Report BLE scanner activity, clamped to `0.0..=1.0`.
    pub fn set_ble_activity(&self, level: f32) {
        self.inner.ble_activity_tx.send_replace(clamp_activity(level));
    }

    /// Describe a message that was sent upstream.
    pub fn message_sent(&self, description: impl Into<String>) {
        let description = description.into();
        *self.inner.last_message.write() = Some(description.clone());
        let _ = self.inner.message_tx.send(description);
    }

    /// Current connection state.
    pub fn is_connected(&self) -> bool {
        *self.inner.connection_tx.borrow()
    }

    /// Current BLE activity level.
    pub fn ble_activity(&self) -> f32 {
        *self.inner.ble_activity_tx.borrow()
    }

    /// Description of the most recent outgoing message.
    pub fn last_message(&self) -> Option<String> {
        self.inner.last_message.read().clone()
    }

    /// Watch the connection state.
    pub fn subscribe_connection(&self) -> watch::Receiver<bool> {
        self.inner.connection_tx.subscribe()
    }

    /// Watch the BLE activity level.
    pub fn subscribe_ble_activity(&self) -> watch::Receiver<f32> {
        self.inner.ble_activity_tx.subscribe()
    }

    /// Subscribe to outgoing message descriptions.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<String> {
        self.inner.message_tx.subscribe()
    }
}

impl Default for UpstreamSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UpstreamSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSignals")
            .field("connected", &self.is_connected())
            .field("ble_activity", &self.ble_activity())
            .finish()
    }
}

/// Receivers the pipeline reports through.
#[derive(Debug, Clone, Default)]
pub struct ExternalReceivers {
    /// Connection, activity and outgoing-message channels.
    pub signals: UpstreamSignals,
}

impl ExternalReceivers {
    /// Receivers reporting into `signals`.
    pub fn new(signals: UpstreamSignals) -> Self {
        Self { signals }
    }
}

/// Everything the upstream pipeline needs to run. Immutable once built.
#[derive(Clone)]
pub struct UpstreamServiceConfig {
    account_id: String,
    app_version: String,
    endpoint: UpstreamEndpoint,
    device_id: String,
    pacing_enabled: bool,
    payload_logging_enabled: bool,
    coordinates: Arc<dyn CoordinatesProvider>,
    receivers: ExternalReceivers,
    logger: Option<Arc<dyn ExternalLogger>>,
}

impl UpstreamServiceConfig {
    /// Build a configuration.
    ///
    /// An empty `account_id` or `app_version` falls back to a placeholder.
    /// Pacing defaults to on, payload logging to off, endpoint to prod.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Prepare`] if `device_id` is empty.
    pub fn new(
        account_id: &str,
        app_version: &str,
        device_id: &str,
        coordinates: Arc<dyn CoordinatesProvider>,
        receivers: ExternalReceivers,
    ) -> Result<Self, UpstreamError> {
        if device_id.is_empty() {
            return Err(UpstreamError::Prepare(
                "device id is empty".to_string(),
            ));
        }

        Ok(Self {
            account_id: non_empty_or(account_id, PLACEHOLDER_ACCOUNT_ID),
            app_version: non_empty_or(app_version, PLACEHOLDER_APP_VERSION),
            endpoint: UpstreamEndpoint::Prod,
            device_id: device_id.to_string(),
            pacing_enabled: true,
            payload_logging_enabled: false,
            coordinates,
            receivers,
            logger: None,
        })
    }

    /// Select the backend.
    pub fn with_endpoint(mut self, endpoint: UpstreamEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Enable or disable pacing.
    pub fn with_pacing(mut self, enabled: bool) -> Self {
        self.pacing_enabled = enabled;
        self
    }

    /// Enable or disable raw payload logging.
    pub fn with_payload_logging(mut self, enabled: bool) -> Self {
        self.payload_logging_enabled = enabled;
        self
    }

    /// Attach a log sink.
    pub fn with_logger(mut self, logger: Arc<dyn ExternalLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Account the pipeline uploads under.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// App version string.
    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    /// Backend selector.
    pub fn endpoint(&self) -> &UpstreamEndpoint {
        &self.endpoint
    }

    /// Gateway device id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Whether pacing is on.
    pub fn pacing_enabled(&self) -> bool {
        self.pacing_enabled
    }

    /// Whether raw payload logging is on.
    pub fn payload_logging_enabled(&self) -> bool {
        self.payload_logging_enabled
    }

    /// Shared coordinates provider.
    pub fn coordinates(&self) -> &Arc<dyn CoordinatesProvider> {
        &self.coordinates
    }

    /// Receivers the pipeline reports through.
    pub fn receivers(&self) -> &ExternalReceivers {
        &self.receivers
    }

    /// Optional log sink.
    pub fn logger(&self) -> Option<&Arc<dyn ExternalLogger>> {
        self.logger.as_ref()
    }

    /// Write to the attached log sink, if any.
    pub fn log(&self, level: Level, message: &str) {
        if let Some(logger) = &self.logger {
            logger.log(level, message);
        }
    }
}

impl std::fmt::Debug for UpstreamServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamServiceConfig")
            .field("account_id", &self.account_id)
            .field("app_version", &self.app_version)
            .field("endpoint", &self.endpoint)
            .field("device_id", &self.device_id)
            .field("pacing_enabled", &self.pacing_enabled)
            .field("payload_logging_enabled", &self.payload_logging_enabled)
            .field("logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}
