//! Gateway bootstrap orchestration.
//!
//! [`GatewayOrchestrator`] runs the single-shot bootstrap sequence:
//! read credentials, acquire permissions, register the gateway, prepare the
//! upstream pipeline and start it. Every step pushes a status line to
//! subscribers. Any failure ends the attempt in [`BootstrapState::Failed`];
//! nothing is retried until the caller runs [`load_required_data`] again.
//!
//! [`load_required_data`]: GatewayOrchestrator::load_required_data

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::callback::CallbackHandle;
use crate::config::{read_credentials, Bundle, Credentials, GatewaySettings};
use crate::device::{IdentityProvider, JsonFileStore, RandomVendorId};
use crate::error::{Error, Result};
use crate::location::LocationService;
use crate::permissions::{BtleplugPermissions, PermissionCoordinator, PermissionProvider};
use crate::registration::{HttpRegistrationClient, RegistrationClient};
use crate::upstream::{
    ExternalLogger, ExternalReceivers, UpstreamEndpoint, UpstreamService, UpstreamServiceConfig,
    UpstreamServiceFactory, UpstreamSignals,
};
use crate::utils::AppBuildInfo;

/// Capacity of the status and permission channels.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Where the bootstrap sequence stands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum BootstrapState {
    /// Nothing started yet, or stopped.
    #[default]
    Idle,
    /// Reading bundled credentials.
    ReadingConfig,
    /// Checking or requesting BLE and location permissions.
    RequestingPermissions,
    /// Waiting for gateway tokens.
    Registering,
    /// Building and preparing the upstream pipeline.
    Preparing,
    /// Starting the upstream pipeline.
    Starting,
    /// Upstream pipeline running.
    Running,
    /// The last attempt failed with this message.
    Failed(String),
}

impl BootstrapState {
    /// Whether the gateway is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether the last attempt failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::ReadingConfig => write!(f, "Reading config"),
            Self::RequestingPermissions => write!(f, "Requesting permissions"),
            Self::Registering => write!(f, "Registering"),
            Self::Preparing => write!(f, "Preparing"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Whether registration may begin.
///
/// True only when permissions are granted and both credential values are
/// non-empty.
pub fn can_prepare(permissions_granted: bool, credentials: Option<&Credentials>) -> bool {
    permissions_granted && credentials.map_or(false, Credentials::is_complete)
}

/// Options passed through to the upstream configuration.
#[derive(Clone)]
struct UpstreamOptions {
    endpoint: UpstreamEndpoint,
    pacing_enabled: bool,
    payload_logging_enabled: bool,
    logger: Option<Arc<dyn ExternalLogger>>,
}

impl Default for UpstreamOptions {
    fn default() -> Self {
        Self {
            endpoint: UpstreamEndpoint::Prod,
            pacing_enabled: true,
            payload_logging_enabled: false,
            logger: None,
        }
    }
}

/// Resets the single-flight flag when a run ends or its future is dropped.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives the gateway bootstrap and exposes its progress.
pub struct GatewayOrchestrator {
    bundle: Bundle,
    identity: IdentityProvider,
    permissions: PermissionCoordinator,
    registration: Arc<dyn RegistrationClient>,
    factory: Arc<dyn UpstreamServiceFactory>,
    options: UpstreamOptions,
    build_info: AppBuildInfo,
    credentials: RwLock<Option<Credentials>>,
    location: RwLock<Option<Arc<LocationService>>>,
    upstream: RwLock<Option<Arc<dyn UpstreamService>>>,
    state: RwLock<BootstrapState>,
    in_flight: AtomicBool,
    status_tx: broadcast::Sender<String>,
    status_log: RwLock<Vec<String>>,
    permissions_tx: broadcast::Sender<bool>,
    signals: UpstreamSignals,
    callback_counter: AtomicU64,
}

impl GatewayOrchestrator {
    /// Create an orchestrator from its collaborators.
    ///
    /// Build info defaults to this crate's version; see [`with_build_info`].
    ///
    /// [`with_build_info`]: Self::with_build_info
    pub fn new(
        bundle: Bundle,
        identity: IdentityProvider,
        permissions: Arc<dyn PermissionProvider>,
        registration: Arc<dyn RegistrationClient>,
        factory: Arc<dyn UpstreamServiceFactory>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (permissions_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        Self {
            bundle,
            identity,
            permissions: PermissionCoordinator::new(permissions),
            registration,
            factory,
            options: UpstreamOptions::default(),
            build_info: AppBuildInfo::from_crate(),
            credentials: RwLock::new(None),
            location: RwLock::new(None),
            upstream: RwLock::new(None),
            state: RwLock::new(BootstrapState::Idle),
            in_flight: AtomicBool::new(false),
            status_tx,
            status_log: RwLock::new(Vec::new()),
            permissions_tx,
            signals: UpstreamSignals::new(),
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Create an orchestrator wired to the host: JSON file store, random
    /// vendor id, Bluetooth permission probe and HTTP registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_settings(
        settings: &GatewaySettings,
        factory: Arc<dyn UpstreamServiceFactory>,
    ) -> Result<Self> {
        let identity = IdentityProvider::new(
            Arc::new(JsonFileStore::new(&settings.store_path)),
            RandomVendorId,
        );
        let registration = HttpRegistrationClient::with_timeout(
            settings.registration_url.clone(),
            settings.registration_timeout,
        )?;

        Ok(Self::new(
            Bundle::new(&settings.bundle_dir),
            identity,
            Arc::new(BtleplugPermissions::new()),
            Arc::new(registration),
            factory,
        )
        .with_build_info(settings.build_info.clone())
        .with_endpoint(settings.endpoint.clone())
        .with_pacing(settings.pacing_enabled)
        .with_payload_logging(settings.payload_logging_enabled))
    }

    /// Version and build reported to the upstream pipeline.
    pub fn with_build_info(mut self, build_info: AppBuildInfo) -> Self {
        self.build_info = build_info;
        self
    }

    /// Upstream backend selector.
    pub fn with_endpoint(mut self, endpoint: UpstreamEndpoint) -> Self {
        self.options.endpoint = endpoint;
        self
    }

    /// Upstream pacing.
    pub fn with_pacing(mut self, enabled: bool) -> Self {
        self.options.pacing_enabled = enabled;
        self
    }

    /// Upstream raw payload logging.
    pub fn with_payload_logging(mut self, enabled: bool) -> Self {
        self.options.payload_logging_enabled = enabled;
        self
    }

    /// Log sink handed to the upstream pipeline.
    pub fn with_logger(mut self, logger: Arc<dyn ExternalLogger>) -> Self {
        self.options.logger = Some(logger);
        self
    }

    // === Bootstrap ===

    /// Run the bootstrap sequence and return the state it ended in.
    ///
    /// Calling this while a run is in flight, or once the gateway is
    /// running, does nothing and returns the current state. After a failure
    /// it starts over from reading the credentials.
    pub async fn load_required_data(&self) -> BootstrapState {
        let current = self.state();
        if current.is_running() {
            debug!("Gateway already running");
            return current;
        }

        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Bootstrap already in flight");
            return current;
        }
        let _guard = FlightGuard(&self.in_flight);

        // A concurrent run may have finished between the first check and the swap.
        let current = self.state();
        if current.is_running() {
            debug!("Gateway already running");
            return current;
        }

        if let Err(e) = self.run_bootstrap().await {
            self.fail(e);
        }

        self.state()
    }

    async fn run_bootstrap(&self) -> Result<()> {
        self.transition(BootstrapState::ReadingConfig, "Reading API Token and Owner ID");
        let credentials = read_credentials(&self.bundle)?;
        self.emit_status(format!(
            "Credentials present. OwnerId: {}",
            credentials.owner_id
        ));
        *self.credentials.write() = Some(credentials.clone());

        self.transition(
            BootstrapState::RequestingPermissions,
            "Checking BLE and Location permissions",
        );
        self.permissions.check_status();
        let granted = if self.permissions.granted() {
            true
        } else {
            self.emit_status("Requesting system permissions...");
            self.permissions.request_permissions().await
        };

        if !granted {
            return Err(Error::PermissionDenied);
        }
        self.emit_status("Required BLE and Location permissions granted.");
        let _ = self.permissions_tx.send(true);

        if !self.can_prepare() {
            return Err(Error::Internal(
                "credentials or permissions missing before registration".to_string(),
            ));
        }

        let device_id = self.identity.device_id();
        self.transition(
            BootstrapState::Registering,
            format!(
                "Registering gateway {} for owner {}",
                device_id, credentials.owner_id
            ),
        );
        let tokens = self
            .registration
            .register_gateway(&credentials.owner_id, &device_id, &credentials.app_token)
            .await?;
        info!("Gateway registered: {:?}", tokens);

        self.transition(BootstrapState::Preparing, "Preparing upstream service");
        let upstream = self.prepare_upstream(&credentials, &device_id, tokens.auth()).await?;

        self.transition(BootstrapState::Starting, "Starting Connection..");
        upstream.start().await?;

        self.transition(BootstrapState::Running, "Gateway started");
        Ok(())
    }

    async fn prepare_upstream(
        &self,
        credentials: &Credentials,
        device_id: &str,
        auth_token: &str,
    ) -> Result<Arc<dyn UpstreamService>> {
        let location = self.location_service();

        let mut config = UpstreamServiceConfig::new(
            &credentials.owner_id,
            &self.build_info.to_string(),
            device_id,
            location,
            ExternalReceivers::new(self.signals.clone()),
        )?
        .with_endpoint(self.options.endpoint.clone())
        .with_pacing(self.options.pacing_enabled)
        .with_payload_logging(self.options.payload_logging_enabled);

        if let Some(logger) = &self.options.logger {
            config = config.with_logger(logger.clone());
        }

        let upstream = self.factory.create(config)?;
        *self.upstream.write() = Some(upstream.clone());

        upstream.prepare(auth_token).await?;
        Ok(upstream)
    }

    /// Stop a running gateway and return to [`BootstrapState::Idle`].
    ///
    /// # Errors
    ///
    /// Returns the upstream error if stopping fails; the state is left as is.
    pub async fn stop(&self) -> Result<()> {
        if !self.state().is_running() {
            return Ok(());
        }

        let upstream = self.upstream.read().clone();
        if let Some(upstream) = upstream {
            upstream.stop().await?;
        }

        self.transition(BootstrapState::Idle, "Gateway stopped");
        Ok(())
    }

    // === State ===

    /// Current bootstrap state.
    pub fn state(&self) -> BootstrapState {
        self.state.read().clone()
    }

    /// Whether registration may begin.
    pub fn can_prepare(&self) -> bool {
        can_prepare(self.permissions.granted(), self.credentials.read().as_ref())
    }

    /// Credentials read by the last attempt.
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    /// Device identifier of this gateway.
    pub fn device_id(&self) -> String {
        self.identity.device_id()
    }

    /// Build info reported upstream.
    pub fn build_info(&self) -> &AppBuildInfo {
        &self.build_info
    }

    /// Permission coordinator.
    pub fn permissions(&self) -> &PermissionCoordinator {
        &self.permissions
    }

    /// The location service, created on first use and kept for the
    /// orchestrator's lifetime.
    pub fn location_service(&self) -> Arc<LocationService> {
        if let Some(location) = self.location.read().as_ref() {
            return location.clone();
        }

        let mut slot = self.location.write();
        slot.get_or_insert_with(|| {
            debug!("Creating location service");
            Arc::new(LocationService::new())
        })
        .clone()
    }

    /// Location service, if it was created.
    pub fn existing_location_service(&self) -> Option<Arc<LocationService>> {
        self.location.read().clone()
    }

    // === Observers ===

    /// Every status line emitted so far, oldest first.
    pub fn status_history(&self) -> Vec<String> {
        self.status_log.read().clone()
    }

    /// Subscribe to status lines.
    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status_tx.subscribe()
    }

    /// Register a callback for status lines.
    pub fn on_status<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        CallbackHandle::spawn_listener(callback_id, self.status_tx.subscribe(), callback)
    }

    /// Subscribe to permission grants.
    pub fn subscribe_permissions(&self) -> broadcast::Receiver<bool> {
        self.permissions_tx.subscribe()
    }

    /// Watch the upstream connection state.
    pub fn subscribe_connection(&self) -> watch::Receiver<bool> {
        self.signals.subscribe_connection()
    }

    /// Watch the BLE activity level (0.0 to 1.0).
    pub fn subscribe_ble_activity(&self) -> watch::Receiver<f32> {
        self.signals.subscribe_ble_activity()
    }

    /// Subscribe to descriptions of messages sent upstream.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<String> {
        self.signals.subscribe_messages()
    }

    /// Register a callback for descriptions of messages sent upstream.
    pub fn on_message_sent<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        CallbackHandle::spawn_listener(callback_id, self.signals.subscribe_messages(), callback)
    }

    /// Signals shared with the upstream pipeline.
    pub fn signals(&self) -> &UpstreamSignals {
        &self.signals
    }

    // === Internals ===

    fn transition(&self, next: BootstrapState, status: impl Into<String>) {
        let previous = std::mem::replace(&mut *self.state.write(), next.clone());
        debug!("Bootstrap state: {} -> {}", previous, next);
        self.emit_status(status);
    }

    fn fail(&self, error: Error) {
        let message = error.to_string();
        warn!("Bootstrap failed: {}", message);
        *self.state.write() = BootstrapState::Failed(message.clone());
        self.emit_status(message);
    }

    fn emit_status(&self, status: impl Into<String>) {
        let status = status.into();
        info!("{}", status);
        self.status_log.write().push(status.clone());
        let _ = self.status_tx.send(status);
    }
}

impl std::fmt::Debug for GatewayOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayOrchestrator")
            .field("bundle", &self.bundle)
            .field("state", &self.state())
            .field("permissions", &self.permissions)
            .field("build_info", &self.build_info)
            .finish_non_exhaustive()
    }
}
