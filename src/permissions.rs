//! BLE and location permission handling.
//!
//! The upstream pipeline needs both Bluetooth and location access. The
//! [`PermissionCoordinator`] checks the combined status and, when needed,
//! runs the platform consent flow. The outcome of a request is delivered
//! exactly once through a [`PermissionRequest`] future; the sending half is
//! released after the first delivery, so a late second result from the
//! platform has nobody to reach.

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How long the consent probe keeps the adapter scanning.
const CONSENT_PROBE_SCAN: Duration = Duration::from_millis(200);

/// Where the permission flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PermissionState {
    /// Not checked yet.
    #[default]
    Unknown,
    /// Granted at check time, no request needed.
    AlreadyGranted,
    /// Checked and not granted.
    NotGranted,
    /// The platform consent flow is running.
    Requesting,
    /// Granted by the consent flow.
    Granted,
    /// Denied by the consent flow.
    Denied,
}

impl PermissionState {
    /// Whether the combined BLE and location permissions are held.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::AlreadyGranted | Self::Granted)
    }
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::AlreadyGranted => write!(f, "Already granted"),
            Self::NotGranted => write!(f, "Not granted"),
            Self::Requesting => write!(f, "Requesting"),
            Self::Granted => write!(f, "Granted"),
            Self::Denied => write!(f, "Denied"),
        }
    }
}

/// Platform side of the permission flow.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Whether BLE and location access are currently authorized.
    fn is_authorized(&self) -> bool;

    /// Run the consent flow and report whether access was granted.
    async fn request_authorization(&self) -> bool;
}

/// Outcome of [`PermissionCoordinator::request_permissions`].
///
/// Resolves to `true` when permissions are granted. A request whose sender
/// is dropped without delivering resolves to `false`.
#[derive(Debug)]
pub struct PermissionRequest {
    inner: RequestInner,
}

#[derive(Debug)]
enum RequestInner {
    Ready(Option<bool>),
    Pending(oneshot::Receiver<bool>),
}

impl PermissionRequest {
    fn ready(granted: bool) -> Self {
        Self {
            inner: RequestInner::Ready(Some(granted)),
        }
    }

    fn pending(rx: oneshot::Receiver<bool>) -> Self {
        Self {
            inner: RequestInner::Pending(rx),
        }
    }
}

impl Future for PermissionRequest {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        match &mut self.inner {
            RequestInner::Ready(value) => Poll::Ready(value.take().unwrap_or(false)),
            RequestInner::Pending(rx) => rx.poll_unpin(cx).map(|r| r.unwrap_or(false)),
        }
    }
}

/// Checks and requests the permissions the upstream pipeline needs.
#[derive(Clone)]
pub struct PermissionCoordinator {
    provider: Arc<dyn PermissionProvider>,
    state: Arc<RwLock<PermissionState>>,
    pending: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
}

impl PermissionCoordinator {
    /// Create a coordinator over a platform provider.
    pub fn new(provider: Arc<dyn PermissionProvider>) -> Self {
        Self {
            provider,
            state: Arc::new(RwLock::new(PermissionState::Unknown)),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Current state.
    pub fn state(&self) -> PermissionState {
        *self.state.read()
    }

    /// Whether the combined permissions are held.
    pub fn granted(&self) -> bool {
        self.state().is_granted()
    }

    /// Query the platform and record the result.
    pub fn check_status(&self) -> PermissionState {
        let state = if self.provider.is_authorized() {
            PermissionState::AlreadyGranted
        } else {
            PermissionState::NotGranted
        };
        debug!("Permission status checked: {}", state);
        *self.state.write() = state;
        state
    }

    /// Request permissions.
    ///
    /// When already granted the returned request is ready with `true` and
    /// the platform flow is not invoked. Otherwise the consent flow runs on
    /// a spawned task and its single result completes the request.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request_permissions(&self) -> PermissionRequest {
        if self.granted() {
            debug!("Permissions already granted, skipping platform request");
            return PermissionRequest::ready(true);
        }

        let (tx, rx) = oneshot::channel();
        if self.pending.lock().replace(tx).is_some() {
            warn!("Superseding an unfinished permission request");
        }
        *self.state.write() = PermissionState::Requesting;
        info!("Requesting BLE and location permissions");

        let coordinator = self.clone();
        tokio::spawn(async move {
            let granted = coordinator.provider.request_authorization().await;
            coordinator.complete_request(granted);
        });

        PermissionRequest::pending(rx)
    }

    /// Record a platform consent result and notify the pending request.
    ///
    /// Returns `false` when nobody was listening, which is the case for any
    /// result after the first one.
    pub fn complete_request(&self, granted: bool) -> bool {
        let sender = self.pending.lock().take();
        let Some(sender) = sender else {
            debug!("Permission result {} arrived with no listener", granted);
            return false;
        };

        *self.state.write() = if granted {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        info!("Permission request completed: granted={}", granted);

        sender.send(granted).is_ok()
    }
}

impl std::fmt::Debug for PermissionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCoordinator")
            .field("state", &self.state())
            .field("pending", &self.pending.lock().is_some())
            .finish()
    }
}

/// Fixed answers, for platforms without a consent flow and for tests.
#[derive(Debug)]
pub struct StaticPermissions {
    authorized: AtomicBool,
    grant_on_request: bool,
}

impl StaticPermissions {
    /// Already authorized.
    pub fn granted() -> Self {
        Self::new(true, true)
    }

    /// Not authorized; a request yields `grant_on_request`.
    pub fn new(authorized: bool, grant_on_request: bool) -> Self {
        Self {
            authorized: AtomicBool::new(authorized),
            grant_on_request,
        }
    }
}

#[async_trait]
impl PermissionProvider for StaticPermissions {
    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn request_authorization(&self) -> bool {
        if self.grant_on_request {
            self.authorized.store(true, Ordering::SeqCst);
        }
        self.grant_on_request
    }
}

/// Permission provider backed by the host Bluetooth stack.
///
/// Opening the first adapter and briefly scanning is what triggers the
/// platform consent prompt on macOS, and fails on hosts without a usable
/// adapter. Desktop hosts have no separate location permission, so BLE
/// access alone counts as the combined grant.
#[derive(Debug, Default)]
pub struct BtleplugPermissions {
    authorized: AtomicBool,
}

impl BtleplugPermissions {
    /// Create a provider. Nothing is authorized until a request succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    async fn first_adapter() -> Result<Adapter> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        adapters.into_iter().next().ok_or(Error::InvalidParameter {
            name: "bluetooth adapter".to_string(),
            value: "none available".to_string(),
        })
    }

    async fn probe_scan() -> Result<()> {
        let adapter = Self::first_adapter().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(CONSENT_PROBE_SCAN).await;
        adapter.stop_scan().await?;
        Ok(())
    }
}

#[async_trait]
impl PermissionProvider for BtleplugPermissions {
    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    async fn request_authorization(&self) -> bool {
        match Self::probe_scan().await {
            Ok(()) => {
                info!("Bluetooth access confirmed");
                self.authorized.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!("Bluetooth access unavailable: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_ready_eq, task};

    #[test]
    fn test_permission_state_is_granted() {
        assert!(PermissionState::AlreadyGranted.is_granted());
        assert!(PermissionState::Granted.is_granted());
        assert!(!PermissionState::Unknown.is_granted());
        assert!(!PermissionState::Requesting.is_granted());
        assert!(!PermissionState::Denied.is_granted());
    }

    #[test]
    fn test_already_granted_resolves_without_request() {
        let mut provider = MockPermissionProvider::new();
        provider.expect_is_authorized().times(1).return_const(true);
        provider.expect_request_authorization().never();

        let coordinator = PermissionCoordinator::new(Arc::new(provider));
        assert_eq!(coordinator.check_status(), PermissionState::AlreadyGranted);

        // No runtime needed: the ready path never spawns.
        let mut request = task::spawn(coordinator.request_permissions());
        assert_ready_eq!(request.poll(), true);
    }

    #[tokio::test]
    async fn test_request_delivers_once() {
        let mut provider = MockPermissionProvider::new();
        provider.expect_is_authorized().return_const(false);
        provider
            .expect_request_authorization()
            .times(1)
            .returning(|| true);

        let coordinator = PermissionCoordinator::new(Arc::new(provider));
        assert_eq!(coordinator.check_status(), PermissionState::NotGranted);

        let granted = coordinator.request_permissions().await;
        assert!(granted);
        assert_eq!(coordinator.state(), PermissionState::Granted);

        // A second platform completion finds no listener and changes nothing.
        assert!(!coordinator.complete_request(false));
        assert_eq!(coordinator.state(), PermissionState::Granted);
    }

    #[tokio::test]
    async fn test_request_denied() {
        let coordinator = PermissionCoordinator::new(Arc::new(StaticPermissions::new(false, false)));
        coordinator.check_status();

        assert!(!coordinator.request_permissions().await);
        assert_eq!(coordinator.state(), PermissionState::Denied);
        assert!(!coordinator.granted());
    }

    #[tokio::test]
    async fn test_superseded_request_resolves_false() {
        let coordinator = PermissionCoordinator::new(Arc::new(StaticPermissions::new(false, true)));
        coordinator.check_status();

        // Install a listener by hand so the spawned flow cannot win the race.
        let (tx, rx) = oneshot::channel();
        *coordinator.pending.lock() = Some(tx);
        let first = PermissionRequest::pending(rx);

        let second = coordinator.request_permissions();
        assert!(!first.await);
        assert!(second.await);
    }

    #[tokio::test]
    async fn test_static_permissions_remember_grant() {
        let provider = StaticPermissions::new(false, true);
        assert!(!provider.is_authorized());
        assert!(provider.request_authorization().await);
        assert!(provider.is_authorized());
    }
}
