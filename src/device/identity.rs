//! Device identifier resolution.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::device::store::KeyValueStore;

/// Store key holding the resolved device identifier.
pub const DEVICE_ID_KEY: &str = "GatewayDeviceID";

/// Source of the OS-provided vendor identifier.
#[cfg_attr(test, mockall::automock)]
pub trait VendorIdSource: Send + Sync {
    /// The vendor identifier, or `None` when the platform cannot provide one.
    fn vendor_id(&self) -> Option<String>;
}

/// Generates a fresh random identifier in vendor-id format.
///
/// Desktop platforms have no per-vendor install identifier, so a v4 UUID is
/// minted instead. Persistence happens in [`IdentityProvider`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomVendorId;

impl VendorIdSource for RandomVendorId {
    fn vendor_id(&self) -> Option<String> {
        Some(
            uuid::Uuid::new_v4()
                .hyphenated()
                .to_string()
                .to_uppercase(),
        )
    }
}

/// Vendor identifier known up front.
#[derive(Debug, Clone, Default)]
pub struct FixedVendorId(pub Option<String>);

impl VendorIdSource for FixedVendorId {
    fn vendor_id(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Resolves and memoizes the stable per-install device identifier.
pub struct IdentityProvider {
    store: Arc<dyn KeyValueStore>,
    source: Box<dyn VendorIdSource>,
    cached: RwLock<Option<String>>,
}

impl IdentityProvider {
    /// Create a provider over `store`, deriving new identifiers from `source`.
    pub fn new(store: Arc<dyn KeyValueStore>, source: impl VendorIdSource + 'static) -> Self {
        Self {
            store,
            source: Box::new(source),
            cached: RwLock::new(None),
        }
    }

    /// The device identifier.
    ///
    /// Never fails. An unavailable vendor identifier yields an empty string,
    /// which is neither stored nor memoized so a later call may still resolve
    /// a real value.
    pub fn device_id(&self) -> String {
        if let Some(id) = self.cached.read().as_ref() {
            return id.clone();
        }

        if let Some(stored) = self.store.get(DEVICE_ID_KEY) {
            debug!("Device id loaded from store");
            self.remember(&stored);
            return stored;
        }

        let derived = self.source.vendor_id().unwrap_or_default();
        if derived.is_empty() {
            warn!("Vendor identifier unavailable, device id is empty");
            return derived;
        }

        info!("Derived new device id {}", derived);
        if let Err(e) = self.store.set(DEVICE_ID_KEY, &derived) {
            warn!("Failed to persist device id: {}", e);
        }

        self.remember(&derived);
        derived
    }

    fn remember(&self, id: &str) {
        if !id.is_empty() {
            *self.cached.write() = Some(id.to_string());
        }
    }
}

impl std::fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProvider")
            .field("cached", &*self.cached.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::store::{JsonFileStore, MemoryStore, MockKeyValueStore};

    #[test]
    fn test_device_id_is_memoized() {
        let mut source = MockVendorIdSource::new();
        source
            .expect_vendor_id()
            .times(1)
            .returning(|| Some("VENDOR-1".to_string()));

        let provider = IdentityProvider::new(Arc::new(MemoryStore::new()), source);
        assert_eq!(provider.device_id(), "VENDOR-1");
        assert_eq!(provider.device_id(), "VENDOR-1");
    }

    #[test]
    fn test_stored_value_wins_over_vendor_id() {
        let store = Arc::new(MemoryStore::new());
        store.set(DEVICE_ID_KEY, "STORED").unwrap();

        let mut source = MockVendorIdSource::new();
        source.expect_vendor_id().never();

        let provider = IdentityProvider::new(store, source);
        assert_eq!(provider.device_id(), "STORED");
    }

    #[test]
    fn test_relaunch_reads_previous_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let first = IdentityProvider::new(Arc::new(JsonFileStore::new(&path)), RandomVendorId);
        let id = first.device_id();
        assert!(!id.is_empty());
        drop(first);

        let relaunched =
            IdentityProvider::new(Arc::new(JsonFileStore::new(&path)), RandomVendorId);
        assert_eq!(relaunched.device_id(), id);
    }

    #[test]
    fn test_first_resolution_writes_store_once() {
        let mut store = MockKeyValueStore::new();
        store.expect_get().times(1).returning(|_| None);
        store
            .expect_set()
            .withf(|key: &str, value: &str| key == DEVICE_ID_KEY && value == "VENDOR-2")
            .times(1)
            .returning(|_, _| Ok(()));

        let provider = IdentityProvider::new(
            Arc::new(store),
            FixedVendorId(Some("VENDOR-2".to_string())),
        );
        assert_eq!(provider.device_id(), "VENDOR-2");
        assert_eq!(provider.device_id(), "VENDOR-2");
    }

    #[test]
    fn test_store_failure_still_returns_id() {
        let mut store = MockKeyValueStore::new();
        store.expect_get().returning(|_| None);
        store
            .expect_set()
            .returning(|_, _| Err(std::io::Error::new(std::io::ErrorKind::Other, "read-only")));

        let provider = IdentityProvider::new(
            Arc::new(store),
            FixedVendorId(Some("VENDOR-3".to_string())),
        );
        assert_eq!(provider.device_id(), "VENDOR-3");
    }

    #[test]
    fn test_unavailable_vendor_id_is_empty() {
        let provider = IdentityProvider::new(Arc::new(MemoryStore::new()), FixedVendorId(None));
        assert_eq!(provider.device_id(), "");
    }

    #[test]
    fn test_vendor_id_available_on_later_call() {
        let mut seq = mockall::Sequence::new();
        let mut source = MockVendorIdSource::new();
        source
            .expect_vendor_id()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| None);
        source
            .expect_vendor_id()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Some("LATE".to_string()));

        let store = Arc::new(MemoryStore::new());
        let provider = IdentityProvider::new(store.clone(), source);

        assert_eq!(provider.device_id(), "");
        assert!(store.get(DEVICE_ID_KEY).is_none());

        assert_eq!(provider.device_id(), "LATE");
        assert_eq!(provider.device_id(), "LATE");
        assert_eq!(store.get(DEVICE_ID_KEY).as_deref(), Some("LATE"));
    }

    #[test]
    fn test_random_vendor_id_format() {
        let id = RandomVendorId.vendor_id().unwrap();
        assert_eq!(id.len(), 36);
        assert_eq!(id, id.to_uppercase());
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
