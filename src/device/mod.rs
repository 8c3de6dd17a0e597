//! Per-install device identity.
//!
//! The gateway identifies itself to the backend and to the upstream pipeline
//! with a stable identifier that survives restarts. This module resolves that
//! identifier and persists it through an injected key-value store.

pub mod identity;
pub mod store;

pub use identity::{FixedVendorId, IdentityProvider, RandomVendorId, VendorIdSource, DEVICE_ID_KEY};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
