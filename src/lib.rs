// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]

//! # ble-upstream-gateway
//!
//! Bootstrap for a mobile BLE-to-cloud gateway. The crate reads the
//! credentials shipped with the application, acquires Bluetooth and location
//! permissions, registers the gateway with the backend for short-lived
//! tokens, and then configures and starts an external upstream pipeline that
//! does the actual scanning and uploading.
//!
//! The pipeline itself is not part of this crate. It plugs in through
//! [`UpstreamServiceFactory`]; [`DryRunFactory`] stands in for it when no
//! vendor pipeline is available.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ble_upstream_gateway::{DryRunFactory, GatewayOrchestrator, GatewaySettings, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = GatewaySettings::load(None)?;
//!     let gateway = GatewayOrchestrator::from_settings(&settings, Arc::new(DryRunFactory::new()))?;
//!
//!     let _status = gateway.on_status(|line| println!("{}", line));
//!     let state = gateway.load_required_data().await;
//!     println!("Bootstrap finished: {}", state);
//!
//!     gateway.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Bundled credentials
//!
//! The bundle directory must contain `GatewayAuthConstants.toml`:
//!
//! ```toml
//! app_token = "<app token>"
//! owner_id = "<owner id>"
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps; the permission probe triggers the
//! consent prompt.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod callback;
pub mod config;
pub mod device;
pub mod error;
pub mod location;
pub mod orchestrator;
pub mod permissions;
pub mod registration;
pub mod upstream;
pub mod utils;

// Re-exports for convenience
pub use callback::CallbackHandle;
pub use config::{read_credentials, Bundle, Credentials, GatewaySettings};
pub use device::{IdentityProvider, JsonFileStore, KeyValueStore, MemoryStore, RandomVendorId};
pub use error::{ConfigError, Error, RegistrationError, Result, SettingsError, UpstreamError};
pub use location::{Coordinates, CoordinatesProvider, LocationService};
pub use orchestrator::{can_prepare, BootstrapState, GatewayOrchestrator};
pub use permissions::{
    BtleplugPermissions, PermissionCoordinator, PermissionProvider, PermissionRequest,
    PermissionState, StaticPermissions,
};
pub use registration::{GatewayTokens, HttpRegistrationClient, RegistrationClient};
pub use upstream::{
    DryRunFactory, DryRunUpstream, ExternalLogger, ExternalReceivers, TracingLogger,
    UpstreamEndpoint, UpstreamService, UpstreamServiceConfig, UpstreamServiceFactory,
    UpstreamSignals,
};
pub use utils::AppBuildInfo;
