//! Gateway settings with env-var overrides.
//!
//! Reads an optional `gateway.toml`, then applies `GATEWAY_BUNDLE_DIR`,
//! `GATEWAY_REGISTRATION_URL`, `GATEWAY_STORE_PATH` and `GATEWAY_ENDPOINT`
//! from the environment. Every field has a default, so running without a
//! settings file is fine.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::device::JsonFileStore;
use crate::error::SettingsError;
use crate::upstream::UpstreamEndpoint;
use crate::utils::AppBuildInfo;

/// Default location of the settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "gateway.toml";

/// Environment variable selecting the upstream endpoint.
const ENDPOINT_ENV: &str = "GATEWAY_ENDPOINT";

/// Default registration backend.
pub const DEFAULT_REGISTRATION_URL: &str = "https://api.wiliot.com";

/// Fully resolved gateway settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    /// Directory holding the bundled credentials resource.
    pub bundle_dir: PathBuf,
    /// Base URL of the registration backend.
    pub registration_url: String,
    /// Per-request timeout for registration; transport default when `None`.
    pub registration_timeout: Option<Duration>,
    /// Location of the persistent key-value store.
    pub store_path: PathBuf,
    /// Upstream endpoint selector.
    pub endpoint: UpstreamEndpoint,
    /// Whether the upstream pipeline paces outgoing packets.
    pub pacing_enabled: bool,
    /// Whether the upstream pipeline logs raw tag payloads.
    pub payload_logging_enabled: bool,
    /// Version and build reported to the upstream pipeline.
    pub build_info: AppBuildInfo,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from(default_bundle_dir()),
            registration_url: DEFAULT_REGISTRATION_URL.to_string(),
            registration_timeout: None,
            store_path: JsonFileStore::default_path(),
            endpoint: UpstreamEndpoint::Prod,
            pacing_enabled: true,
            payload_logging_enabled: false,
            build_info: AppBuildInfo::from_crate(),
        }
    }
}

/// Values taken from the environment; tests pass them directly.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `GATEWAY_BUNDLE_DIR`
    pub bundle_dir: Option<String>,
    /// `GATEWAY_REGISTRATION_URL`
    pub registration_url: Option<String>,
    /// `GATEWAY_STORE_PATH`
    pub store_path: Option<String>,
    /// `GATEWAY_ENDPOINT`
    pub endpoint: Option<String>,
}

impl Overrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self {
            bundle_dir: env::var("GATEWAY_BUNDLE_DIR").ok(),
            registration_url: env::var("GATEWAY_REGISTRATION_URL").ok(),
            store_path: env::var("GATEWAY_STORE_PATH").ok(),
            endpoint: env::var(ENDPOINT_ENV).ok(),
        }
    }
}

impl GatewaySettings {
    /// Load from `path` (or [`DEFAULT_SETTINGS_PATH`]) and apply env overrides.
    ///
    /// A missing file is not an error; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_PATH));
        Self::load_from(path, Overrides::from_env())
    }

    /// Load from an explicit path with explicit overrides.
    pub fn load_from(path: &Path, overrides: Overrides) -> Result<Self, SettingsError> {
        let raw = match fs::read_to_string(path) {
            Ok(content) => toml::from_str::<RawSettings>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                RawSettings::default()
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        raw.resolve(overrides)
    }
}

/// Raw TOML shape.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    #[serde(default)]
    gateway: RawGateway,
    #[serde(default)]
    upstream: RawUpstream,
    #[serde(default)]
    app: RawApp,
}

#[derive(Debug, Deserialize)]
struct RawGateway {
    #[serde(default = "default_bundle_dir")]
    bundle_dir: String,
    #[serde(default = "default_registration_url")]
    registration_url: String,
    registration_timeout_secs: Option<u64>,
    store_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUpstream {
    #[serde(default = "default_endpoint")]
    endpoint: String,
    #[serde(default = "default_true")]
    pacing_enabled: bool,
    #[serde(default)]
    payload_logging_enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawApp {
    version: Option<String>,
    build: Option<String>,
}

impl Default for RawGateway {
    fn default() -> Self {
        Self {
            bundle_dir: default_bundle_dir(),
            registration_url: default_registration_url(),
            registration_timeout_secs: None,
            store_path: None,
        }
    }
}

impl Default for RawUpstream {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            pacing_enabled: true,
            payload_logging_enabled: false,
        }
    }
}

fn default_bundle_dir() -> String {
    "bundle".to_string()
}

fn default_registration_url() -> String {
    DEFAULT_REGISTRATION_URL.to_string()
}

fn default_endpoint() -> String {
    "prod".to_string()
}

fn default_true() -> bool {
    true
}

impl RawSettings {
    fn resolve(self, overrides: Overrides) -> Result<GatewaySettings, SettingsError> {
        let endpoint: UpstreamEndpoint = match overrides.endpoint {
            Some(value) => value.parse().map_err(|_| SettingsError::InvalidOverride {
                name: ENDPOINT_ENV.to_string(),
                value: value.clone(),
            })?,
            None => self
                .upstream
                .endpoint
                .parse()
                .map_err(|_| SettingsError::InvalidValue {
                    key: "upstream.endpoint".to_string(),
                    value: self.upstream.endpoint.clone(),
                })?,
        };

        let store_path = overrides
            .store_path
            .or(self.gateway.store_path)
            .map(PathBuf::from)
            .unwrap_or_else(JsonFileStore::default_path);

        let crate_info = AppBuildInfo::from_crate();
        let build_info = AppBuildInfo::new(
            self.app.version.unwrap_or_else(|| crate_info.version().to_string()),
            self.app.build.unwrap_or_else(|| crate_info.build().to_string()),
        );

        Ok(GatewaySettings {
            bundle_dir: PathBuf::from(overrides.bundle_dir.unwrap_or(self.gateway.bundle_dir)),
            registration_url: overrides
                .registration_url
                .unwrap_or(self.gateway.registration_url),
            registration_timeout: self
                .gateway
                .registration_timeout_secs
                .map(Duration::from_secs),
            store_path,
            endpoint,
            pacing_enabled: self.upstream.pacing_enabled,
            payload_logging_enabled: self.upstream.payload_logging_enabled,
            build_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_settings(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings =
            GatewaySettings::load_from(&dir.path().join("absent.toml"), Overrides::default())
                .unwrap();
        assert_eq!(settings, GatewaySettings::default());
    }

    #[test]
    fn test_file_values_are_applied() {
        let (_dir, path) = write_settings(
            r#"
[gateway]
bundle_dir = "/opt/gw/bundle"
registration_url = "http://localhost:9000"
registration_timeout_secs = 5
store_path = "/tmp/gw.json"

[upstream]
endpoint = "test"
pacing_enabled = false
payload_logging_enabled = true

[app]
version = "2.1"
build = "77"
"#,
        );

        let settings = GatewaySettings::load_from(&path, Overrides::default()).unwrap();
        assert_eq!(settings.bundle_dir, PathBuf::from("/opt/gw/bundle"));
        assert_eq!(settings.registration_url, "http://localhost:9000");
        assert_eq!(settings.registration_timeout, Some(Duration::from_secs(5)));
        assert_eq!(settings.store_path, PathBuf::from("/tmp/gw.json"));
        assert_eq!(settings.endpoint, UpstreamEndpoint::Test);
        assert!(!settings.pacing_enabled);
        assert!(settings.payload_logging_enabled);
        assert_eq!(settings.build_info.to_string(), "2.1 (build 77)");
    }

    #[test]
    fn test_overrides_win_over_file() {
        let (_dir, path) = write_settings("[gateway]\nbundle_dir = \"from-file\"\n");
        let overrides = Overrides {
            bundle_dir: Some("from-env".to_string()),
            endpoint: Some("https://staging.example.com".to_string()),
            ..Default::default()
        };

        let settings = GatewaySettings::load_from(&path, overrides).unwrap();
        assert_eq!(settings.bundle_dir, PathBuf::from("from-env"));
        assert_eq!(
            settings.endpoint,
            UpstreamEndpoint::Custom("https://staging.example.com".to_string())
        );
    }

    #[test]
    fn test_bad_endpoint_in_file_is_rejected() {
        let (_dir, path) = write_settings("[upstream]\nendpoint = \"\"\n");
        let err = GatewaySettings::load_from(&path, Overrides::default()).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::InvalidValue { ref key, .. } if key == "upstream.endpoint"
        ));
    }

    #[test]
    fn test_bad_endpoint_override_names_env_var() {
        let (_dir, path) = write_settings("[upstream]\nendpoint = \"test\"\n");
        let overrides = Overrides {
            endpoint: Some("staging".to_string()),
            ..Default::default()
        };

        let err = GatewaySettings::load_from(&path, overrides).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::InvalidOverride { ref name, ref value }
                if name == "GATEWAY_ENDPOINT" && value == "staging"
        ));
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        let (_dir, path) = write_settings("[mqtt]\nhost = \"x\"\n");
        let err = GatewaySettings::load_from(&path, Overrides::default()).unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
