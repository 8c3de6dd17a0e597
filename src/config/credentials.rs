//! Bundled credentials.
//!
//! The application ships a flat TOML table named [`CREDENTIALS_RESOURCE`]
//! holding the app token and the owner id the gateway registers under:
//!
//! ```toml
//! app_token = "..."
//! owner_id = "..."
//! ```
//!
//! Both values are required and must be non-empty. They are returned verbatim.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Fixed resource name of the credentials file.
pub const CREDENTIALS_RESOURCE: &str = "GatewayAuthConstants.toml";

/// Key of the app token.
pub const APP_TOKEN_KEY: &str = "app_token";

/// Key of the owner id.
pub const OWNER_ID_KEY: &str = "owner_id";

/// Directory of static resources shipped with the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    root: PathBuf,
}

impl Bundle {
    /// Bundle rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a resource if it exists.
    pub fn path_for_resource(&self, name: &str) -> Option<PathBuf> {
        let path = self.root.join(name);
        path.is_file().then_some(path)
    }

    /// Contents of a resource, `None` if it does not exist.
    pub fn read_resource(&self, name: &str) -> io::Result<Option<String>> {
        match self.path_for_resource(name) {
            Some(path) => fs::read_to_string(path).map(Some),
            None => Ok(None),
        }
    }
}

/// App token and owner id. Both are non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Token identifying the application to the backend.
    pub app_token: String,
    /// Account the gateway is registered under.
    pub owner_id: String,
}

impl Credentials {
    /// Whether both values are present.
    pub fn is_complete(&self) -> bool {
        !self.app_token.is_empty() && !self.owner_id.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_token", &"<redacted>")
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

/// Read the credentials resource from `bundle`.
///
/// # Errors
///
/// - [`ConfigError::MissingResource`] if the resource is absent or unreadable.
/// - [`ConfigError::MalformedFormat`] if it is not UTF-8 or not a flat table
///   of strings.
/// - [`ConfigError::MissingRequiredValue`] if a required key is absent or empty.
pub fn read_credentials(bundle: &Bundle) -> Result<Credentials, ConfigError> {
    let content = match bundle.read_resource(CREDENTIALS_RESOURCE) {
        Ok(Some(content)) => content,
        Ok(None) => {
            warn!(
                "No '{}' in bundle {}",
                CREDENTIALS_RESOURCE,
                bundle.root().display()
            );
            return Err(missing_resource());
        }
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(ConfigError::MalformedFormat {
                resource: CREDENTIALS_RESOURCE.to_string(),
                reason: e.to_string(),
            });
        }
        Err(e) => {
            warn!("Cannot read '{}': {}", CREDENTIALS_RESOURCE, e);
            return Err(missing_resource());
        }
    };

    parse_credentials(&content)
}

/// Parse the credentials resource content.
pub fn parse_credentials(content: &str) -> Result<Credentials, ConfigError> {
    let table: toml::Table = content.parse().map_err(|e: toml::de::Error| {
        ConfigError::MalformedFormat {
            resource: CREDENTIALS_RESOURCE.to_string(),
            reason: e.message().to_string(),
        }
    })?;

    if let Some((key, _)) = table.iter().find(|(_, value)| !value.is_str()) {
        return Err(ConfigError::MalformedFormat {
            resource: CREDENTIALS_RESOURCE.to_string(),
            reason: format!("value of '{}' is not a string", key),
        });
    }

    let app_token = required_value(&table, APP_TOKEN_KEY)?;
    let owner_id = required_value(&table, OWNER_ID_KEY)?;

    debug!("Credentials read for owner {}", owner_id);

    Ok(Credentials {
        app_token,
        owner_id,
    })
}

fn required_value(table: &toml::Table, key: &str) -> Result<String, ConfigError> {
    match table.get(key).and_then(|v| v.as_str()) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ConfigError::MissingRequiredValue {
            resource: CREDENTIALS_RESOURCE.to_string(),
            key: key.to_string(),
        }),
    }
}

fn missing_resource() -> ConfigError {
    ConfigError::MissingResource {
        resource: CREDENTIALS_RESOURCE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn bundle_with(content: &str) -> (tempfile::TempDir, Bundle) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CREDENTIALS_RESOURCE), content).unwrap();
        let bundle = Bundle::new(dir.path());
        (dir, bundle)
    }

    #[test]
    fn test_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_credentials(&Bundle::new(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::MissingResource { .. }));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CREDENTIALS_RESOURCE),
            b"app_token = \"\xff\xfe\"\nowner_id = \"O1\"\n",
        )
        .unwrap();

        let err = read_credentials(&Bundle::new(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedFormat { .. }));
    }

    #[test]
    fn test_valid_credentials() {
        let (_dir, bundle) = bundle_with("app_token = \"T1\"\nowner_id = \"O1\"\n");
        let creds = read_credentials(&bundle).unwrap();
        assert_eq!(creds.app_token, "T1");
        assert_eq!(creds.owner_id, "O1");
        assert!(creds.is_complete());
    }

    #[test]
    fn test_empty_required_value() {
        let (_dir, bundle) = bundle_with("app_token = \"T1\"\nowner_id = \"\"\n");
        let err = read_credentials(&bundle).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequiredValue {
                resource: CREDENTIALS_RESOURCE.to_string(),
                key: OWNER_ID_KEY.to_string(),
            }
        );
    }

    #[test]
    fn test_absent_required_key() {
        let (_dir, bundle) = bundle_with("owner_id = \"O1\"\n");
        let err = read_credentials(&bundle).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequiredValue { ref key, .. } if key == APP_TOKEN_KEY
        ));
    }

    #[test]
    fn test_unparseable_content() {
        let err = parse_credentials("app_token = ").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedFormat { .. }));
    }

    #[test]
    fn test_non_string_values_are_malformed() {
        let err = parse_credentials("app_token = \"T1\"\nowner_id = 42\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedFormat { .. }));

        let err = parse_credentials("app_token = \"T1\"\n[nested]\nowner_id = \"O1\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::MalformedFormat { .. }));
    }

    #[test]
    fn test_extra_string_keys_are_ignored() {
        let creds =
            parse_credentials("app_token = \"T1\"\nowner_id = \"O1\"\nnote = \"x\"\n").unwrap();
        assert_eq!(creds.owner_id, "O1");
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = parse_credentials("app_token = \"secret\"\nowner_id = \"O1\"\n").unwrap();
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    proptest! {
        #[test]
        fn values_are_returned_verbatim(token in "[ -~]{1,32}", owner in "[ -~]{1,32}") {
            let content = format!(
                "app_token = {}\nowner_id = {}\n",
                toml::Value::String(token.clone()),
                toml::Value::String(owner.clone()),
            );
            let creds = parse_credentials(&content).unwrap();
            prop_assert_eq!(creds.app_token, token);
            prop_assert_eq!(creds.owner_id, owner);
        }
    }
}
