//! Error types for the ble-upstream-gateway crate.

use thiserror::Error;

/// Failure to read the bundled credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The credentials resource is not present in the bundle.
    #[error("No required data found in app bundle: missing '{resource}'")]
    MissingResource {
        /// Name of the resource that was looked up.
        resource: String,
    },

    /// The resource exists but is not a flat string-to-string mapping.
    #[error("Wrong required data format in '{resource}': {reason}")]
    MalformedFormat {
        /// Name of the resource that failed to parse.
        resource: String,
        /// Parser message or offending key.
        reason: String,
    },

    /// One of the required keys is absent or empty.
    #[error("No APP Token or Owner ID. Please provide values in the bundle file named '{resource}' (missing '{key}')")]
    MissingRequiredValue {
        /// Name of the resource that was read.
        resource: String,
        /// The first required key that was missing or empty.
        key: String,
    },
}

/// Failure of the gateway registration call.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("registration rejected with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The response was well-formed but carried no gateway auth token.
    #[error("not found GW Auth token")]
    MissingAuthToken,
}

impl From<reqwest::Error> for RegistrationError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Failure reported by the external upstream service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Building the service or its `prepare` call failed.
    #[error("failed to prepare upstream service: {0}")]
    Prepare(String),

    /// The `start` call failed.
    #[error("failed to start upstream service: {0}")]
    Start(String),
}

/// Failure to load ambient gateway settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("cannot read settings file {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for [`GatewaySettings`](crate::config::GatewaySettings).
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// A settings file entry holds an unusable value.
    #[error("invalid value for {key} in settings file: {value}")]
    InvalidValue {
        /// Dotted key, e.g. `upstream.endpoint`.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// An environment override holds an unusable value.
    #[error("invalid value for {name}: {value}")]
    InvalidOverride {
        /// Environment variable name.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Credentials could not be read from the bundle.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Ambient settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// BLE or location permissions were not granted.
    #[error("No required BLE or Location permissions.")]
    PermissionDenied,

    /// Gateway registration failed.
    #[error("Failure registering mobile gateway: {0}")]
    Registration(#[from] RegistrationError),

    /// The upstream service could not be prepared or started.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_names_resource() {
        let e = ConfigError::MissingResource {
            resource: "GatewayAuthConstants.toml".to_string(),
        };
        assert!(e.to_string().contains("GatewayAuthConstants.toml"));
    }

    #[test]
    fn test_registration_error_wraps_into_error() {
        let e: Error = RegistrationError::MissingAuthToken.into();
        assert_eq!(
            e.to_string(),
            "Failure registering mobile gateway: not found GW Auth token"
        );
    }

    #[test]
    fn test_upstream_error_is_transparent() {
        let e: Error = UpstreamError::Start("radio off".to_string()).into();
        assert_eq!(e.to_string(), "failed to start upstream service: radio off");
    }
}
