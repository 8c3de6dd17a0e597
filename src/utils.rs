//! Utility types and functions for the ble-upstream-gateway crate.

/// Version and build of the application, shown as `"1.2 (build 34)"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppBuildInfo {
    version: String,
    build: String,
}

impl AppBuildInfo {
    /// Create build info from explicit values.
    pub fn new(version: impl Into<String>, build: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            build: build.into(),
        }
    }

    /// Build info of this crate. The build number is taken from
    /// `GATEWAY_BUILD_NUMBER` at compile time and defaults to `"0"`.
    pub fn from_crate() -> Self {
        Self::new(
            env!("CARGO_PKG_VERSION"),
            option_env!("GATEWAY_BUILD_NUMBER").unwrap_or("0"),
        )
    }

    /// Version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Build string.
    pub fn build(&self) -> &str {
        &self.build
    }

    /// Whether both parts are known.
    pub fn is_complete(&self) -> bool {
        !self.version.is_empty() && !self.build.is_empty()
    }
}

impl std::fmt::Display for AppBuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_complete() {
            write!(f, "{} (build {})", self.version, self.build)
        } else {
            Ok(())
        }
    }
}

/// Return `value`, or `placeholder` when `value` is empty.
///
/// # Example
///
/// ```
/// use ble_upstream_gateway::utils::non_empty_or;
///
/// assert_eq!(non_empty_or("", "fallback"), "fallback");
/// assert_eq!(non_empty_or("set", "fallback"), "set");
/// ```
#[inline]
pub fn non_empty_or(value: &str, placeholder: &str) -> String {
    if value.is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    }
}

/// Clamp a BLE activity level into `0.0..=1.0`. NaN becomes `0.0`.
#[inline]
pub fn clamp_activity(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// Shorten a secret for logging: first four characters, then an ellipsis.
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}…", prefix)
    }
}
