//! Gateway registration with the backend.
//!
//! The gateway exchanges its owner id, device id and app token for a pair of
//! short-lived tokens. A response that is successful on the wire but carries
//! no auth token is turned into [`RegistrationError::MissingAuthToken`] here,
//! so a [`GatewayTokens`] value always holds a usable auth token.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::RegistrationError;
use crate::utils::mask_token;

/// Longest response body kept in a [`RegistrationError::Rejected`].
const MAX_ERROR_BODY: usize = 512;

/// Tokens issued to a registered gateway.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayTokens {
    auth: String,
    refresh: Option<String>,
}

impl GatewayTokens {
    /// Build tokens from a response. Fails when the auth token is absent or empty.
    pub fn new(auth: Option<String>, refresh: Option<String>) -> Result<Self, RegistrationError> {
        match auth {
            Some(auth) if !auth.is_empty() => Ok(Self {
                auth,
                refresh: refresh.filter(|r| !r.is_empty()),
            }),
            _ => Err(RegistrationError::MissingAuthToken),
        }
    }

    /// Auth token for the upstream pipeline.
    pub fn auth(&self) -> &str {
        &self.auth
    }

    /// Refresh token, if the backend issued one.
    pub fn refresh(&self) -> Option<&str> {
        self.refresh.as_deref()
    }
}

impl std::fmt::Debug for GatewayTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayTokens")
            .field("auth", &mask_token(&self.auth))
            .field("refresh", &self.refresh.as_deref().map(mask_token))
            .finish()
    }
}

/// Backend that registers gateways.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    /// Register `device_id` under `owner` and return its tokens.
    async fn register_gateway(
        &self,
        owner: &str,
        device_id: &str,
        app_token: &str,
    ) -> Result<GatewayTokens, RegistrationError>;
}

/// Wire shape of the registration response.
#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    #[serde(default)]
    data: Option<TokenPayload>,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// HTTP registration client.
///
/// Sends `POST {base_url}/v1/owner/{owner}/gateway/{device_id}/mobile` with
/// the app token as bearer auth and reads
/// `{"data": {"access_token": "...", "refresh_token": "..."}}` back.
#[derive(Debug, Clone)]
pub struct HttpRegistrationClient {
    client: Client,
    base_url: Url,
}

impl HttpRegistrationClient {
    /// Client for `base_url` with the transport default timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RegistrationError> {
        Self::with_timeout(base_url, None)
    }

    /// Client for `base_url`; `timeout` overrides the transport default.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::Transport`] if `base_url` is not a valid base URL
    /// or the HTTP client cannot be built.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, RegistrationError> {
        let base_url = base_url.into();
        let base_url = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                RegistrationError::Transport(format!("invalid registration URL '{base_url}'"))
            })?;

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| RegistrationError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
        })
    }

    /// Registration URL for a gateway. Owner and device id are
    /// percent-encoded as single path segments.
    pub fn registration_url(&self, owner: &str, device_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v1", "owner", owner, "gateway", device_id, "mobile"]);
        }
        url
    }
}

#[async_trait]
impl RegistrationClient for HttpRegistrationClient {
    async fn register_gateway(
        &self,
        owner: &str,
        device_id: &str,
        app_token: &str,
    ) -> Result<GatewayTokens, RegistrationError> {
        let url = self.registration_url(owner, device_id);
        debug!(%url, "registering gateway");

        let response = self
            .client
            .post(url)
            .bearer_auth(app_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        trace!(status = status.as_u16(), body_len = body.len(), "registration response");

        if !status.is_success() {
            warn!("Gateway registration rejected with HTTP {}", status.as_u16());
            return Err(RegistrationError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        parse_registration_response(&body)
    }
}

/// Turn a successful response body into tokens.
pub fn parse_registration_response(body: &str) -> Result<GatewayTokens, RegistrationError> {
    let parsed: RegistrationResponse = serde_json::from_str(body)
        .map_err(|e| RegistrationError::Transport(format!("invalid registration response: {e}")))?;

    let (auth, refresh) = match parsed.data {
        Some(payload) => (payload.access_token, payload.refresh_token),
        None => (None, None),
    };

    let tokens = GatewayTokens::new(auth, refresh)?;
    info!("Gateway tokens received: {:?}", tokens);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_require_auth() {
        assert!(matches!(
            GatewayTokens::new(None, Some("R1".to_string())),
            Err(RegistrationError::MissingAuthToken)
        ));
        assert!(matches!(
            GatewayTokens::new(Some(String::new()), None),
            Err(RegistrationError::MissingAuthToken)
        ));

        let tokens = GatewayTokens::new(Some("A1".to_string()), Some("R1".to_string())).unwrap();
        assert_eq!(tokens.auth(), "A1");
        assert_eq!(tokens.refresh(), Some("R1"));
    }

    #[test]
    fn test_empty_refresh_is_none() {
        let tokens = GatewayTokens::new(Some("A1".to_string()), Some(String::new())).unwrap();
        assert_eq!(tokens.refresh(), None);
    }

    #[test]
    fn test_debug_masks_tokens() {
        let tokens = GatewayTokens::new(
            Some("secret-auth".to_string()),
            Some("secret-refresh".to_string()),
        )
        .unwrap();
        let printed = format!("{:?}", tokens);
        assert!(!printed.contains("secret-auth"));
        assert!(!printed.contains("secret-refresh"));
    }

    #[test]
    fn test_parse_full_response() {
        let tokens = parse_registration_response(
            r#"{"data": {"access_token": "A1", "refresh_token": "R1", "expires_in": 3600}}"#,
        )
        .unwrap();
        assert_eq!(tokens.auth(), "A1");
        assert_eq!(tokens.refresh(), Some("R1"));
    }

    #[test]
    fn test_parse_response_without_auth() {
        let err = parse_registration_response(r#"{"data": {"refresh_token": "R1"}}"#).unwrap_err();
        assert!(matches!(err, RegistrationError::MissingAuthToken));

        let err = parse_registration_response(r#"{}"#).unwrap_err();
        assert!(matches!(err, RegistrationError::MissingAuthToken));
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_registration_response("<html>").unwrap_err();
        assert!(matches!(err, RegistrationError::Transport(_)));
    }

    #[test]
    fn test_registration_url() {
        let client = HttpRegistrationClient::new("https://api.example.com/").unwrap();
        assert_eq!(
            client.registration_url("O1", "DEV-1").as_str(),
            "https://api.example.com/v1/owner/O1/gateway/DEV-1/mobile"
        );
    }

    #[test]
    fn test_registration_url_encodes_segments() {
        let client = HttpRegistrationClient::new("https://api.example.com/base").unwrap();
        assert_eq!(
            client.registration_url("acme/eu", "DEV 1?x").as_str(),
            "https://api.example.com/base/v1/owner/acme%2Feu/gateway/DEV%201%3Fx/mobile"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = HttpRegistrationClient::new("not a url").unwrap_err();
        assert!(matches!(err, RegistrationError::Transport(_)));

        let err = HttpRegistrationClient::new("mailto:ops@example.com").unwrap_err();
        assert!(matches!(err, RegistrationError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let client = HttpRegistrationClient::with_timeout(
            "http://127.0.0.1:1",
            Some(Duration::from_secs(2)),
        )
        .unwrap();
        let err = client.register_gateway("O1", "DEV-1", "T1").await.unwrap_err();
        assert!(matches!(err, RegistrationError::Transport(_)));
    }
}
