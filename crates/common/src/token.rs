//! OAuth 2.0 client-credentials token acquisition for the management plane.
//!
//! Exchanges a service-principal identity for a bearer token scoped to the
//! Azure Resource Manager endpoint. One request per call: the harness verifies
//! a handful of resources per run, so tokens are neither cached nor refreshed.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::credentials::CredentialResolver;
//! use common::token::{acquire_management_token, TokenConfig};
//!
//! let ctx = CredentialResolver::from_env().resolve()?;
//! let config = TokenConfig::new(
//!     "https://login.microsoftonline.com".to_string(),
//!     "https://management.azure.com".to_string(),
//! );
//! let token = acquire_management_token(&config, &ctx).await?;
//! let header = format!("Bearer {}", token.expose_secret());
//! ```
//!
//! # Security
//!
//! - Client secret and token are held as `SecretString` (never logged)
//! - Rejection bodies are logged at trace level only
//! - HTTP timeouts prevent hanging connections

use crate::credentials::AuthContext;
use crate::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout for HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during token acquisition.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// HTTP client error.
    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// Authentication rejected by the authority (401, 400).
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Token response parsing failed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Where to request tokens and which resource they are for.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Authority host (e.g., `https://login.microsoftonline.com`).
    pub authority_host: String,

    /// Resource the token is scoped to (e.g., `https://management.azure.com`).
    pub resource: String,

    /// HTTP request timeout.
    pub http_timeout: Duration,
}

impl TokenConfig {
    /// Create a new configuration with the default timeout.
    #[must_use]
    pub fn new(authority_host: String, resource: String) -> Self {
        Self {
            authority_host,
            resource,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// OAuth scope for the configured resource.
    #[must_use]
    pub fn scope(&self) -> String {
        format!("{}/.default", self.resource.trim_end_matches('/'))
    }

    fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            tenant_id
        )
    }
}

/// OAuth 2.0 token response from the authority.
#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: String,
    expires_in: u64,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Acquire a management-plane bearer token.
///
/// # Errors
///
/// - `TokenError::Configuration` - If the HTTP client cannot be built
/// - `TokenError::AuthenticationRejected` - On 400/401 from the authority
/// - `TokenError::HttpError` - On transport failures or other statuses
/// - `TokenError::InvalidResponse` - If the body is not a token response
#[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, client_id = %ctx.client_id))]
pub async fn acquire_management_token(
    config: &TokenConfig,
    ctx: &AuthContext,
) -> Result<SecretString, TokenError> {
    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

    let url = config.token_url(&ctx.tenant_id);
    let scope = config.scope();

    debug!(
        target: "common.token",
        url = %url,
        scope = %scope,
        "Requesting management token"
    );

    let form_body = [
        ("grant_type", "client_credentials"),
        ("client_id", ctx.client_id.as_str()),
        ("client_secret", ctx.client_secret.expose_secret()),
        ("scope", scope.as_str()),
    ];

    let response = http_client
        .post(&url)
        .form(&form_body)
        .send()
        .await
        .map_err(|e| {
            debug!(target: "common.token", error = %e, "HTTP request failed");
            TokenError::HttpError(e.to_string())
        })?;

    let status = response.status();

    if status.is_success() {
        let token_response: OAuthTokenResponse = response.json().await.map_err(|e| {
            warn!(target: "common.token", error = %e, "Failed to parse token response");
            TokenError::InvalidResponse(e.to_string())
        })?;

        if token_response.access_token.is_empty() {
            return Err(TokenError::InvalidResponse(
                "access_token is empty".to_string(),
            ));
        }

        debug!(
            target: "common.token",
            expires_in_secs = token_response.expires_in,
            "Management token acquired"
        );

        Ok(SecretString::from(token_response.access_token))
    } else if status.as_u16() == 401 || status.as_u16() == 400 {
        let body = response.text().await.unwrap_or_else(|e| {
            trace!(target: "common.token", error = %e, "Failed to read error response body");
            "<failed to read body>".to_string()
        });
        warn!(
            target: "common.token",
            status = %status,
            "Authentication rejected by authority"
        );
        trace!(
            target: "common.token",
            body = %body,
            "Authentication rejection response body"
        );
        Err(TokenError::AuthenticationRejected(format!("Status {status}")))
    } else {
        warn!(
            target: "common.token",
            status = %status,
            "Unexpected response from authority"
        );
        Err(TokenError::HttpError(format!("Unexpected status: {status}")))
    }
}
