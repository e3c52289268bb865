//! Azure Resource Manager client fixture.
//!
//! Read-only GETs of the resources the scenarios deploy. Callers bound the
//! overall read with their own deadline; this client adds only connection
//! timeouts.

use crate::sanitize::sanitize_error_body;
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// API version for `Microsoft.Compute/virtualMachines`.
pub const COMPUTE_API_VERSION: &str = "2021-11-01";

/// API version for `Microsoft.Storage/storageAccounts`.
pub const STORAGE_API_VERSION: &str = "2021-09-01";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// ARM client errors.
#[derive(Debug, Error)]
pub enum ArmError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Resource not found: {url}")]
    NotFound { url: String },

    #[error("Management API rejected credentials with status {status}: {body}")]
    Unauthorized { status: u16, body: String },

    #[error("Request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// `Microsoft.Compute/virtualMachines` resource.
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub properties: VirtualMachineProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub storage_profile: Option<StorageProfile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    #[serde(default)]
    pub os_disk: Option<OsDisk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    #[serde(default)]
    pub os_type: Option<String>,
}

impl VirtualMachine {
    /// OS kind reported for the OS disk ("Windows" or "Linux").
    pub fn os_type(&self) -> Option<&str> {
        self.properties
            .storage_profile
            .as_ref()?
            .os_disk
            .as_ref()?
            .os_type
            .as_deref()
    }
}

/// `Microsoft.Storage/storageAccounts` resource.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageAccount {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub kind: Option<String>,
}

/// Client for the Azure Resource Manager API of one subscription.
pub struct ArmClient {
    base_url: String,
    subscription_id: String,
    token: SecretString,
    http_client: Client,
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("base_url", &self.base_url)
            .field("subscription_id", &self.subscription_id)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl ArmClient {
    /// Create a client authenticated with a management-plane bearer token.
    pub fn new(
        base_url: impl Into<String>,
        subscription_id: impl Into<String>,
        token: SecretString,
    ) -> Result<Self, ArmError> {
        let http_client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
            token,
            http_client,
        })
    }

    fn resource_url(&self, resource_group: &str, provider_type: &str, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
            self.base_url, self.subscription_id, resource_group, provider_type, name
        )
    }

    /// Read a virtual machine including its instance view.
    ///
    /// # Endpoint
    ///
    /// `GET /subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Compute/virtualMachines/{name}`
    pub async fn get_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualMachine, ArmError> {
        let url = self.resource_url(resource_group, "Microsoft.Compute/virtualMachines", name);

        let response = self
            .http_client
            .get(&url)
            .query(&[("api-version", COMPUTE_API_VERSION), ("$expand", "instanceView")])
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        self.handle_response(&url, response).await
    }

    /// Read a storage account.
    ///
    /// # Endpoint
    ///
    /// `GET /subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Storage/storageAccounts/{name}`
    pub async fn get_storage_account(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageAccount, ArmError> {
        let url = self.resource_url(resource_group, "Microsoft.Storage/storageAccounts", name);

        let response = self
            .http_client
            .get(&url)
            .query(&[("api-version", STORAGE_API_VERSION)])
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        self.handle_response(&url, response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        url: &str,
        response: Response,
    ) -> Result<T, ArmError> {
        let status = response.status();
        debug!(target: "infra_tests.arm", url = %url, status = %status, "ARM response");

        if status == StatusCode::NOT_FOUND {
            return Err(ArmError::NotFound {
                url: url.to_string(),
            });
        }

        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ArmError::Unauthorized {
                status: status.as_u16(),
                body: sanitize_error_body(&body),
            });
        }

        if !status.is_success() {
            return Err(ArmError::RequestFailed {
                status: status.as_u16(),
                body: sanitize_error_body(&body),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
