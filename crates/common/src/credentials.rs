//! Credential resolution from the process environment.
//!
//! The resolver reads a service-principal identity and the target subscription
//! from environment variables every time [`CredentialResolver::resolve`] is
//! called. Nothing is cached: the environment (or the map handed to
//! [`CredentialResolver::from_vars`]) is the only input.
//!
//! Variable names follow the Terraform `azurerm` provider (`ARM_*`) and fall
//! back to the Azure SDK names (`AZURE_*`), so the same shell that drives the
//! engine also drives verification.

use crate::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Subscription identifier variable (primary name).
pub const SUBSCRIPTION_ID_VAR: &str = "ARM_SUBSCRIPTION_ID";

/// Tenant identifier variable (primary name).
pub const TENANT_ID_VAR: &str = "ARM_TENANT_ID";

/// Service-principal client identifier variable (primary name).
pub const CLIENT_ID_VAR: &str = "ARM_CLIENT_ID";

/// Service-principal client secret variable (primary name).
pub const CLIENT_SECRET_VAR: &str = "ARM_CLIENT_SECRET";

/// Errors raised while resolving credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing required environment variable: {primary} (or {fallback})")]
    MissingVar {
        primary: &'static str,
        fallback: &'static str,
    },

    #[error("Malformed environment variable {name}: {reason}")]
    Malformed { name: &'static str, reason: String },
}

/// Authenticated client context.
///
/// Holds everything needed to request a management-plane token and address a
/// subscription. The client secret is redacted in Debug output.
#[derive(Clone)]
pub struct AuthContext {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Source {
    Process,
    Vars(HashMap<String, String>),
}

/// Resolves an [`AuthContext`] on demand.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    source: Source,
}

impl CredentialResolver {
    /// Resolver that reads the live process environment on every call.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            source: Source::Process,
        }
    }

    /// Resolver over a fixed map (for testing).
    #[must_use]
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self {
            source: Source::Vars(vars),
        }
    }

    /// Resolve credentials.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingVar` when a required variable is absent or
    /// blank, and `AuthError::Malformed` when the subscription or tenant is not
    /// a GUID.
    pub fn resolve(&self) -> Result<AuthContext, AuthError> {
        let ctx = match &self.source {
            Source::Process => resolve_from_vars(&env::vars().collect()),
            Source::Vars(vars) => resolve_from_vars(vars),
        }?;

        debug!(
            target: "common.credentials",
            subscription_id = %ctx.subscription_id,
            client_id = %ctx.client_id,
            "Credentials resolved"
        );

        Ok(ctx)
    }
}

fn resolve_from_vars(vars: &HashMap<String, String>) -> Result<AuthContext, AuthError> {
    let subscription_id = required(vars, SUBSCRIPTION_ID_VAR, "AZURE_SUBSCRIPTION_ID")?;
    let tenant_id = required(vars, TENANT_ID_VAR, "AZURE_TENANT_ID")?;
    let client_id = required(vars, CLIENT_ID_VAR, "AZURE_CLIENT_ID")?;
    let client_secret = required(vars, CLIENT_SECRET_VAR, "AZURE_CLIENT_SECRET")?;

    let subscription_id = guid(SUBSCRIPTION_ID_VAR, &subscription_id)?;
    let tenant_id = guid(TENANT_ID_VAR, &tenant_id)?;

    Ok(AuthContext {
        subscription_id,
        tenant_id,
        client_id,
        client_secret: SecretString::from(client_secret),
    })
}

fn required(
    vars: &HashMap<String, String>,
    primary: &'static str,
    fallback: &'static str,
) -> Result<String, AuthError> {
    vars.get(primary)
        .filter(|v| !v.trim().is_empty())
        .or_else(|| vars.get(fallback).filter(|v| !v.trim().is_empty()))
        .map(|v| v.trim().to_string())
        .ok_or(AuthError::MissingVar { primary, fallback })
}

fn guid(name: &'static str, value: &str) -> Result<String, AuthError> {
    Uuid::parse_str(value)
        .map(|id| id.hyphenated().to_string())
        .map_err(|e| AuthError::Malformed {
            name,
            reason: format!("expected a GUID, got '{value}': {e}"),
        })
}
