//! Resource verification against the management plane.
//!
//! A verifier reads one deployed resource back and compares its name, ARM
//! type and (for virtual machines) OS kind against what the scenario
//! deployed. Reads are never retried: a missing resource is a failure, and
//! [`verify_within`] turns a slow read into [`VerifyError::Timeout`].

use crate::catalog::ResourceKind;
use crate::config::HarnessConfig;
use crate::fixtures::arm_client::{ArmClient, ArmError, StorageAccount, VirtualMachine};
use async_trait::async_trait;
use common::credentials::{AuthError, CredentialResolver};
use common::token::{acquire_management_token, TokenConfig, TokenError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Credential resolution failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Failed to acquire management token: {0}")]
    Token(#[from] TokenError),

    #[error("{kind} '{name}' not found in resource group '{resource_group}'")]
    NotFound {
        kind: ResourceKind,
        name: String,
        resource_group: String,
    },

    #[error("Verification did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Management API error: {0}")]
    Arm(ArmError),
}

/// Result of one asserted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCheck {
    pub field: &'static str,
    pub expected: String,
    pub actual: Option<String>,
    pub passed: bool,
}

impl fmt::Display for FieldCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected '{}', got '{}'",
            self.field,
            self.expected,
            self.actual.as_deref().unwrap_or("<absent>")
        )
    }
}

/// Pass/fail per asserted field of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub kind: ResourceKind,
    pub name: String,
    pub checks: Vec<FieldCheck>,
}

impl VerificationResult {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Checks that did not pass.
    pub fn failures(&self) -> impl Iterator<Item = &FieldCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failures: Vec<String> = self.failures().map(ToString::to_string).collect();
        if failures.is_empty() {
            write!(f, "{} '{}': all {} checks passed", self.kind, self.name, self.checks.len())
        } else {
            write!(f, "{} '{}': {}", self.kind, self.name, failures.join("; "))
        }
    }
}

/// The fields of a resource that verification looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedResource {
    pub name: String,
    pub resource_type: String,
    pub os_type: Option<String>,
}

impl From<&VirtualMachine> for ObservedResource {
    fn from(vm: &VirtualMachine) -> Self {
        Self {
            name: vm.name.clone(),
            resource_type: vm.resource_type.clone(),
            os_type: vm.os_type().map(str::to_string),
        }
    }
}

impl From<&StorageAccount> for ObservedResource {
    fn from(account: &StorageAccount) -> Self {
        Self {
            name: account.name.clone(),
            resource_type: account.resource_type.clone(),
            os_type: None,
        }
    }
}

/// Compare an observed resource with what a `kind` named `expected_name`
/// must look like.
///
/// ARM types and OS kinds compare case-insensitively; names exactly.
pub fn compare(kind: ResourceKind, expected_name: &str, observed: &ObservedResource) -> VerificationResult {
    let mut checks = vec![
        FieldCheck {
            field: "name",
            expected: expected_name.to_string(),
            actual: Some(observed.name.clone()),
            passed: observed.name == expected_name,
        },
        FieldCheck {
            field: "type",
            expected: kind.arm_type().to_string(),
            actual: Some(observed.resource_type.clone()),
            passed: observed.resource_type.eq_ignore_ascii_case(kind.arm_type()),
        },
    ];

    if let Some(os_kind) = kind.os_kind() {
        checks.push(FieldCheck {
            field: "os_type",
            expected: os_kind.to_string(),
            actual: observed.os_type.clone(),
            passed: observed
                .os_type
                .as_deref()
                .is_some_and(|os| os.eq_ignore_ascii_case(os_kind.as_str())),
        });
    }

    VerificationResult {
        kind,
        name: expected_name.to_string(),
        checks,
    }
}

/// Reads a deployed resource and checks it.
#[async_trait]
pub trait ResourceVerifier: Send + Sync {
    async fn verify(
        &self,
        kind: ResourceKind,
        name: &str,
        resource_group: &str,
    ) -> Result<VerificationResult, VerifyError>;
}

/// Run `verifier` with a deadline.
pub async fn verify_within(
    verifier: &dyn ResourceVerifier,
    deadline: Duration,
    kind: ResourceKind,
    name: &str,
    resource_group: &str,
) -> Result<VerificationResult, VerifyError> {
    tokio::time::timeout(deadline, verifier.verify(kind, name, resource_group))
        .await
        .map_err(|_| VerifyError::Timeout(deadline))?
}

/// Verifier backed by Azure Resource Manager.
///
/// Credentials are resolved and a token acquired on every call.
#[derive(Debug, Clone)]
pub struct AzureVerifier {
    arm_endpoint: String,
    token_config: TokenConfig,
    credentials: CredentialResolver,
}

impl AzureVerifier {
    pub fn new(config: &HarnessConfig, credentials: CredentialResolver) -> Self {
        Self {
            arm_endpoint: config.arm_endpoint.clone(),
            token_config: TokenConfig::new(config.authority_host.clone(), config.arm_endpoint.clone()),
            credentials,
        }
    }
}

#[async_trait]
impl ResourceVerifier for AzureVerifier {
    #[instrument(skip_all, name = "infra_tests.verifier.verify", fields(kind = %kind, name = %name, resource_group = %resource_group))]
    async fn verify(
        &self,
        kind: ResourceKind,
        name: &str,
        resource_group: &str,
    ) -> Result<VerificationResult, VerifyError> {
        let ctx = self.credentials.resolve()?;
        let token = acquire_management_token(&self.token_config, &ctx).await?;
        let client = ArmClient::new(&self.arm_endpoint, &ctx.subscription_id, token)
            .map_err(VerifyError::Arm)?;

        let not_found = |e: ArmError| match e {
            ArmError::NotFound { .. } => VerifyError::NotFound {
                kind,
                name: name.to_string(),
                resource_group: resource_group.to_string(),
            },
            other => VerifyError::Arm(other),
        };

        let observed = match kind {
            ResourceKind::VirtualMachineWindows | ResourceKind::VirtualMachineLinux => {
                let vm = client
                    .get_virtual_machine(resource_group, name)
                    .await
                    .map_err(not_found)?;
                ObservedResource::from(&vm)
            }
            ResourceKind::StorageAccount => {
                let account = client
                    .get_storage_account(resource_group, name)
                    .await
                    .map_err(not_found)?;
                ObservedResource::from(&account)
            }
        };

        let result = compare(kind, name, &observed);
        debug!(
            target: "infra_tests.verifier",
            passed = result.passed(),
            "Resource read back"
        );
        Ok(result)
    }
}

/// Scripted verifier for orchestrator tests.
pub mod mock {

    use super::*;
    use std::sync::{Mutex, PoisonError};

    /// One recorded verification request.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct VerifyCall {
        pub kind: ResourceKind,
        pub name: String,
        pub resource_group: String,
    }

    #[derive(Debug, Clone)]
    enum Behavior {
        Matching,
        OsType(String),
        NotFound,
    }

    /// Mock verifier that answers from a fixed behavior.
    pub struct MockVerifier {
        behavior: Behavior,
        delay: Option<Duration>,
        calls: Mutex<Vec<VerifyCall>>,
    }

    impl MockVerifier {
        fn with_behavior(behavior: Behavior) -> Self {
            Self {
                behavior,
                delay: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Every resource exists and matches what was requested.
        pub fn matching() -> Self {
            Self::with_behavior(Behavior::Matching)
        }

        /// VMs report `os_type`; everything else matches.
        pub fn reporting_os_type(os_type: impl Into<String>) -> Self {
            Self::with_behavior(Behavior::OsType(os_type.into()))
        }

        /// Every resource is missing.
        pub fn not_found() -> Self {
            Self::with_behavior(Behavior::NotFound)
        }

        /// Sleep before answering.
        #[must_use]
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> Vec<VerifyCall> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls().len()
        }
    }

    #[async_trait]
    impl ResourceVerifier for MockVerifier {
        async fn verify(
            &self,
            kind: ResourceKind,
            name: &str,
            resource_group: &str,
        ) -> Result<VerificationResult, VerifyError> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(VerifyCall {
                    kind,
                    name: name.to_string(),
                    resource_group: resource_group.to_string(),
                });

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let os_type = match &self.behavior {
                Behavior::NotFound => {
                    return Err(VerifyError::NotFound {
                        kind,
                        name: name.to_string(),
                        resource_group: resource_group.to_string(),
                    })
                }
                Behavior::Matching => kind.os_kind().map(|os| os.as_str().to_string()),
                Behavior::OsType(os) => kind.os_kind().map(|_| os.clone()),
            };

            let observed = ObservedResource {
                name: name.to_string(),
                resource_type: kind.arm_type().to_string(),
                os_type,
            };
            Ok(compare(kind, name, &observed))
        }
    }
}
