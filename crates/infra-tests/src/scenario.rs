//! Acceptance scenarios.
//!
//! A [`Scenario`] is immutable once built: resource kind, the variables handed
//! to the engine, the resource group it deploys into and the outputs that must
//! be present after apply. The constructors for the three portal resources use
//! a fresh [`DeploymentSuffix`] so parallel runs never share a resource group.

use crate::catalog::{CatalogError, ResourceKind, RESOURCE_GROUP_OUTPUT};
use crate::naming::DeploymentSuffix;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Admin user created on test VMs.
pub const TEST_ADMIN_USERNAME: &str = "testuser";

/// Windows test VM name (15-character computer-name limit).
pub const TEST_WINDOWS_VM_NAME: &str = "test-vm";

/// Linux test VM name.
pub const TEST_LINUX_VM_NAME: &str = "test-linux-vm";

/// One acceptance scenario.
#[derive(Clone)]
pub struct Scenario {
    name: String,
    kind: ResourceKind,
    resource_group: String,
    vars: BTreeMap<String, Value>,
    expected_outputs: Vec<String>,
}

impl Scenario {
    /// Build a scenario from parts.
    ///
    /// `resource_type` and `resource_group_name` are set from `kind` and
    /// `resource_group`; the kind's primary output is always expected.
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        resource_group: impl Into<String>,
        deployment_id: impl Into<String>,
    ) -> Self {
        let resource_group = resource_group.into();
        let mut vars = BTreeMap::new();
        vars.insert("resource_type".to_string(), Value::from(kind.as_str()));
        vars.insert("deployment_id".to_string(), Value::from(deployment_id.into()));
        vars.insert(
            "resource_group_name".to_string(),
            Value::from(resource_group.clone()),
        );

        Self {
            name: name.into(),
            kind,
            resource_group,
            vars,
            expected_outputs: vec![kind.output_key().to_string()],
        }
    }

    /// Add an input variable.
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Require an additional output to be present and non-empty after apply.
    #[must_use]
    pub fn with_expected_output(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.expected_outputs.contains(&key) {
            self.expected_outputs.push(key);
        }
        self
    }

    /// Windows VM scenario.
    pub fn windows_vm(suffix: &DeploymentSuffix) -> Self {
        Self::new(
            "virtual-machine-windows",
            ResourceKind::VirtualMachineWindows,
            suffix.hyphenated("test-erdtree-rg"),
            suffix.deployment_id(),
        )
        .with_var("vm_name", TEST_WINDOWS_VM_NAME)
        .with_var("admin_username", TEST_ADMIN_USERNAME)
        .with_var("admin_password", generate_admin_password())
        .with_expected_output(RESOURCE_GROUP_OUTPUT)
    }

    /// Linux VM scenario authenticated by SSH key.
    pub fn linux_vm(suffix: &DeploymentSuffix, ssh_public_key: impl Into<String>) -> Self {
        Self::new(
            "virtual-machine-linux",
            ResourceKind::VirtualMachineLinux,
            suffix.hyphenated("test-erdtree-linux-rg"),
            suffix.deployment_id(),
        )
        .with_var("vm_name", TEST_LINUX_VM_NAME)
        .with_var("admin_username", TEST_ADMIN_USERNAME)
        .with_var("ssh_public_key", ssh_public_key.into())
    }

    /// Storage account scenario.
    pub fn storage_account(suffix: &DeploymentSuffix) -> Self {
        Self::new(
            "storage-account",
            ResourceKind::StorageAccount,
            suffix.hyphenated("test-erdtree-storage-rg"),
            suffix.deployment_id(),
        )
        .with_var("storage_account_name", suffix.compact("st"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn vars(&self) -> &BTreeMap<String, Value> {
        &self.vars
    }

    pub fn expected_outputs(&self) -> &[String] {
        &self.expected_outputs
    }

    /// Deployment identifier passed to the engine.
    pub fn deployment_id(&self) -> Option<&str> {
        self.vars.get("deployment_id").and_then(Value::as_str)
    }

    /// Values of the kind's sensitive variables, for redaction.
    pub fn secret_values(&self) -> Vec<&str> {
        self.kind
            .sensitive_variables()
            .iter()
            .filter_map(|key| self.vars.get(*key).and_then(Value::as_str))
            .collect()
    }

    /// Check inputs against the resource catalog.
    pub fn validate(&self) -> Result<(), CatalogError> {
        self.kind.validate(&self.vars)
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sensitive = self.kind.sensitive_variables();
        let vars: BTreeMap<&str, String> = self
            .vars
            .iter()
            .map(|(k, v)| {
                let shown = if sensitive.contains(&k.as_str()) {
                    "[REDACTED]".to_string()
                } else {
                    v.to_string()
                };
                (k.as_str(), shown)
            })
            .collect();

        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("resource_group", &self.resource_group)
            .field("vars", &vars)
            .field("expected_outputs", &self.expected_outputs)
            .finish()
    }
}

/// Random password meeting Azure's complexity rules (upper, lower, digit,
/// special; 24 characters).
fn generate_admin_password() -> String {
    format!("Tp1!{}", Uuid::new_v4().simple().to_string().get(..20).unwrap_or("0"))
}
