//! Resource catalog.
//!
//! Each resource kind the portal can deploy maps to one `resource_type` value
//! understood by the Terraform environment, one output the environment exposes
//! after apply, and the attributes the management API must report back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// ARM resource type of virtual machines.
pub const VIRTUAL_MACHINE_TYPE: &str = "Microsoft.Compute/virtualMachines";

/// ARM resource type of storage accounts.
pub const STORAGE_ACCOUNT_TYPE: &str = "Microsoft.Storage/storageAccounts";

/// Output exposing the resource group name.
pub const RESOURCE_GROUP_OUTPUT: &str = "resource_group";

/// Windows computer names are limited to 15 characters.
pub const MAX_WINDOWS_VM_NAME_LEN: usize = 15;

/// Linux VM names are limited to 64 characters.
pub const MAX_LINUX_VM_NAME_LEN: usize = 64;

/// Storage account names are 3-24 characters.
pub const STORAGE_ACCOUNT_NAME_LEN: std::ops::RangeInclusive<usize> = 3..=24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Missing required variable '{name}' for {kind}")]
    MissingVariable { kind: ResourceKind, name: String },

    #[error("Variable '{name}' for {kind} must be a non-empty string")]
    NotAString { kind: ResourceKind, name: String },

    #[error("Invalid {name} '{value}': {reason}")]
    InvalidName {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Operating system reported by a virtual machine's OS disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsKind {
    Windows,
    Linux,
}

impl OsKind {
    /// Value as reported by the management API.
    pub fn as_str(&self) -> &'static str {
        match self {
            OsKind::Windows => "Windows",
            OsKind::Linux => "Linux",
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource kinds with an acceptance scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    VirtualMachineWindows,
    VirtualMachineLinux,
    StorageAccount,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::VirtualMachineWindows,
        ResourceKind::VirtualMachineLinux,
        ResourceKind::StorageAccount,
    ];

    /// `resource_type` variable value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachineWindows => "virtual-machine-windows",
            ResourceKind::VirtualMachineLinux => "virtual-machine-linux",
            ResourceKind::StorageAccount => "storage-account",
        }
    }

    /// Output object holding `name` and `resource_id` after apply.
    pub fn output_key(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachineWindows => "virtual_machine_windows",
            ResourceKind::VirtualMachineLinux => "virtual_machine_linux",
            ResourceKind::StorageAccount => "storage_account",
        }
    }

    /// ARM `type` the management API reports.
    pub fn arm_type(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachineWindows | ResourceKind::VirtualMachineLinux => {
                VIRTUAL_MACHINE_TYPE
            }
            ResourceKind::StorageAccount => STORAGE_ACCOUNT_TYPE,
        }
    }

    /// OS disk type a VM of this kind must report.
    pub fn os_kind(&self) -> Option<OsKind> {
        match self {
            ResourceKind::VirtualMachineWindows => Some(OsKind::Windows),
            ResourceKind::VirtualMachineLinux => Some(OsKind::Linux),
            ResourceKind::StorageAccount => None,
        }
    }

    /// Variables the environment requires for this kind, besides the
    /// common `resource_type`, `deployment_id`, `resource_group_name` and
    /// `subscription_id`.
    pub fn required_variables(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::VirtualMachineWindows => &["vm_name", "admin_username", "admin_password"],
            ResourceKind::VirtualMachineLinux => &["vm_name", "admin_username", "ssh_public_key"],
            ResourceKind::StorageAccount => &["storage_account_name"],
        }
    }

    /// Variables whose values must never be logged.
    pub fn sensitive_variables(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::VirtualMachineWindows => &["admin_password"],
            ResourceKind::VirtualMachineLinux | ResourceKind::StorageAccount => &[],
        }
    }

    /// Check scenario inputs against the catalog entry.
    ///
    /// `subscription_id` is injected by the orchestrator and is not checked.
    pub fn validate(&self, vars: &BTreeMap<String, Value>) -> Result<(), CatalogError> {
        for name in ["resource_group_name", "deployment_id"]
            .iter()
            .chain(self.required_variables())
        {
            match vars.get(*name) {
                None => {
                    return Err(CatalogError::MissingVariable {
                        kind: *self,
                        name: (*name).to_string(),
                    })
                }
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                Some(_) => {
                    return Err(CatalogError::NotAString {
                        kind: *self,
                        name: (*name).to_string(),
                    })
                }
            }
        }

        match self {
            ResourceKind::VirtualMachineWindows => {
                validate_vm_name(string_var(vars, "vm_name"), MAX_WINDOWS_VM_NAME_LEN)
            }
            ResourceKind::VirtualMachineLinux => {
                validate_vm_name(string_var(vars, "vm_name"), MAX_LINUX_VM_NAME_LEN)
            }
            ResourceKind::StorageAccount => {
                validate_storage_account_name(string_var(vars, "storage_account_name"))
            }
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownResourceType(s.to_string()))
    }
}

fn string_var<'a>(vars: &'a BTreeMap<String, Value>, name: &str) -> &'a str {
    vars.get(name).and_then(Value::as_str).unwrap_or_default()
}

/// VM names: 1..=max characters, alphanumerics and hyphens, no leading or
/// trailing hyphen.
pub fn validate_vm_name(name: &str, max_len: usize) -> Result<(), CatalogError> {
    let invalid = |reason: String| CatalogError::InvalidName {
        name: "vm_name",
        value: name.to_string(),
        reason,
    };

    if name.is_empty() || name.chars().count() > max_len {
        return Err(invalid(format!("must be 1-{max_len} characters")));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(invalid(
            "may only contain letters, digits and hyphens".to_string(),
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must not start or end with a hyphen".to_string()));
    }
    Ok(())
}

/// Storage account names: 3-24 lowercase letters and digits.
pub fn validate_storage_account_name(name: &str) -> Result<(), CatalogError> {
    if !STORAGE_ACCOUNT_NAME_LEN.contains(&name.len()) {
        return Err(CatalogError::InvalidName {
            name: "storage_account_name",
            value: name.to_string(),
            reason: "must be between 3 and 24 characters".to_string(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(CatalogError::InvalidName {
            name: "storage_account_name",
            value: name.to_string(),
            reason: "may only contain lowercase letters and digits".to_string(),
        });
    }
    Ok(())
}
