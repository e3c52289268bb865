//! Collision-free names for parallel scenarios.
//!
//! Every scenario gets a [`DeploymentSuffix`]: a UTC timestamp (second
//! resolution, `YYYYMMDDHHMMSS`) followed by six random hex characters. The
//! timestamp keeps names sortable and traceable to a run; the random part keeps
//! two scenarios started in the same second apart.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Timestamp layout used in names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Length of the random part of a suffix.
const RANDOM_LEN: usize = 6;

/// Per-scenario naming suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentSuffix {
    timestamp: String,
    random: String,
}

impl DeploymentSuffix {
    /// Suffix for the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Suffix for a given instant with a fresh random part.
    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        let random = uuid.get(..RANDOM_LEN).unwrap_or("000000").to_string();
        Self {
            timestamp: instant.format(TIMESTAMP_FORMAT).to_string(),
            random,
        }
    }

    /// `test-<timestamp>-<random>`, passed to the engine as `deployment_id`.
    #[must_use]
    pub fn deployment_id(&self) -> String {
        format!("test-{}-{}", self.timestamp, self.random)
    }

    /// `<prefix>-<timestamp>-<random>`, for resource groups and VM names.
    #[must_use]
    pub fn hyphenated(&self, prefix: &str) -> String {
        format!("{}-{}-{}", prefix, self.timestamp, self.random)
    }

    /// `<prefix><timestamp><random>`, for names that reject hyphens
    /// (storage accounts). A prefix of up to 4 characters stays within the
    /// 24-character storage account limit.
    #[must_use]
    pub fn compact(&self, prefix: &str) -> String {
        format!("{}{}{}", prefix, self.timestamp, self.random)
    }
}

impl fmt::Display for DeploymentSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp, self.random)
    }
}
