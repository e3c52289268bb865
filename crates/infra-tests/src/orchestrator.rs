//! Scenario orchestration.
//!
//! One scenario runs: resolve credentials, validate, prepare a working
//! directory, apply, check outputs, verify, tear down. Credentials and
//! validation failures end the scenario before the engine is touched. Once
//! apply has been attempted, teardown runs exactly once, whatever happened in
//! between (including a panic). A teardown failure is reported alongside the
//! outcome and never replaces it.
//!
//! [`ScenarioRunner::run_scenarios`] runs each scenario as its own Tokio task;
//! runners share nothing mutable, so one scenario's failure cannot affect
//! another.

use crate::catalog::{CatalogError, ResourceKind};
use crate::config::HarnessConfig;
use crate::driver::{ApplyError, Deployment, DeploymentDriver, TeardownStatus};
use crate::engine::{InfraEngine, TerraformCli};
use crate::outputs::OutputError;
use crate::retry::RetryPolicy;
use crate::scenario::Scenario;
use crate::verifier::{verify_within, AzureVerifier, ResourceVerifier, VerificationResult, VerifyError};
use crate::workdir::{WorkDir, WorkDirError};
use common::credentials::{AuthError, CredentialResolver};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Credential resolution failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid scenario: {0}")]
    InvalidScenario(#[from] CatalogError),

    #[error("Failed to prepare working directory: {0}")]
    WorkDir(#[from] WorkDirError),

    #[error("Apply failed: {0}")]
    Apply(#[from] ApplyError),

    #[error("Unexpected deployment outputs: {0}")]
    Output(#[from] OutputError),

    #[error("{kind} '{name}' not found in resource group '{resource_group}'")]
    NotFound {
        kind: ResourceKind,
        name: String,
        resource_group: String,
    },

    #[error("Verification timed out after {0:?}")]
    Timeout(Duration),

    #[error("Verification failed: {0}")]
    Verify(VerifyError),

    #[error("Assertion mismatch: {0}")]
    AssertionMismatch(VerificationResult),

    #[error("Scenario panicked: {0}")]
    Panicked(String),
}

impl From<VerifyError> for ScenarioError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::NotFound {
                kind,
                name,
                resource_group,
            } => ScenarioError::NotFound {
                kind,
                name,
                resource_group,
            },
            VerifyError::Timeout(after) => ScenarioError::Timeout(after),
            other => ScenarioError::Verify(other),
        }
    }
}

/// Final outcome of one scenario.
#[derive(Debug)]
pub enum ScenarioOutcome {
    Pass(VerificationResult),
    Fail(ScenarioError),
}

/// What happened to one scenario.
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub resource_group: String,
    pub outcome: ScenarioOutcome,
    pub teardown: TeardownStatus,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Pass(_))
    }

    pub fn error(&self) -> Option<&ScenarioError> {
        match &self.outcome {
            ScenarioOutcome::Pass(_) => None,
            ScenarioOutcome::Fail(e) => Some(e),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Runs scenarios against one engine and one verifier.
#[derive(Clone)]
pub struct ScenarioRunner {
    config: Arc<HarnessConfig>,
    credentials: CredentialResolver,
    driver: DeploymentDriver,
    verifier: Arc<dyn ResourceVerifier>,
}

impl ScenarioRunner {
    pub fn new(
        config: HarnessConfig,
        credentials: CredentialResolver,
        engine: Arc<dyn InfraEngine>,
        verifier: Arc<dyn ResourceVerifier>,
    ) -> Self {
        let policy = RetryPolicy::new(config.max_retries, config.time_between_retries);
        Self {
            config: Arc::new(config),
            credentials,
            driver: DeploymentDriver::new(engine, policy),
            verifier,
        }
    }

    /// Runner using the Terraform CLI and Azure Resource Manager, with
    /// credentials from the process environment.
    pub fn azure(config: HarnessConfig) -> Self {
        let credentials = CredentialResolver::from_env();
        let engine = Arc::new(TerraformCli::new(config.terraform_binary.clone()));
        let verifier = Arc::new(AzureVerifier::new(&config, credentials.clone()));
        Self::new(config, credentials, engine, verifier)
    }

    /// Run one scenario to completion, teardown included.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        let started = Instant::now();
        info!(
            target: "infra_tests.orchestrator",
            scenario = %scenario.name(),
            kind = %scenario.kind(),
            resource_group = %scenario.resource_group(),
            "Starting scenario"
        );

        let (outcome, teardown) = match self.prepare(scenario) {
            Err(e) => (Err(e), TeardownStatus::NotRequired),
            Ok(mut deployment) => {
                let outcome = AssertUnwindSafe(self.deploy_and_verify(&mut deployment, scenario))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(ScenarioError::Panicked(panic_message(&*payload))));
                (outcome, deployment.teardown().await)
            }
        };

        let elapsed = started.elapsed();
        let outcome = match outcome {
            Ok(result) => {
                info!(
                    target: "infra_tests.orchestrator",
                    scenario = %scenario.name(),
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Scenario passed"
                );
                ScenarioOutcome::Pass(result)
            }
            Err(e) => {
                error!(
                    target: "infra_tests.orchestrator",
                    scenario = %scenario.name(),
                    error = %e,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Scenario failed"
                );
                ScenarioOutcome::Fail(e)
            }
        };

        ScenarioReport {
            name: scenario.name().to_string(),
            resource_group: scenario.resource_group().to_string(),
            outcome,
            teardown,
            elapsed,
        }
    }

    /// Everything that can fail before the engine is invoked.
    fn prepare(&self, scenario: &Scenario) -> Result<Deployment, ScenarioError> {
        let ctx = self.credentials.resolve()?;
        scenario.validate()?;

        let workdir = WorkDir::prepare(
            &self.config.terraform_root,
            &self.config.terraform_dir,
            self.config.copy_to_temp,
        )?;

        let mut vars = scenario.vars().clone();
        vars.insert(
            "subscription_id".to_string(),
            Value::from(ctx.subscription_id),
        );
        let secrets = scenario
            .secret_values()
            .into_iter()
            .map(str::to_string)
            .collect();

        Ok(self.driver.deployment(workdir, vars, secrets))
    }

    async fn deploy_and_verify(
        &self,
        deployment: &mut Deployment,
        scenario: &Scenario,
    ) -> Result<VerificationResult, ScenarioError> {
        debug!(
            target: "infra_tests.orchestrator",
            scenario = %scenario.name(),
            working_dir = %deployment.working_dir().display(),
            "Applying"
        );
        let outputs = deployment.apply().await?;

        for key in scenario.expected_outputs() {
            outputs.require_non_empty(key)?;
        }

        let primary = scenario.kind().output_key();
        let name = outputs.attribute(primary, "name")?;
        outputs.attribute(primary, "resource_id")?;

        let result = verify_within(
            self.verifier.as_ref(),
            self.config.verify_timeout,
            scenario.kind(),
            name,
            scenario.resource_group(),
        )
        .await?;

        if !result.passed() {
            return Err(ScenarioError::AssertionMismatch(result));
        }

        Ok(result)
    }

    /// Run scenarios concurrently, one task each.
    ///
    /// Reports come back in input order.
    pub async fn run_scenarios(&self, scenarios: Vec<Scenario>) -> Vec<ScenarioReport> {
        let started = Instant::now();

        let tasks: Vec<_> = scenarios
            .into_iter()
            .map(|scenario| {
                let runner = self.clone();
                let name = scenario.name().to_string();
                let resource_group = scenario.resource_group().to_string();
                let handle = tokio::spawn(async move { runner.run_scenario(&scenario).await });
                (name, resource_group, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(tasks.len());
        for (name, resource_group, handle) in tasks {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!(
                        target: "infra_tests.orchestrator",
                        scenario = %name,
                        error = %e,
                        "Scenario task ended abnormally"
                    );
                    ScenarioReport {
                        name,
                        resource_group,
                        outcome: ScenarioOutcome::Fail(ScenarioError::Panicked(e.to_string())),
                        teardown: TeardownStatus::Deferred,
                        elapsed: started.elapsed(),
                    }
                }
            };
            reports.push(report);
        }

        let passed = reports.iter().filter(|r| r.passed()).count();
        let teardown_failures = reports.iter().filter(|r| r.teardown.is_failed()).count();
        if passed == reports.len() && teardown_failures == 0 {
            info!(
                target: "infra_tests.orchestrator",
                total = reports.len(),
                passed,
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "All scenarios passed"
            );
        } else {
            warn!(
                target: "infra_tests.orchestrator",
                total = reports.len(),
                passed,
                failed = reports.len() - passed,
                teardown_failures,
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Scenario run finished with failures"
            );
        }

        reports
    }
}
