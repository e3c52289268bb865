//! Deployment driver.
//!
//! Wraps the engine with transient-error retries, output parsing and a
//! teardown guard. Every deployment that reached apply is destroyed exactly
//! once: explicitly through [`Deployment::teardown`] on the normal path, or by
//! the guard's `Drop` if the scenario future is dropped before that.

use crate::engine::{EngineError, EngineOptions, InfraEngine};
use crate::outputs::{DeploymentOutputs, OutputError};
use crate::retry::{with_retries, RetryFailure, RetryPolicy};
use crate::sanitize::sanitize_diagnostics;
use crate::workdir::{KeptDir, WorkDir};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Engine stage that failed during apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    Init,
    Apply,
    Output,
}

impl std::fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ApplyStage::Init => "init",
            ApplyStage::Apply => "apply",
            ApplyStage::Output => "output",
        })
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Engine {stage} failed after {attempts} attempt(s): {message}\n{diagnostics}")]
    Engine {
        stage: ApplyStage,
        attempts: u32,
        exhausted: bool,
        message: String,
        diagnostics: String,
    },

    #[error("Failed to read deployment outputs: {0}")]
    Outputs(#[from] OutputError),
}

#[derive(Debug, Error)]
#[error("Engine destroy failed after {attempts} attempt(s): {message}\n{diagnostics}")]
pub struct DestroyError {
    pub attempts: u32,
    pub message: String,
    pub diagnostics: String,
}

/// Outcome of a teardown. Failures are reported, never raised.
#[derive(Debug)]
pub enum TeardownStatus {
    /// Apply was never attempted, so there was nothing to destroy.
    NotRequired,

    /// Destroy succeeded.
    Destroyed,

    /// The scenario task ended abnormally; destroy was left to the guard's
    /// background fallback.
    Deferred,

    /// Destroy failed. The working directory (and its state) was kept at
    /// `kept_dir` for manual cleanup.
    Failed {
        error: DestroyError,
        kept_dir: PathBuf,
    },
}

impl TeardownStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, TeardownStatus::Failed { .. })
    }
}

/// Split an engine failure into its headline and sanitized diagnostics.
fn describe(failure: &RetryFailure, secrets: &[&str]) -> (String, String) {
    let message = failure.error.to_string();
    let diagnostics = match &failure.error {
        EngineError::Launch { .. } => String::new(),
        EngineError::CommandFailed { output, .. } => sanitize_diagnostics(output, secrets),
    };
    (message, diagnostics)
}

/// Drives apply, output capture and destroy through an [`InfraEngine`].
#[derive(Clone)]
pub struct DeploymentDriver {
    engine: Arc<dyn InfraEngine>,
    policy: RetryPolicy,
}

impl DeploymentDriver {
    pub fn new(engine: Arc<dyn InfraEngine>, policy: RetryPolicy) -> Self {
        Self { engine, policy }
    }

    /// Init and apply the configuration, then read its outputs.
    ///
    /// `secrets` are redacted from any diagnostics attached to the error.
    #[instrument(skip_all, name = "infra_tests.driver.apply", fields(working_dir = %options.working_dir.display()))]
    pub async fn apply(
        &self,
        options: &EngineOptions,
        secrets: &[&str],
    ) -> Result<DeploymentOutputs, ApplyError> {
        let stage_error = |stage: ApplyStage, failure: RetryFailure| {
            let (message, diagnostics) = describe(&failure, secrets);
            ApplyError::Engine {
                stage,
                attempts: failure.attempts,
                exhausted: failure.exhausted,
                message,
                diagnostics,
            }
        };

        with_retries("init", &self.policy, || self.engine.init(options))
            .await
            .map_err(|f| stage_error(ApplyStage::Init, f))?;

        with_retries("apply", &self.policy, || self.engine.apply(options))
            .await
            .map_err(|f| stage_error(ApplyStage::Apply, f))?;

        let json = with_retries("output", &self.policy, || self.engine.output_json(options))
            .await
            .map_err(|f| stage_error(ApplyStage::Output, f))?;

        let outputs = DeploymentOutputs::from_engine_json(&json)?;

        info!(
            target: "infra_tests.driver",
            outputs = ?outputs.keys().collect::<Vec<_>>(),
            "Deployment applied"
        );
        for (key, value) in outputs.non_sensitive() {
            debug!(target: "infra_tests.driver", output = %key, value = %value, "Deployment output");
        }

        Ok(outputs)
    }

    /// Destroy everything the configuration manages.
    #[instrument(skip_all, name = "infra_tests.driver.destroy", fields(working_dir = %options.working_dir.display()))]
    pub async fn destroy(&self, options: &EngineOptions, secrets: &[&str]) -> Result<(), DestroyError> {
        with_retries("destroy", &self.policy, || self.engine.destroy(options))
            .await
            .map(|_| ())
            .map_err(|failure| {
                let (message, diagnostics) = describe(&failure, secrets);
                DestroyError {
                    attempts: failure.attempts,
                    message,
                    diagnostics,
                }
            })
    }

    /// Start a guarded deployment in `workdir`.
    ///
    /// The guard owns the working directory so the engine state outlives any
    /// early exit until destroy has run.
    pub fn deployment(
        &self,
        workdir: WorkDir,
        vars: BTreeMap<String, Value>,
        secrets: Vec<String>,
    ) -> Deployment {
        let options = EngineOptions {
            working_dir: workdir.path().to_path_buf(),
            vars,
        };
        Deployment {
            driver: self.clone(),
            workdir: Some(workdir),
            options,
            secrets,
            armed: false,
        }
    }
}

/// One deployment with guaranteed teardown.
///
/// The guard is armed as soon as apply is attempted: a failed apply may leave
/// partial resources behind, so destroy runs for it too.
pub struct Deployment {
    driver: DeploymentDriver,
    workdir: Option<WorkDir>,
    options: EngineOptions,
    secrets: Vec<String>,
    armed: bool,
}

impl Deployment {
    pub fn working_dir(&self) -> &Path {
        &self.options.working_dir
    }

    /// Whether a teardown is still owed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Apply the deployment. Arms the guard before the engine is invoked.
    pub async fn apply(&mut self) -> Result<DeploymentOutputs, ApplyError> {
        self.armed = true;
        let secrets: Vec<&str> = self.secrets.iter().map(String::as_str).collect();
        self.driver.apply(&self.options, &secrets).await
    }

    /// Destroy the deployment if apply was attempted.
    ///
    /// A failed destroy is logged and returned as a status; the working
    /// directory is then kept so the state file is not lost.
    pub async fn teardown(mut self) -> TeardownStatus {
        if !self.armed {
            return TeardownStatus::NotRequired;
        }

        // Stays armed until destroy returns, so cancelling teardown still
        // leaves the Drop fallback in place.
        let secrets: Vec<&str> = self.secrets.iter().map(String::as_str).collect();
        let result = self.driver.destroy(&self.options, &secrets).await;
        self.armed = false;

        match result {
            Ok(()) => {
                info!(
                    target: "infra_tests.driver",
                    working_dir = %self.options.working_dir.display(),
                    "Deployment destroyed"
                );
                TeardownStatus::Destroyed
            }
            Err(error) => {
                let kept_dir = self
                    .workdir
                    .take()
                    .map_or_else(|| self.options.working_dir.clone(), |w| w.keep().into_path());
                error!(
                    target: "infra_tests.driver",
                    error = %error,
                    kept_dir = %kept_dir.display(),
                    "Teardown failed, resources may still exist"
                );
                TeardownStatus::Failed { error, kept_dir }
            }
        }
    }
}

impl Drop for Deployment {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let driver = self.driver.clone();
        let options = self.options.clone();
        let secrets = std::mem::take(&mut self.secrets);

        // The spawned task may never run if the runtime is shutting down.
        // Keep the state until destroy has succeeded.
        let kept = self.workdir.take().map(WorkDir::keep);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    target: "infra_tests.driver",
                    working_dir = %options.working_dir.display(),
                    "Deployment dropped before teardown, destroying in background"
                );
                handle.spawn(async move {
                    let secrets: Vec<&str> = secrets.iter().map(String::as_str).collect();
                    match driver.destroy(&options, &secrets).await {
                        Ok(()) => {
                            info!(
                                target: "infra_tests.driver",
                                working_dir = %options.working_dir.display(),
                                "Background teardown destroyed deployment"
                            );
                            if let Some(Err(e)) = kept.map(KeptDir::remove) {
                                warn!(
                                    target: "infra_tests.driver",
                                    error = %e,
                                    working_dir = %options.working_dir.display(),
                                    "Failed to remove working directory"
                                );
                            }
                        }
                        Err(e) => {
                            error!(
                                target: "infra_tests.driver",
                                error = %e,
                                kept_dir = %options.working_dir.display(),
                                "Background teardown failed, resources may still exist"
                            );
                        }
                    }
                });
            }
            Err(_) => {
                error!(
                    target: "infra_tests.driver",
                    kept_dir = %options.working_dir.display(),
                    "Deployment dropped outside a runtime, run destroy manually"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::engine::mock::{EngineOp, MockEngine};
    use crate::engine::TerraformCli;
    use serde_json::json;
    use std::time::Duration;

    fn module_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn vars() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("vm_name".to_string(), json!("test-vm")),
            ("admin_password".to_string(), json!("Tp1!0123456789abcdef0123")),
        ])
    }

    fn driver(engine: &Arc<MockEngine>) -> DeploymentDriver {
        DeploymentDriver::new(engine.clone(), RetryPolicy::new(3, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_apply_runs_init_apply_output() {
        let engine = Arc::new(MockEngine::succeeding(json!({
            "virtual_machine_windows": {"name": "test-vm", "resource_id": "/subscriptions/x"}
        })));
        let dir = module_dir();
        let mut deployment = driver(&engine).deployment(
            WorkDir::InPlace(dir.path().to_path_buf()),
            vars(),
            vec![],
        );

        let outputs = deployment.apply().await.unwrap();

        assert_eq!(
            outputs.attribute("virtual_machine_windows", "name").unwrap(),
            "test-vm"
        );
        assert_eq!(
            engine.ops(),
            vec![EngineOp::Init, EngineOp::Apply, EngineOp::Output]
        );
        assert!(deployment.is_armed());

        let status = deployment.teardown().await;
        assert!(matches!(status, TeardownStatus::Destroyed));
        assert_eq!(engine.count(EngineOp::Destroy), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_retries_transient_errors() {
        let engine = Arc::new(
            MockEngine::succeeding(json!({}))
                .with_apply_failures(["Error: StatusCode=429", "Error: AnotherOperationInProgress"]),
        );
        let dir = module_dir();
        let mut deployment = driver(&engine).deployment(
            WorkDir::InPlace(dir.path().to_path_buf()),
            vars(),
            vec![],
        );

        deployment.apply().await.unwrap();

        assert_eq!(engine.count(EngineOp::Apply), 3);
        deployment.teardown().await;
    }

    #[tokio::test]
    async fn test_apply_failure_redacts_and_still_arms() {
        let password = "Tp1!0123456789abcdef0123";
        let engine = Arc::new(MockEngine::succeeding(json!({})).with_apply_failures([format!(
            "Error: InvalidParameter: password {password} does not meet requirements"
        )]));
        let dir = module_dir();
        let mut deployment = driver(&engine).deployment(
            WorkDir::InPlace(dir.path().to_path_buf()),
            vars(),
            vec![password.to_string()],
        );

        let err = deployment.apply().await.unwrap_err();

        match &err {
            ApplyError::Engine {
                stage,
                attempts,
                exhausted,
                diagnostics,
                ..
            } => {
                assert_eq!(*stage, ApplyStage::Apply);
                assert_eq!(*attempts, 1);
                assert!(!exhausted);
                assert!(diagnostics.contains("InvalidParameter"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.to_string().contains(password));
        assert!(deployment.is_armed());

        deployment.teardown().await;
        assert_eq!(engine.count(EngineOp::Destroy), 1);
    }

    #[tokio::test]
    async fn test_missing_engine_binary_fails_at_init() {
        let driver = DeploymentDriver::new(
            Arc::new(TerraformCli::new("terraform-binary-that-does-not-exist")),
            RetryPolicy::new(3, Duration::from_secs(1)),
        );
        let options = EngineOptions {
            working_dir: std::env::temp_dir(),
            vars: BTreeMap::new(),
        };

        let err = driver.apply(&options, &[]).await.unwrap_err();

        match err {
            ApplyError::Engine {
                stage,
                attempts,
                diagnostics,
                ..
            } => {
                assert_eq!(stage, ApplyStage::Init);
                assert_eq!(attempts, 1);
                assert!(diagnostics.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_teardown_without_apply_is_noop() {
        let engine = Arc::new(MockEngine::succeeding(json!({})));
        let dir = module_dir();
        let deployment = driver(&engine).deployment(
            WorkDir::InPlace(dir.path().to_path_buf()),
            vars(),
            vec![],
        );

        let status = deployment.teardown().await;

        assert!(matches!(status, TeardownStatus::NotRequired));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_destroy_is_reported_and_keeps_dir() {
        let root = module_dir();
        std::fs::create_dir_all(root.path().join("environments/dev")).unwrap();
        let workdir =
            WorkDir::prepare(root.path(), Path::new("environments/dev"), true).unwrap();
        let engine = Arc::new(
            MockEngine::succeeding(json!({}))
                .with_destroy_failures(["Error: deleting Resource Group: ScopeLocked"]),
        );
        let mut deployment = driver(&engine).deployment(workdir, vars(), vec![]);
        deployment.apply().await.unwrap();

        let status = deployment.teardown().await;

        match status {
            TeardownStatus::Failed { error, kept_dir } => {
                assert!(error.diagnostics.contains("ScopeLocked"));
                assert!(kept_dir.exists());
                std::fs::remove_dir_all(kept_dir.join("../..")).unwrap();
            }
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(engine.count(EngineOp::Destroy), 1);
    }

    #[tokio::test]
    async fn test_drop_destroys_in_background() {
        let engine = Arc::new(MockEngine::succeeding(json!({})));
        let dir = module_dir();
        let mut deployment = driver(&engine).deployment(
            WorkDir::InPlace(dir.path().to_path_buf()),
            vars(),
            vec![],
        );
        deployment.apply().await.unwrap();

        drop(deployment);

        for _ in 0..100 {
            if engine.count(EngineOp::Destroy) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.count(EngineOp::Destroy), 1);
    }

    #[tokio::test]
    async fn test_background_teardown_removes_copy_after_destroy() {
        let root = module_dir();
        std::fs::create_dir_all(root.path().join("environments/dev")).unwrap();
        let workdir =
            WorkDir::prepare(root.path(), Path::new("environments/dev"), true).unwrap();
        let engine = Arc::new(MockEngine::succeeding(json!({})));
        let mut deployment = driver(&engine).deployment(workdir, vars(), vec![]);
        deployment.apply().await.unwrap();
        let working_dir = deployment.working_dir().to_path_buf();

        drop(deployment);

        for _ in 0..100 {
            if !working_dir.exists() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.count(EngineOp::Destroy), 1);
        assert!(!working_dir.exists());
    }

    #[test]
    fn test_state_survives_runtime_shutdown_after_drop() {
        let root = module_dir();
        std::fs::create_dir_all(root.path().join("environments/dev")).unwrap();
        let engine = Arc::new(MockEngine::succeeding(json!({})));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let working_dir = runtime.block_on(async {
            let workdir =
                WorkDir::prepare(root.path(), Path::new("environments/dev"), true).unwrap();
            let mut deployment = driver(&engine).deployment(workdir, vars(), vec![]);
            deployment.apply().await.unwrap();
            std::fs::write(deployment.working_dir().join("terraform.tfstate"), "{}").unwrap();
            let working_dir = deployment.working_dir().to_path_buf();
            drop(deployment);
            working_dir
        });
        // The spawned destroy is discarded with the runtime.
        drop(runtime);

        assert_eq!(engine.count(EngineOp::Destroy), 0);
        assert!(working_dir.join("terraform.tfstate").is_file());
        std::fs::remove_dir_all(working_dir.join("../..")).unwrap();
    }

    #[test]
    fn test_drop_without_apply_does_nothing() {
        let engine = Arc::new(MockEngine::succeeding(json!({})));
        let dir = module_dir();
        let deployment = driver(&engine).deployment(
            WorkDir::InPlace(dir.path().to_path_buf()),
            vars(),
            vec![],
        );

        drop(deployment);

        assert!(engine.calls().is_empty());
    }
}
