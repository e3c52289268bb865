//! Infrastructure-as-code engine invocation.
//!
//! [`InfraEngine`] is the seam between the harness and the external engine.
//! [`TerraformCli`] drives the `terraform` binary as a child process; the
//! [`mock`] module provides a scripted engine for harness tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to launch {binary}: {source}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },
}

impl EngineError {
    /// Combined engine output captured for the failed command.
    pub fn output(&self) -> &str {
        match self {
            EngineError::Launch { .. } => "",
            EngineError::CommandFailed { output, .. } => output,
        }
    }
}

/// Working directory and input variables of one deployment.
#[derive(Clone)]
pub struct EngineOptions {
    pub working_dir: PathBuf,
    pub vars: BTreeMap<String, Value>,
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may carry passwords; keys are enough to debug a run.
        f.debug_struct("EngineOptions")
            .field("working_dir", &self.working_dir)
            .field("vars", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Operations the deployment driver needs from an engine.
///
/// Each method returns the engine's combined output on success.
#[async_trait]
pub trait InfraEngine: Send + Sync {
    /// Initialize the working directory (providers, backend).
    async fn init(&self, options: &EngineOptions) -> Result<String, EngineError>;

    /// Plan and apply the configuration.
    async fn apply(&self, options: &EngineOptions) -> Result<String, EngineError>;

    /// Print all outputs as JSON.
    async fn output_json(&self, options: &EngineOptions) -> Result<String, EngineError>;

    /// Destroy everything the configuration manages.
    async fn destroy(&self, options: &EngineOptions) -> Result<String, EngineError>;
}

/// `-var key=value` arguments, one pair per variable, in key order.
///
/// Strings are passed raw, numbers and booleans as literals, lists and maps
/// as JSON (valid HCL expression syntax).
pub fn render_var_args(vars: &BTreeMap<String, Value>) -> Vec<String> {
    let mut args = Vec::with_capacity(vars.len() * 2);
    for (key, value) in vars {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        };
        args.push("-var".to_string());
        args.push(format!("{key}={rendered}"));
    }
    args
}

/// Terraform CLI wrapper.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: String,
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a terraform subcommand and return combined stdout/stderr.
    async fn run_command(
        &self,
        options: &EngineOptions,
        args: &[&str],
        with_vars: bool,
    ) -> Result<String, EngineError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        if with_vars {
            cmd.args(render_var_args(&options.vars));
        }
        cmd.current_dir(&options.working_dir);
        cmd.env("TF_IN_AUTOMATION", "1");
        cmd.env("TF_INPUT", "0");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        // Variable values stay out of the log line.
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!(
            target: "infra_tests.engine",
            command = %command,
            working_dir = %options.working_dir.display(),
            vars = ?options.vars.keys().collect::<Vec<_>>(),
            "Running engine command"
        );

        let output = cmd.output().await.map_err(|e| EngineError::Launch {
            binary: self.binary.clone(),
            source: e,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                command,
                status: output.status.to_string(),
                output: format!("{stdout}{stderr}"),
            });
        }

        Ok(stdout.into_owned())
    }
}

#[async_trait]
impl InfraEngine for TerraformCli {
    async fn init(&self, options: &EngineOptions) -> Result<String, EngineError> {
        self.run_command(
            options,
            &["init", "-upgrade=false", "-input=false", "-no-color"],
            false,
        )
        .await
    }

    async fn apply(&self, options: &EngineOptions) -> Result<String, EngineError> {
        self.run_command(
            options,
            &["apply", "-input=false", "-auto-approve", "-no-color"],
            true,
        )
        .await
    }

    async fn output_json(&self, options: &EngineOptions) -> Result<String, EngineError> {
        self.run_command(options, &["output", "-no-color", "-json"], false)
            .await
    }

    async fn destroy(&self, options: &EngineOptions) -> Result<String, EngineError> {
        self.run_command(
            options,
            &["destroy", "-input=false", "-auto-approve", "-no-color"],
            true,
        )
        .await
    }
}

/// Scripted engine for harness tests.
///
/// Records every call and replays configured failures, so tests can assert
/// ordering and teardown guarantees without a real engine.
pub mod mock {

    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Mutex, PoisonError};

    /// Engine operation recorded by [`MockEngine`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum EngineOp {
        Init,
        Apply,
        Output,
        Destroy,
    }

    /// One recorded engine call.
    #[derive(Debug, Clone)]
    pub struct EngineCall {
        pub op: EngineOp,
        pub working_dir: PathBuf,
        pub vars: BTreeMap<String, Value>,
    }

    /// Mock engine with scripted apply/destroy failures.
    pub struct MockEngine {
        outputs: String,
        apply_failures: Mutex<VecDeque<String>>,
        destroy_failures: Mutex<VecDeque<String>>,
        calls: Mutex<Vec<EngineCall>>,
    }

    impl MockEngine {
        /// Engine whose apply succeeds and whose `output -json` prints `outputs`
        /// wrapped in the engine's envelope format.
        pub fn succeeding(outputs: Value) -> Self {
            let envelopes: serde_json::Map<String, Value> = outputs
                .as_object()
                .map(|o| {
                    o.iter()
                        .map(|(k, v)| {
                            (
                                k.clone(),
                                serde_json::json!({"sensitive": false, "value": v}),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();

            Self {
                outputs: Value::Object(envelopes).to_string(),
                apply_failures: Mutex::new(VecDeque::new()),
                destroy_failures: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Fail the next applies with the given engine output, in order.
        pub fn with_apply_failures<I, S>(self, failures: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.apply_failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(failures.into_iter().map(Into::into));
            self
        }

        /// Fail the next destroys with the given engine output, in order.
        pub fn with_destroy_failures<I, S>(self, failures: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.destroy_failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(failures.into_iter().map(Into::into));
            self
        }

        /// All calls so far.
        pub fn calls(&self) -> Vec<EngineCall> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Operations so far, in call order.
        pub fn ops(&self) -> Vec<EngineOp> {
            self.calls().into_iter().map(|c| c.op).collect()
        }

        /// Number of calls of one operation.
        pub fn count(&self, op: EngineOp) -> usize {
            self.ops().into_iter().filter(|o| *o == op).count()
        }

        fn record(&self, op: EngineOp, options: &EngineOptions) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(EngineCall {
                    op,
                    working_dir: options.working_dir.clone(),
                    vars: options.vars.clone(),
                });
        }

        fn scripted_failure(
            queue: &Mutex<VecDeque<String>>,
            command: &str,
        ) -> Result<String, EngineError> {
            match queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
            {
                Some(output) => Err(EngineError::CommandFailed {
                    command: command.to_string(),
                    status: "exit status: 1".to_string(),
                    output,
                }),
                None => Ok(String::new()),
            }
        }
    }

    #[async_trait]
    impl InfraEngine for MockEngine {
        async fn init(&self, options: &EngineOptions) -> Result<String, EngineError> {
            self.record(EngineOp::Init, options);
            Ok("Terraform has been successfully initialized!".to_string())
        }

        async fn apply(&self, options: &EngineOptions) -> Result<String, EngineError> {
            self.record(EngineOp::Apply, options);
            Self::scripted_failure(&self.apply_failures, "terraform apply")
        }

        async fn output_json(&self, options: &EngineOptions) -> Result<String, EngineError> {
            self.record(EngineOp::Output, options);
            Ok(self.outputs.clone())
        }

        async fn destroy(&self, options: &EngineOptions) -> Result<String, EngineError> {
            self.record(EngineOp::Destroy, options);
            Self::scripted_failure(&self.destroy_failures, "terraform destroy")
        }
    }

}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_var_args_sorted_and_typed() {
        let vars = BTreeMap::from([
            ("vm_name".to_string(), json!("test-vm")),
            ("os_disk_size_gb".to_string(), json!(127)),
            ("enable_accelerated_networking".to_string(), json!(false)),
            ("tags".to_string(), json!({"env": "test"})),
            ("zones".to_string(), json!(["1", "2"])),
        ]);

        let args = render_var_args(&vars);

        assert_eq!(
            args,
            vec![
                "-var",
                "enable_accelerated_networking=false",
                "-var",
                "os_disk_size_gb=127",
                "-var",
                "tags={\"env\":\"test\"}",
                "-var",
                "vm_name=test-vm",
                "-var",
                "zones=[\"1\",\"2\"]",
            ]
        );
    }

    #[test]
    fn test_engine_options_debug_hides_values() {
        let options = EngineOptions {
            working_dir: PathBuf::from("/tmp/module"),
            vars: BTreeMap::from([("admin_password".to_string(), json!("TestPassword123!"))]),
        };

        let debug_str = format!("{options:?}");
        assert!(debug_str.contains("admin_password"));
        assert!(!debug_str.contains("TestPassword123!"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let cli = TerraformCli::new("terraform-binary-that-does-not-exist");
        let options = EngineOptions {
            working_dir: std::env::temp_dir(),
            vars: BTreeMap::new(),
        };

        let err = cli.init(&options).await.unwrap_err();
        assert!(matches!(err, EngineError::Launch { .. }));
        assert_eq!(err.output(), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_captures_output() {
        // `false` ignores its arguments and exits 1.
        let cli = TerraformCli::new("false");
        let options = EngineOptions {
            working_dir: std::env::temp_dir(),
            vars: BTreeMap::from([("k".to_string(), json!("v"))]),
        };

        let err = cli.apply(&options).await.unwrap_err();
        match err {
            EngineError::CommandFailed { command, .. } => {
                assert!(command.starts_with("false apply"));
                assert!(!command.contains("k=v"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_apply_and_destroy_keep_state_locking() {
        let cli = TerraformCli::new("false");
        let options = EngineOptions {
            working_dir: std::env::temp_dir(),
            vars: BTreeMap::new(),
        };

        for err in [
            cli.apply(&options).await.unwrap_err(),
            cli.destroy(&options).await.unwrap_err(),
        ] {
            match err {
                EngineError::CommandFailed { command, .. } => {
                    assert!(!command.contains("-lock"), "{command}");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }
}
