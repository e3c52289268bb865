//! Orchestrator guarantees, exercised with the scripted engine and verifier.
//!
//! Nothing here touches a cloud or a real engine binary.

use async_trait::async_trait;
use common::credentials::CredentialResolver;
use infra_tests::catalog::ResourceKind;
use infra_tests::config::HarnessConfig;
use infra_tests::driver::TeardownStatus;
use infra_tests::engine::mock::{EngineOp, MockEngine};
use infra_tests::naming::DeploymentSuffix;
use infra_tests::orchestrator::{ScenarioError, ScenarioOutcome, ScenarioRunner};
use infra_tests::scenario::Scenario;
use infra_tests::verifier::mock::{MockVerifier, VerifyCall};
use infra_tests::verifier::{ResourceVerifier, VerificationResult, VerifyError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000001";

fn credentials() -> CredentialResolver {
    CredentialResolver::from_vars(HashMap::from([
        ("ARM_SUBSCRIPTION_ID".to_string(), SUBSCRIPTION.to_string()),
        (
            "ARM_TENANT_ID".to_string(),
            "00000000-0000-0000-0000-000000000002".to_string(),
        ),
        ("ARM_CLIENT_ID".to_string(), "client".to_string()),
        ("ARM_CLIENT_SECRET".to_string(), "secret".to_string()),
    ]))
}

/// A minimal Terraform tree plus a config pointing at it.
fn harness() -> (TempDir, HarnessConfig) {
    let root = tempfile::tempdir().expect("tempdir");
    let env_dir = root.path().join("environments/dev");
    std::fs::create_dir_all(&env_dir).expect("create env dir");
    std::fs::write(env_dir.join("main.tf"), "# test").expect("write main.tf");

    let config = HarnessConfig {
        terraform_root: root.path().to_path_buf(),
        time_between_retries: Duration::from_millis(1),
        ..HarnessConfig::default()
    };
    (root, config)
}

fn windows_outputs(resource_group: &str) -> Value {
    json!({
        "resource_group": {"name": resource_group, "resource_id": format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/{resource_group}")},
        "virtual_machine_windows": {
            "name": "test-vm",
            "resource_id": format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachines/test-vm")
        }
    })
}

fn runner(
    config: HarnessConfig,
    credentials: CredentialResolver,
    engine: &Arc<MockEngine>,
    verifier: Arc<dyn ResourceVerifier>,
) -> ScenarioRunner {
    ScenarioRunner::new(config, credentials, engine.clone(), verifier)
}

#[tokio::test]
async fn test_passing_scenario_destroys_once() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        scenario.resource_group(),
    )));
    let verifier = Arc::new(MockVerifier::matching());

    let report = runner(config, credentials(), &engine, verifier.clone())
        .run_scenario(&scenario)
        .await;

    assert!(report.passed(), "{:?}", report.error());
    assert!(matches!(report.teardown, TeardownStatus::Destroyed));
    assert_eq!(
        engine.ops(),
        vec![
            EngineOp::Init,
            EngineOp::Apply,
            EngineOp::Output,
            EngineOp::Destroy
        ]
    );
}

#[tokio::test]
async fn test_apply_failure_still_destroys_once() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(
        MockEngine::succeeding(json!({}))
            .with_apply_failures(["Error: creating Virtual Machine: SkuNotAvailable"]),
    );
    let verifier = Arc::new(MockVerifier::matching());

    let report = runner(config, credentials(), &engine, verifier.clone())
        .run_scenario(&scenario)
        .await;

    assert!(matches!(report.error(), Some(ScenarioError::Apply(_))));
    assert_eq!(engine.count(EngineOp::Destroy), 1);
    assert_eq!(verifier.call_count(), 0);
}

#[tokio::test]
async fn test_verify_receives_output_name_and_scenario_resource_group() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        scenario.resource_group(),
    )));
    let verifier = Arc::new(MockVerifier::matching());

    runner(config, credentials(), &engine, verifier.clone())
        .run_scenario(&scenario)
        .await;

    assert_eq!(
        verifier.calls(),
        vec![VerifyCall {
            kind: ResourceKind::VirtualMachineWindows,
            name: "test-vm".to_string(),
            resource_group: scenario.resource_group().to_string(),
        }]
    );
}

#[tokio::test]
async fn test_subscription_is_injected_into_engine_vars() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        scenario.resource_group(),
    )));

    runner(config, credentials(), &engine, Arc::new(MockVerifier::matching()))
        .run_scenario(&scenario)
        .await;

    let apply = engine
        .calls()
        .into_iter()
        .find(|c| c.op == EngineOp::Apply)
        .expect("apply call");
    assert_eq!(apply.vars.get("subscription_id"), Some(&json!(SUBSCRIPTION)));
    assert_eq!(
        apply.vars.get("resource_group_name"),
        Some(&json!(scenario.resource_group()))
    );
}

#[tokio::test]
async fn test_os_kind_mismatch_fails_and_destroys() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        scenario.resource_group(),
    )));
    let verifier = Arc::new(MockVerifier::reporting_os_type("Linux"));

    let report = runner(config, credentials(), &engine, verifier)
        .run_scenario(&scenario)
        .await;

    match report.error() {
        Some(ScenarioError::AssertionMismatch(result)) => {
            let failed: Vec<_> = result.failures().map(|c| c.field).collect();
            assert_eq!(failed, vec!["os_type"]);
        }
        other => panic!("expected assertion mismatch, got {other:?}"),
    }
    assert_eq!(engine.count(EngineOp::Destroy), 1);
}

#[tokio::test]
async fn test_windows_os_kind_passes() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        scenario.resource_group(),
    )));
    let verifier = Arc::new(MockVerifier::reporting_os_type("Windows"));

    let report = runner(config, credentials(), &engine, verifier)
        .run_scenario(&scenario)
        .await;

    match report.outcome {
        ScenarioOutcome::Pass(result) => assert!(result.passed()),
        ScenarioOutcome::Fail(e) => panic!("expected pass, got {e}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_verify_timeout_fails_and_destroys() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        scenario.resource_group(),
    )));
    let verifier = Arc::new(MockVerifier::matching().with_delay(Duration::from_secs(301)));

    let report = runner(config, credentials(), &engine, verifier)
        .run_scenario(&scenario)
        .await;

    assert!(
        matches!(report.error(), Some(ScenarioError::Timeout(d)) if *d == Duration::from_secs(300)),
        "{:?}",
        report.error()
    );
    assert_eq!(engine.count(EngineOp::Destroy), 1);
}

#[tokio::test]
async fn test_not_found_fails_and_destroys() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        scenario.resource_group(),
    )));

    let report = runner(config, credentials(), &engine, Arc::new(MockVerifier::not_found()))
        .run_scenario(&scenario)
        .await;

    assert!(matches!(
        report.error(),
        Some(ScenarioError::NotFound { .. })
    ));
    assert_eq!(engine.count(EngineOp::Destroy), 1);
}

#[tokio::test]
async fn test_missing_output_fails_and_destroys() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    // No resource_group output.
    let engine = Arc::new(MockEngine::succeeding(json!({
        "virtual_machine_windows": {"name": "test-vm", "resource_id": "/subscriptions/x"}
    })));
    let verifier = Arc::new(MockVerifier::matching());

    let report = runner(config, credentials(), &engine, verifier.clone())
        .run_scenario(&scenario)
        .await;

    assert!(matches!(report.error(), Some(ScenarioError::Output(_))));
    assert_eq!(engine.count(EngineOp::Destroy), 1);
    assert_eq!(verifier.call_count(), 0);
}

#[tokio::test]
async fn test_empty_resource_id_fails() {
    let (_root, config) = harness();
    let scenario = Scenario::storage_account(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(json!({
        "storage_account": {"name": "st20240101abcdef", "resource_id": ""}
    })));

    let report = runner(config, credentials(), &engine, Arc::new(MockVerifier::matching()))
        .run_scenario(&scenario)
        .await;

    assert!(matches!(report.error(), Some(ScenarioError::Output(_))));
    assert_eq!(engine.count(EngineOp::Destroy), 1);
}

struct PanickingVerifier;

#[async_trait]
impl ResourceVerifier for PanickingVerifier {
    async fn verify(
        &self,
        _kind: ResourceKind,
        _name: &str,
        _resource_group: &str,
    ) -> Result<VerificationResult, VerifyError> {
        panic!("verifier blew up")
    }
}

#[tokio::test]
async fn test_panic_during_verify_still_destroys() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        scenario.resource_group(),
    )));

    let report = runner(config, credentials(), &engine, Arc::new(PanickingVerifier))
        .run_scenario(&scenario)
        .await;

    match report.error() {
        Some(ScenarioError::Panicked(message)) => assert!(message.contains("verifier blew up")),
        other => panic!("expected panic to be reported, got {other:?}"),
    }
    assert_eq!(engine.count(EngineOp::Destroy), 1);
}

#[tokio::test]
async fn test_destroy_failure_does_not_override_pass() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(
        MockEngine::succeeding(windows_outputs(scenario.resource_group()))
            .with_destroy_failures(["Error: deleting Resource Group: ScopeLocked"]),
    );

    let report = runner(config, credentials(), &engine, Arc::new(MockVerifier::matching()))
        .run_scenario(&scenario)
        .await;

    assert!(report.passed());
    match report.teardown {
        TeardownStatus::Failed { error, kept_dir } => {
            assert!(error.diagnostics.contains("ScopeLocked"));
            std::fs::remove_dir_all(kept_dir.join("../..")).expect("remove kept dir");
        }
        other => panic!("expected failed teardown, got {other:?}"),
    }
    assert_eq!(engine.count(EngineOp::Destroy), 1);
}

#[tokio::test]
async fn test_auth_failure_skips_apply_and_verify() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now());
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        scenario.resource_group(),
    )));
    let verifier = Arc::new(MockVerifier::matching());

    let report = runner(
        config,
        CredentialResolver::from_vars(HashMap::new()),
        &engine,
        verifier.clone(),
    )
    .run_scenario(&scenario)
    .await;

    assert!(matches!(report.error(), Some(ScenarioError::Auth(_))));
    assert!(matches!(report.teardown, TeardownStatus::NotRequired));
    assert!(engine.calls().is_empty());
    assert_eq!(verifier.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_scenario_never_reaches_engine() {
    let (_root, config) = harness();
    let scenario = Scenario::windows_vm(&DeploymentSuffix::now())
        .with_var("vm_name", "windows-name-too-long");
    let engine = Arc::new(MockEngine::succeeding(json!({})));

    let report = runner(config, credentials(), &engine, Arc::new(MockVerifier::matching()))
        .run_scenario(&scenario)
        .await;

    assert!(matches!(
        report.error(),
        Some(ScenarioError::InvalidScenario(_))
    ));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_missing_terraform_dir_never_reaches_engine() {
    let (_root, mut config) = harness();
    config.terraform_dir = "environments/prod".into();
    let engine = Arc::new(MockEngine::succeeding(json!({})));

    let report = runner(config, credentials(), &engine, Arc::new(MockVerifier::matching()))
        .run_scenario(&Scenario::storage_account(&DeploymentSuffix::now()))
        .await;

    assert!(matches!(report.error(), Some(ScenarioError::WorkDir(_))));
    assert!(engine.calls().is_empty());
}

#[test]
fn test_concurrent_scenarios_get_distinct_names() {
    let handles: Vec<_> = (0..2)
        .map(|_| std::thread::spawn(|| Scenario::windows_vm(&DeploymentSuffix::now())))
        .collect();
    let scenarios: Vec<Scenario> = handles
        .into_iter()
        .map(|h| h.join().expect("builder thread"))
        .collect();

    let [first, second] = scenarios.as_slice() else {
        panic!("expected two scenarios");
    };
    assert_ne!(first.deployment_id(), second.deployment_id());
    assert_ne!(first.resource_group(), second.resource_group());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_scenarios_in_parallel_keeps_order_and_isolation() {
    let (_root, config) = harness();
    let suffix_a = DeploymentSuffix::now();
    let suffix_b = DeploymentSuffix::now();
    let windows = Scenario::windows_vm(&suffix_a);
    let storage = Scenario::storage_account(&suffix_b);

    // One engine answers both scenarios; the storage scenario's outputs are
    // missing, so it fails while the Windows one passes.
    let engine = Arc::new(MockEngine::succeeding(windows_outputs(
        windows.resource_group(),
    )));
    let verifier = Arc::new(MockVerifier::matching());

    let reports = runner(config, credentials(), &engine, verifier.clone())
        .run_scenarios(vec![windows.clone(), storage.clone()])
        .await;

    let names: Vec<_> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec![windows.name(), storage.name()]);
    assert!(reports.first().expect("windows report").passed());
    assert!(matches!(
        reports.get(1).expect("storage report").error(),
        Some(ScenarioError::Output(_))
    ));

    // Each scenario applied and destroyed in its own directory.
    assert_eq!(engine.count(EngineOp::Destroy), 2);
    let mut dirs: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|c| c.op == EngineOp::Apply)
        .map(|c| c.working_dir)
        .collect();
    dirs.dedup();
    assert_eq!(dirs.len(), 2);

    let mut groups: Vec<_> = engine
        .calls()
        .into_iter()
        .filter(|c| c.op == EngineOp::Apply)
        .filter_map(|c| c.vars.get("resource_group_name").cloned())
        .collect();
    groups.sort_by_key(ToString::to_string);
    groups.dedup();
    assert_eq!(groups.len(), 2);
}
