//! Unit tests for the `pulumi` CLI engine.

use super::*;
use crate::engine::ConfigValue;
use crate::test_support::{RecordingSink, ScriptedRunner};
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn unit() -> ProvisioningUnit {
    ProvisioningUnit::new("network", "./vpc")
}

fn stack(unit: ProvisioningUnit) -> StackRef {
    StackRef {
        unit,
        name: String::from("dev"),
    }
}

fn args_of(invocation: &Invocation) -> Vec<String> {
    invocation
        .args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[rstest]
#[tokio::test]
async fn create_or_select_passes_create_flag(unit: ProvisioningUnit) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let engine = PulumiCli::new("pulumi", runner.clone());

    let selected = engine
        .create_or_select_stack(&unit, "dev")
        .await
        .expect("select should succeed");

    assert_eq!(selected.name, "dev");
    let invocations = runner.invocations();
    let call = invocations.first().expect("one invocation");
    assert_eq!(call.program, "pulumi");
    assert_eq!(call.cwd.as_deref().map(camino::Utf8Path::as_str), Some("./vpc"));
    assert_eq!(
        args_of(call),
        ["stack", "select", "--create", "dev", "--non-interactive"]
    );
}

#[rstest]
#[tokio::test]
async fn select_surfaces_missing_stack(unit: ProvisioningUnit) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(255), "", "no stack named 'dev' found");
    let engine = PulumiCli::new("pulumi", runner.clone());

    let err = engine
        .select_stack(&unit, "dev")
        .await
        .expect_err("select should fail");

    assert!(
        matches!(
            err,
            PulumiError::CommandFailure { status: Some(255), ref stderr, .. }
                if stderr.contains("no stack named")
        ),
        "unexpected error: {err}"
    );
    let invocations = runner.invocations();
    let call = invocations.first().expect("one invocation");
    assert!(!call.has_arg("--create"));
}

#[rstest]
#[tokio::test]
async fn set_all_config_splits_plaintext_and_secret_values(unit: ProvisioningUnit) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let engine = PulumiCli::new("pulumi", runner.clone());
    let mut config = ConfigMap::new();
    config.insert(
        String::from("postgresql:host"),
        ConfigValue::plain("localhost"),
    );
    config.insert(String::from("postgresql:password"), ConfigValue::secret("p"));

    engine
        .set_all_config(&stack(unit), &config)
        .await
        .expect("config should be written");

    let invocations = runner.invocations();
    let call = invocations.first().expect("one invocation");
    assert_eq!(
        args_of(call),
        [
            "config",
            "set-all",
            "--stack",
            "dev",
            "--non-interactive",
            "--plaintext",
            "postgresql:host=localhost",
            "--secret",
            "postgresql:password=p",
        ]
    );
}

#[rstest]
#[tokio::test]
async fn set_all_config_skips_empty_maps(unit: ProvisioningUnit) {
    let runner = ScriptedRunner::new();
    let engine = PulumiCli::new("pulumi", runner.clone());

    engine
        .set_all_config(&stack(unit), &ConfigMap::new())
        .await
        .expect("empty config is a no-op");

    assert!(runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn up_streams_output_and_reads_outputs(unit: ProvisioningUnit) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "Updating (dev)\nResources: 3 created\n", "");
    runner.push_output(
        Some(0),
        r#"{"bastionHost":"1.2.3.4","dbPassword":"[secret]"}"#,
        "",
    );
    runner.push_output(
        Some(0),
        r#"{"bastionHost":"1.2.3.4","dbPassword":"hunter2"}"#,
        "",
    );
    let engine = PulumiCli::new("pulumi", runner.clone());
    let sink = RecordingSink::new();

    let outputs = engine
        .up(&stack(unit), &sink)
        .await
        .expect("up should succeed");

    assert_eq!(sink.lines(), ["Updating (dev)", "Resources: 3 created"]);
    assert_eq!(outputs.get_str("bastionHost").as_deref(), Some("1.2.3.4"));
    let password = outputs.get("dbPassword").expect("password output");
    assert_eq!(password.value, json!("hunter2"));
    assert!(password.secret);
    assert!(!outputs.get("bastionHost").is_some_and(|value| value.secret));

    let invocations = runner.invocations();
    let up_call = invocations.first().expect("up invocation");
    assert_eq!(
        args_of(up_call),
        [
            "up",
            "--yes",
            "--skip-preview",
            "--stack",
            "dev",
            "--non-interactive"
        ]
    );
    let revealed = invocations.get(2).expect("revealed outputs invocation");
    assert!(revealed.has_arg("--show-secrets"));
}

#[rstest]
#[case("refresh")]
#[case("destroy")]
#[tokio::test]
async fn refresh_and_destroy_use_matching_subcommand(
    unit: ProvisioningUnit,
    #[case] operation: &str,
) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_output(Some(0), "{}", "");
    runner.push_output(Some(0), "{}", "");
    let engine = PulumiCli::new("pulumi", runner.clone());
    let sink = RecordingSink::new();
    let target = stack(unit);

    let result = if operation == "refresh" {
        engine.refresh(&target, &sink).await
    } else {
        engine.destroy(&target, &sink).await
    };
    let outputs = result.expect("operation should succeed");

    assert!(outputs.is_empty());
    let invocations = runner.invocations();
    let call = invocations.first().expect("operation invocation");
    assert_eq!(
        call.args.first().map(|arg| arg.to_string_lossy().into_owned()),
        Some(operation.to_owned())
    );
}

#[rstest]
#[tokio::test]
async fn failed_up_does_not_read_outputs(unit: ProvisioningUnit) {
    let runner = ScriptedRunner::new();
    runner.push_failure(1);
    let engine = PulumiCli::new("pulumi", runner.clone());

    let err = engine
        .up(&stack(unit), &RecordingSink::new())
        .await
        .expect_err("up should fail");

    assert!(matches!(err, PulumiError::CommandFailure { ref operation, .. } if operation == "up"));
    assert_eq!(runner.invocations().len(), 1);
}

#[rstest]
fn merge_outputs_rejects_non_object_documents() {
    let err = merge_outputs("dev", "[]", "[]").expect_err("arrays are not outputs");
    assert!(matches!(err, PulumiError::Parse { .. }));
}

#[rstest]
fn merge_outputs_treats_blank_documents_as_empty() {
    let outputs = merge_outputs("dev", "", "\n").expect("blank output parses");
    assert!(outputs.is_empty());
}
