//! Tests for subprocess execution and output streaming.

use super::*;
use crate::test_support::RecordingSink;
use rstest::rstest;

fn shell(script: &str) -> Invocation {
    Invocation::new("sh").arg("-c").arg(script)
}

#[rstest]
#[tokio::test]
async fn process_runner_captures_both_streams() {
    let output = ProcessCommandRunner::new()
        .run(&shell("printf 'out\\n' && printf err 1>&2"))
        .await
        .expect("command should execute");

    assert_eq!(output.code, Some(0));
    assert_eq!(output.stdout, "out\n");
    assert_eq!(output.stderr, "err");
}

#[rstest]
#[tokio::test]
async fn process_runner_propagates_non_zero_exit_code() {
    let output = ProcessCommandRunner::new()
        .run(&shell("exit 7"))
        .await
        .expect("command should execute");

    assert_eq!(output.code, Some(7));
    assert!(!output.is_success());
    assert_eq!(output.status_text(), "7");
}

#[rstest]
#[tokio::test]
async fn streaming_runner_forwards_lines_in_order() {
    let sink = RecordingSink::new();
    let output = ProcessCommandRunner::new()
        .run_streaming(
            &shell("for i in 1 2 3; do echo line-$i; echo noise 1>&2; done"),
            &sink,
        )
        .await
        .expect("command should execute");

    assert_eq!(sink.lines(), vec!["line-1", "line-2", "line-3"]);
    assert_eq!(output.stdout, "line-1\nline-2\nline-3\n");
    assert_eq!(output.stderr, "noise\nnoise\nnoise\n");
}

#[rstest]
#[tokio::test]
async fn runner_honours_working_directory() {
    let tmp = tempfile::TempDir::new().expect("tempdir");
    let dir = camino::Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path");
    let output = ProcessCommandRunner::new()
        .run(&shell("pwd").current_dir(dir.clone()))
        .await
        .expect("command should execute");

    let reported = output.stdout.trim_end();
    assert!(
        reported.ends_with(dir.file_name().unwrap_or_default()),
        "pwd reported {reported}, expected {dir}"
    );
}

#[rstest]
#[tokio::test]
async fn failed_spawn_returns_spawn_error() {
    let result = ProcessCommandRunner::new()
        .run(&Invocation::new("definitely-not-a-real-binary-xyz"))
        .await;

    match result {
        Err(RunnerError::Spawn { program, .. }) => {
            assert_eq!(program, "definitely-not-a-real-binary-xyz");
        }
        other => panic!("expected RunnerError::Spawn, got {other:?}"),
    }
}

#[rstest]
fn command_line_escapes_arguments() {
    let invocation = Invocation::new("pulumi")
        .args(["config", "set-all"])
        .arg("--plaintext")
        .arg("publicKey=ssh-ed25519 AAAA me@host");

    assert_eq!(
        invocation.command_line(),
        "pulumi config set-all --plaintext 'publicKey=ssh-ed25519 AAAA me@host'"
    );
    assert!(invocation.has_arg("set-all"));
    assert!(!invocation.has_arg("up"));
}

#[rstest]
fn command_line_hides_secret_config_values() {
    let invocation = Invocation::new("pulumi")
        .args(["config", "set-all", "--plaintext", "postgresql:username=admin"])
        .args(["--secret", "postgresql:password=hunter2", "--secret", "token"]);

    let rendered = invocation.command_line();

    assert!(!rendered.contains("hunter2"), "{rendered}");
    assert!(rendered.contains("'postgresql:password=[secret]'"), "{rendered}");
    assert!(rendered.ends_with("--secret '[secret]'"), "{rendered}");
    assert!(rendered.contains("postgresql:username=admin"), "{rendered}");
}

#[rstest]
#[tokio::test]
async fn invalid_utf8_output_is_decoded_lossily_and_fully_drained() {
    let sink = RecordingSink::new();
    let script = "printf 'before\\n\\377bad\\n'; \
                  head -c 200000 /dev/zero | tr '\\0' x; \
                  printf '\\nafter\\n'";

    let output = ProcessCommandRunner::new()
        .run_streaming(&shell(script), &sink)
        .await
        .expect("command should execute");

    assert_eq!(output.code, Some(0), "child must run to completion");
    assert!(output.stdout.starts_with("before\n\u{fffd}bad\n"));
    assert!(output.stdout.ends_with("\nafter\n"));
    assert_eq!(sink.lines().last().map(String::as_str), Some("after"));
}

#[rstest]
#[tokio::test]
async fn interrupt_is_forwarded_and_cleanup_output_collected() {
    let interrupt = Interrupt::new();
    let trigger = interrupt.clone();
    let sink = move |line: &str| {
        if line == "ready" {
            trigger.trigger();
        }
    };
    let script = "trap 'echo cleaned up; exit 3' INT; \
                  echo ready; \
                  while :; do sleep 0.1; done";

    let output = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        ProcessCommandRunner::new()
            .with_interrupt(interrupt.clone())
            .run_streaming(&shell(script), &sink),
    )
    .await
    .expect("child should exit after the interrupt")
    .expect("command should execute");

    assert!(interrupt.is_triggered());
    assert_eq!(output.code, Some(3));
    assert!(output.stdout.contains("cleaned up"), "{}", output.stdout);
}

#[rstest]
#[tokio::test]
async fn triggered_interrupt_resolves_for_late_waiters() {
    let interrupt = Interrupt::new();
    assert!(!interrupt.is_triggered());

    interrupt.trigger();

    tokio::time::timeout(std::time::Duration::from_secs(1), interrupt.clone().triggered())
        .await
        .expect("an already triggered interrupt resolves at once");
}
