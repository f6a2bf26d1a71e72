use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn run_tally(temp_path: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tally"))
        .args(args)
        .arg("--color")
        .arg("never")
        .current_dir(temp_path)
        .env_remove("TALLY_LOG")
        .output()
        .expect("execute tally")
}

fn write_config(temp_path: &Path, yaml: &str) {
    std::fs::write(temp_path.join("tally.yml"), yaml).expect("write config");
}

#[test]
fn test_run_pass_then_fail_exits_nonzero() {
    let temp_dir = TempDir::new().expect("temp dir");
    let temp_path = temp_dir.path();
    write_config(
        temp_path,
        r#"
groups:
  - { name: first, strategy: direct, entry: { command: "true" } }
  - { name: second, strategy: direct, entry: { command: "false" } }
"#,
    );

    let output = run_tally(temp_path, &["run"]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("first OK"), "stdout: {stdout}");
    assert!(stdout.contains("second FAIL"), "stdout: {stdout}");
    assert!(
        stdout.contains("At least one suite group failed."),
        "stdout: {stdout}"
    );
}

#[test]
fn test_run_all_passing() {
    let temp_dir = TempDir::new().expect("temp dir");
    let temp_path = temp_dir.path();
    write_config(
        temp_path,
        r#"
groups:
  - name: ambient
    strategy: direct
    entry: { command: sh, args: ["-c", "exit 0"], invocation: ambient }
"#,
    );

    let output = run_tally(temp_path, &["run"]);

    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("All suite groups passed."), "stdout: {stdout}");
}

#[test]
fn test_run_without_groups_succeeds() {
    let temp_dir = TempDir::new().expect("temp dir");
    write_config(temp_dir.path(), "groups: []\n");

    let output = run_tally(temp_dir.path(), &["run"]);

    assert!(output.status.success());
}

#[test]
fn test_capture_group_persists_only_events() {
    let temp_dir = TempDir::new().expect("temp dir");
    let temp_path = temp_dir.path();
    write_config(
        temp_path,
        r#"
artifact_dir: out
groups:
  - name: captured
    strategy: capture
    entry:
      command: sh
      args: ["-c", "echo 'test: a'; echo 'progress: 50%'; echo 'successful: a'"]
"#,
    );

    let output = run_tally(temp_path, &["run"]);

    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("test: a\nprogress: 50%\nsuccessful: a\n"),
        "stdout: {stdout}"
    );

    let artifact = std::fs::read_to_string(temp_path.join("out/test_result.1.subunit"))
        .expect("capture artifact");
    assert_eq!(artifact, "test: a\nsuccessful: a\n");

    let xml = std::fs::read_to_string(temp_path.join("out/test_result.1.xml")).expect("report");
    assert_eq!(xml.matches("<testcase").count(), 1);
}

#[test]
fn test_isolated_group_runs_in_worker() {
    let temp_dir = TempDir::new().expect("temp dir");
    let temp_path = temp_dir.path();
    write_config(
        temp_path,
        r#"
groups:
  - name: iso-pass
    strategy: isolated
    entry: { command: sh, args: ["-c", "echo worker output"] }
  - name: iso-fail
    strategy: isolated
    entry: { command: sh, args: ["-c", "exit 4"] }
"#,
    );

    let output = run_tally(temp_path, &["run"]);

    assert_eq!(output.status.code(), Some(4));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("worker output"), "stdout: {stdout}");
    assert!(stdout.contains("iso-pass OK"), "stdout: {stdout}");
    assert!(stdout.contains("iso-fail FAIL"), "stdout: {stdout}");
}

#[test]
fn test_isolated_capture_group_writes_report() {
    let temp_dir = TempDir::new().expect("temp dir");
    let temp_path = temp_dir.path();
    write_config(
        temp_path,
        r#"
groups:
  - name: iso
    strategy: isolated
    capture: true
    entry:
      command: sh
      args: ["-c", "echo 'test: x.t'; echo 'failure: x.t [ nope ]'; exit 1"]
"#,
    );

    let output = run_tally(temp_path, &["run", "--group", "iso"]);

    assert_eq!(output.status.code(), Some(1));
    let artifact =
        std::fs::read_to_string(temp_path.join("test_result.1.subunit")).expect("artifact");
    assert_eq!(artifact, "test: x.t\nfailure: x.t [ nope ]\n");
    let xml = std::fs::read_to_string(temp_path.join("test_result.1.xml")).expect("report");
    assert!(xml.contains(r#"failures="1""#), "xml: {xml}");
}

#[test]
fn test_unknown_group_is_rejected() {
    let temp_dir = TempDir::new().expect("temp dir");
    write_config(temp_dir.path(), "groups: []\n");

    let output = run_tally(temp_dir.path(), &["run", "--group", "missing"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown group 'missing'"), "stderr: {stderr}");
}

#[test]
fn test_list_groups() {
    let temp_dir = TempDir::new().expect("temp dir");
    write_config(
        temp_dir.path(),
        r#"
groups:
  - { name: unit, strategy: direct, locations: ["interface"], entry: { command: pytest } }
  - { name: soap, strategy: capture, entry: { command: trial } }
"#,
    );

    let output = run_tally(temp_dir.path(), &["list"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("unit (direct)"), "stdout: {stdout}");
    assert!(stdout.contains("soap (capture, captured)"), "stdout: {stdout}");
    assert!(stdout.contains("  interface"), "stdout: {stdout}");
}

#[test]
fn test_transcode_subcommand() {
    let temp_dir = TempDir::new().expect("temp dir");
    let temp_path = temp_dir.path();
    std::fs::write(
        temp_path.join("stream.subunit"),
        "test: a.t1\nsuccessful: a.t1\nskip: a.t2 [ later ]\n",
    )
    .expect("write stream");

    let output = run_tally(temp_path, &["transcode", "stream.subunit", "-o", "report.xml"]);

    assert!(
        output.status.success(),
        "transcode failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Wrote 2 test cases (3 events)"), "stdout: {stdout}");

    let xml = std::fs::read_to_string(temp_path.join("report.xml")).expect("report");
    assert!(xml.contains(r#"<testsuite name="stream""#), "xml: {xml}");
    assert!(xml.contains(r#"skipped="1""#), "xml: {xml}");
}
