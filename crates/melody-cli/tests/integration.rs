#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn melody(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("melody").unwrap();
    cmd.current_dir(dir.path())
        .env("MELODY_ROOT", dir.path())
        .env_remove("MELODY_PULUMI")
        .env_remove("RUST_LOG");
    cmd
}

fn write_flow(dir: &TempDir, name: &str, steps: &[&str]) {
    let flows = dir.path().join("flows");
    std::fs::create_dir_all(&flows).unwrap();
    let body = if steps.is_empty() {
        "steps: []\n".to_string()
    } else {
        let items: Vec<String> = steps.iter().map(|s| format!("  - {s}\n")).collect();
        format!("steps:\n{}", items.concat())
    };
    std::fs::write(flows.join(name), body).unwrap();
    for step in steps {
        std::fs::create_dir_all(dir.path().join("projects").join(step)).unwrap();
    }
}

// ---------------------------------------------------------------------------
// melody stack-name
// ---------------------------------------------------------------------------

#[test]
fn stack_name_joins_with_period() {
    let dir = TempDir::new().unwrap();
    melody(&dir)
        .args(["stack-name", "aitomatic", "infra", "prod"])
        .assert()
        .success()
        .stdout("aitomatic.infra.prod\n");
}

#[test]
fn stack_name_rejects_separator_in_component() {
    let dir = TempDir::new().unwrap();
    melody(&dir)
        .args(["stack-name", "aitomatic", "in.fra", "prod"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid stack name component"));
}

// ---------------------------------------------------------------------------
// melody steps
// ---------------------------------------------------------------------------

#[test]
fn steps_lists_default_flow_in_order() {
    let dir = TempDir::new().unwrap();
    write_flow(&dir, "test.yml", &["zeta", "alpha"]);
    melody(&dir)
        .arg("steps")
        .assert()
        .success()
        .stdout("  1. zeta\n  2. alpha\n");
}

#[test]
fn steps_missing_flow_fails() {
    let dir = TempDir::new().unwrap();
    melody(&dir)
        .args(["steps", "--flow-spec", "nightly.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("flow spec not found"));
}

#[test]
fn steps_without_steps_key_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("flows")).unwrap();
    std::fs::write(dir.path().join("flows/test.yml"), "projects: [a]\n").unwrap();
    melody(&dir)
        .arg("steps")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid flow spec"));
}

// ---------------------------------------------------------------------------
// melody config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_defaults_is_clean() {
    let dir = TempDir::new().unwrap();
    melody(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_reports_errors() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("melody.yaml"), "defaults:\n  org: a.b\n").unwrap();
    melody(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] defaults.org"));
}

#[test]
fn config_show_masks_secrets() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("melody.yaml"),
        "projects:\n  db:\n    config:\n      password:\n        value: hunter2\n        secret: true\n",
    )
    .unwrap();
    melody(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[secret]"))
        .stdout(predicate::str::contains("hunter2").not());
}

// ---------------------------------------------------------------------------
// melody run --dry-run
// ---------------------------------------------------------------------------

#[test]
fn dry_run_lists_stacks_without_pulumi() {
    let dir = TempDir::new().unwrap();
    write_flow(&dir, "test.yml", &["aws-eks", "apps"]);
    melody(&dir)
        .args(["run", "--dry-run", "--stack", "prod"])
        .env("MELODY_PULUMI", "/nonexistent/pulumi")
        .assert()
        .success()
        .stdout(predicate::str::contains("aitomatic.aws-eks.prod"))
        .stdout(predicate::str::contains("aitomatic.apps.prod"));
}

#[test]
fn dry_run_uses_config_defaults() {
    let dir = TempDir::new().unwrap();
    write_flow(&dir, "nightly.yml", &["infra"]);
    std::fs::write(
        dir.path().join("melody.yaml"),
        "defaults:\n  org: acme\n  stack: dev\n  flow_spec: nightly.yml\n",
    )
    .unwrap();
    melody(&dir)
        .args(["--json", "run", "--dry-run", "--operation", "up"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stack\": \"acme.infra.dev\""))
        .stdout(predicate::str::contains("\"operation\": \"up\""));
}

#[test]
fn run_rejects_unknown_operation() {
    let dir = TempDir::new().unwrap();
    write_flow(&dir, "test.yml", &["infra"]);
    melody(&dir)
        .args(["run", "--operation", "apply"])
        .assert()
        .failure();
}

#[test]
fn run_without_pulumi_fails() {
    let dir = TempDir::new().unwrap();
    write_flow(&dir, "test.yml", &["infra"]);
    melody(&dir)
        .arg("run")
        .env("MELODY_PULUMI", dir.path().join("missing-pulumi"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("pulumi CLI not found"));
}

// ---------------------------------------------------------------------------
// melody run against a fake pulumi binary
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod fake_pulumi {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const SCRIPT: &str = r#"#!/bin/sh
project=$(basename "$PWD")
echo "$project $*" >> "$FAKE_PULUMI_LOG"
if [ "$project" = "$FAKE_PULUMI_FAIL_PROJECT" ]; then
  echo "error: the stack is currently locked" >&2
  exit 255
fi
case "$1" in
  preview) echo '{"changeSummary":{"create":2,"same":1}}' ;;
  stack) if [ "$2" = "history" ]; then echo '[{"kind":"update","result":"succeeded","resourceChanges":{"update":1}}]'; fi ;;
esac
exit 0
"#;

    fn install(dir: &TempDir) -> PathBuf {
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("pulumi");
        std::fs::write(&script, SCRIPT).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn melody_with_fake(dir: &TempDir, fail_project: &str) -> Command {
        let script = install(dir);
        let mut cmd = melody(dir);
        cmd.env("MELODY_PULUMI", script)
            .env("FAKE_PULUMI_LOG", log_path(dir))
            .env("FAKE_PULUMI_FAIL_PROJECT", fail_project);
        cmd
    }

    fn log_path(dir: &TempDir) -> PathBuf {
        dir.path().join("pulumi.log")
    }

    /// Projects for which `preview` was invoked, in order.
    fn previews(dir: &TempDir) -> Vec<String> {
        read_lines(&log_path(dir))
            .into_iter()
            .filter(|l| l.contains(" preview --json"))
            .filter_map(|l| l.split_whitespace().next().map(str::to_string))
            .collect()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn preview_runs_every_project_in_order() {
        let dir = TempDir::new().unwrap();
        write_flow(&dir, "test.yml", &["zeta", "alpha", "mid"]);
        let out = melody_with_fake(&dir, "none")
            .args(["--json", "run"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        assert_eq!(previews(&dir), vec!["zeta", "alpha", "mid"]);

        let stdout = String::from_utf8(out).unwrap();
        let zeta = stdout.find("\"zeta\"").unwrap();
        let alpha = stdout.find("\"alpha\"").unwrap();
        let mid = stdout.find("\"mid\"").unwrap();
        assert!(zeta < alpha && alpha < mid, "results keep flow order");

        let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
        assert_eq!(report["org"], "aitomatic");
        assert_eq!(report["results"].as_object().unwrap().len(), 3);
        assert_eq!(
            report["results"]["zeta"]["succeeded"]["change_summary"]["create"],
            2
        );
    }

    #[test]
    fn every_project_is_selected_and_refreshed_first() {
        let dir = TempDir::new().unwrap();
        write_flow(&dir, "test.yml", &["infra"]);
        melody_with_fake(&dir, "none")
            .args(["run", "--stack", "prod"])
            .assert()
            .success()
            .stdout(predicate::str::contains("create=2 same=1"));
        let log = read_lines(&log_path(&dir));
        let suffix = "--stack aitomatic.infra.prod --non-interactive";
        assert_eq!(
            log,
            vec![
                format!("infra stack select --create {suffix}"),
                format!("infra refresh --yes --skip-preview {suffix}"),
                format!("infra preview --json {suffix}"),
            ]
        );
    }

    #[test]
    fn empty_flow_never_calls_pulumi() {
        let dir = TempDir::new().unwrap();
        write_flow(&dir, "test.yml", &[]);
        melody_with_fake(&dir, "none")
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("no steps"));
        assert!(!log_path(&dir).exists());
    }

    #[test]
    fn failure_aborts_and_writes_no_report() {
        let dir = TempDir::new().unwrap();
        write_flow(&dir, "test.yml", &["a", "b", "c"]);
        let report = dir.path().join("report.json");
        melody_with_fake(&dir, "b")
            .args(["run", "--output"])
            .arg(&report)
            .assert()
            .code(1)
            .stderr(predicate::str::contains("currently locked"));
        assert_eq!(previews(&dir), vec!["a"]);
        assert!(!read_lines(&log_path(&dir)).iter().any(|l| l.starts_with("c ")));
        assert!(!report.exists());
    }

    #[test]
    fn continue_policy_runs_everything_and_exits_2() {
        let dir = TempDir::new().unwrap();
        write_flow(&dir, "test.yml", &["a", "b", "c"]);
        let report = dir.path().join("out/report.json");
        melody_with_fake(&dir, "b")
            .args(["run", "--on-failure", "continue", "--output"])
            .arg(&report)
            .assert()
            .code(2)
            .stdout(predicate::str::contains("FAILED"))
            .stderr(predicate::str::contains("1 of 3 project(s) failed"));
        assert_eq!(previews(&dir), vec!["a", "c"]);
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert!(saved["results"]["b"]["failed"]["error"]
            .as_str()
            .unwrap()
            .contains("locked"));
    }

    #[test]
    fn up_reads_update_summary_from_history() {
        let dir = TempDir::new().unwrap();
        write_flow(&dir, "test.yml", &["infra"]);
        melody_with_fake(&dir, "none")
            .args(["run", "--operation", "up"])
            .assert()
            .success()
            .stdout(predicate::str::contains("update=1"));
        let log = read_lines(&log_path(&dir));
        assert!(log.iter().any(|l| l.starts_with("infra up --yes --skip-preview")));
        assert!(log.iter().any(|l| l.starts_with("infra stack history --json")));
    }

    #[test]
    fn resume_continues_after_aborted_run() {
        let dir = TempDir::new().unwrap();
        write_flow(&dir, "test.yml", &["a", "b", "c"]);
        let ckpt = dir.path().join(".melody/runs/test01.yaml");

        melody_with_fake(&dir, "b")
            .args(["run", "--checkpoint"])
            .arg(&ckpt)
            .assert()
            .code(1);
        assert!(ckpt.exists());

        melody_with_fake(&dir, "none")
            .args(["--json", "run", "--resume"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"a\""))
            .stdout(predicate::str::contains("\"c\""));
        assert_eq!(previews(&dir), vec!["a", "b", "c"]);
        assert!(!ckpt.exists());
    }

    #[test]
    fn aborted_up_resumes_from_default_checkpoint() {
        let dir = TempDir::new().unwrap();
        write_flow(&dir, "test.yml", &["a", "b", "c"]);
        let ckpt = dir.path().join(".melody/runs/test01.yaml");

        melody_with_fake(&dir, "b")
            .args(["run", "--operation", "up"])
            .assert()
            .code(1);
        assert!(ckpt.exists());

        write_flow(&dir, "test.yml", &["a", "c"]);
        melody_with_fake(&dir, "none")
            .args(["run", "--operation", "up", "--resume"])
            .assert()
            .success()
            .stderr(predicate::str::contains("flow differs from checkpoint"));
        let ups: Vec<String> = read_lines(&log_path(&dir))
            .into_iter()
            .filter(|l| l.contains(" up --yes"))
            .filter_map(|l| l.split_whitespace().next().map(str::to_string))
            .collect();
        assert_eq!(ups, vec!["a", "b", "c"]);
        assert!(!ckpt.exists());
    }

    #[test]
    fn resume_without_checkpoint_fails() {
        let dir = TempDir::new().unwrap();
        write_flow(&dir, "test.yml", &["a"]);
        melody_with_fake(&dir, "none")
            .args(["run", "--resume"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("no checkpoint to resume"));
    }
}
