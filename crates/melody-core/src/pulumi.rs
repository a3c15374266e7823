//! `StackClient` backed by the `pulumi` CLI.
//!
//! Every operation runs the same sequence of subprocesses in the project's
//! working directory:
//!
//! 1. `pulumi stack select --create --stack <name>`
//! 2. `pulumi config set-all --stack <name> --plaintext k=v --secret k=v ...` (if config given)
//! 3. `pulumi refresh --yes --skip-preview --stack <name>` (unless disabled)
//! 4. the operation itself:
//!    - `preview --json`: the change summary is read from `changeSummary`
//!    - `up` / `destroy` with `--yes --skip-preview`, then
//!      `stack history --json --page-size 1` for the update summary
//!
//! All invocations pass `--non-interactive`. Stdout is captured; stderr is
//! captured and its tail surfaced in `MelodyError::Operation`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::client::{ChangeSummary, StackClient, StackTarget, UpdateSummary};
use crate::config::{ConfigMap, PulumiConfig};
use crate::error::{MelodyError, Result};

/// Lines of stderr kept in an operation error.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct PulumiCli {
    binary: PathBuf,
    env: Vec<(String, String)>,
    refresh: bool,
}

impl PulumiCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            env: Vec::new(),
            refresh: true,
        }
    }

    /// Build a client from `melody.yaml` settings, resolving the binary on PATH.
    /// `binary_override` (from `--pulumi` / `MELODY_PULUMI`) wins over the config.
    pub fn from_config(cfg: &PulumiConfig, binary_override: Option<&Path>) -> Result<Self> {
        let binary = match binary_override {
            Some(p) => resolve_binary(p)?,
            None => resolve_binary(Path::new(&cfg.binary))?,
        };
        let mut cli = Self::new(binary).with_refresh(cfg.refresh);
        for (k, v) in &cfg.env {
            cli = cli.with_env(k, v);
        }
        if let Some(url) = &cfg.backend_url {
            cli = cli.with_env("PULUMI_BACKEND_URL", url);
        }
        Ok(cli)
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.into()));
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Create-or-select the stack, apply config and refresh.
    fn prepare(&self, target: &StackTarget, config: Option<&ConfigMap>) -> Result<()> {
        if !target.work_dir.is_dir() {
            return Err(MelodyError::Operation {
                stack: target.stack_name(),
                message: format!(
                    "project directory not found: {}",
                    target.work_dir.display()
                ),
            });
        }

        self.exec(target, &["stack", "select", "--create"])?;

        if let Some(config) = config.filter(|c| !c.is_empty()) {
            let mut args = vec!["config".to_string(), "set-all".to_string()];
            args.extend(config_args(config));
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            self.exec(target, &args)?;
        }

        if self.refresh {
            self.exec(target, &["refresh", "--yes", "--skip-preview"])?;
        }
        Ok(())
    }

    fn latest_update(&self, target: &StackTarget) -> Result<UpdateSummary> {
        let stdout = self.exec(target, &["stack", "history", "--json", "--page-size", "1"])?;
        parse_history(&stdout).map_err(|message| MelodyError::Operation {
            stack: target.stack_name(),
            message,
        })
    }

    /// Run `pulumi <args> --stack <name> --non-interactive` in the target's
    /// working directory and return stdout.
    fn exec(&self, target: &StackTarget, args: &[&str]) -> Result<String> {
        let stack = target.stack_name();
        let shown = display_args(args);
        tracing::debug!(stack = %stack, "pulumi {shown}");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .args(["--stack", stack.as_str(), "--non-interactive"])
            .current_dir(&target.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let output = cmd.output().map_err(|e| MelodyError::Operation {
            stack: stack.clone(),
            message: format!("failed to spawn {}: {e}", self.binary.display()),
        })?;

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MelodyError::Operation {
                stack,
                message: format!(
                    "`pulumi {shown}` exited with {code}: {}",
                    tail(&stderr, STDERR_TAIL_LINES)
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl StackClient for PulumiCli {
    fn preview(&self, target: &StackTarget, config: Option<&ConfigMap>) -> Result<ChangeSummary> {
        self.prepare(target, config)?;
        let stdout = self.exec(target, &["preview", "--json"])?;
        parse_preview(&stdout).map_err(|message| MelodyError::Operation {
            stack: target.stack_name(),
            message,
        })
    }

    fn up(&self, target: &StackTarget, config: Option<&ConfigMap>) -> Result<UpdateSummary> {
        self.prepare(target, config)?;
        self.exec(target, &["up", "--yes", "--skip-preview"])?;
        self.latest_update(target)
    }

    fn destroy(&self, target: &StackTarget, config: Option<&ConfigMap>) -> Result<UpdateSummary> {
        self.prepare(target, config)?;
        self.exec(target, &["destroy", "--yes", "--skip-preview"])?;
        self.latest_update(target)
    }
}

/// Resolve a binary name on PATH, or check an explicit path.
pub fn resolve_binary(binary: &Path) -> Result<PathBuf> {
    which::which(binary).map_err(|_| MelodyError::PulumiNotFound)
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PreviewJson {
    #[serde(rename = "changeSummary", default)]
    change_summary: ChangeSummary,
}

fn parse_preview(stdout: &str) -> std::result::Result<ChangeSummary, String> {
    let parsed: PreviewJson = serde_json::from_str(stdout.trim())
        .map_err(|e| format!("unparseable preview output: {e}"))?;
    Ok(parsed.change_summary)
}

fn parse_history(stdout: &str) -> std::result::Result<UpdateSummary, String> {
    let entries: Vec<UpdateSummary> = serde_json::from_str(stdout.trim())
        .map_err(|e| format!("unparseable stack history: {e}"))?;
    entries
        .into_iter()
        .next()
        .ok_or_else(|| "stack history is empty after update".to_string())
}

fn config_args(config: &ConfigMap) -> Vec<String> {
    let mut args = Vec::with_capacity(config.len() * 2);
    for (key, value) in config {
        let flag = if value.is_secret() {
            "--secret"
        } else {
            "--plaintext"
        };
        args.push(flag.to_string());
        args.push(format!("{key}={}", value.value()));
    }
    args
}

/// Command line for logs and errors, with the value after `--secret` masked.
fn display_args(args: &[&str]) -> String {
    let mut shown = Vec::with_capacity(args.len());
    let mut secret_next = false;
    for arg in args {
        if secret_next {
            let key = arg.split_once('=').map_or(*arg, |(k, _)| k);
            shown.push(format!("{key}=[secret]"));
        } else {
            shown.push(arg.to_string());
        }
        secret_next = *arg == "--secret";
    }
    shown.join(" ")
}

fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
