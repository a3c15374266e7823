use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const FLOWS_DIR: &str = "flows";
pub const PROJECTS_DIR: &str = "projects";
pub const STATE_DIR: &str = ".melody";

pub const CONFIG_FILE: &str = "melody.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn flows_dir(root: &Path) -> PathBuf {
    root.join(FLOWS_DIR)
}

pub fn flow_path(root: &Path, spec: &str) -> PathBuf {
    flows_dir(root).join(spec)
}

/// Working directory of a Pulumi project (the directory holding `Pulumi.yaml`).
pub fn project_dir(root: &Path, project: &str) -> PathBuf {
    root.join(PROJECTS_DIR).join(project)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

/// Default checkpoint location for a named run.
pub fn checkpoint_path(root: &Path, run_name: &str) -> PathBuf {
    state_dir(root).join("runs").join(format!("{run_name}.yaml"))
}

// ---------------------------------------------------------------------------
// Project identifier validation
// ---------------------------------------------------------------------------

static PROJECT_RE: OnceLock<Regex> = OnceLock::new();

fn project_re() -> &'static Regex {
    PROJECT_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").unwrap())
}

/// A project identifier names a directory under `projects/` and is one
/// component of a stack name, so it may not contain separators.
pub fn is_valid_project(project: &str) -> bool {
    !project.is_empty() && project.len() <= 64 && project_re().is_match(project)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
