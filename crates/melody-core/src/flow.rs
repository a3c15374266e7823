//! Flow files: the ordered list of Pulumi projects a run walks through.
//!
//! A flow file lives under `flows/` and carries a top-level `steps` sequence:
//!
//! ```yaml
//! steps:
//!   - aws-eks
//!   - monitoring
//! ```
//!
//! Other top-level keys are ignored.

use crate::error::{MelodyError, Result};
use crate::paths;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct FlowFile {
    steps: Vec<String>,
}

/// Load the step list of flow `spec` from `<root>/flows/`.
pub fn load_steps(root: &Path, spec: &str) -> Result<Vec<String>> {
    let path = paths::flow_path(root, spec);
    if !path.is_file() {
        return Err(MelodyError::NotFound(path));
    }
    let data = std::fs::read_to_string(&path)?;
    parse_steps(&data).map_err(|reason| MelodyError::Parse { path, reason })
}

fn parse_steps(data: &str) -> std::result::Result<Vec<String>, String> {
    if data.trim().is_empty() {
        return Err("file is empty; expected a top-level 'steps' list".to_string());
    }
    let flow: FlowFile = serde_yaml::from_str(data).map_err(|e| e.to_string())?;

    let mut seen = HashSet::new();
    for step in &flow.steps {
        if !paths::is_valid_project(step) {
            return Err(format!(
                "invalid project '{step}': use letters, digits, '-' or '_'"
            ));
        }
        if !seen.insert(step.as_str()) {
            return Err(format!("project '{step}' is listed more than once"));
        }
    }
    Ok(flow.steps)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
