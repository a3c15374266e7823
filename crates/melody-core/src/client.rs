use crate::config::ConfigMap;
use crate::error::Result;
use crate::stack::StackIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Preview,
    Up,
    Destroy,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Preview => "preview",
            Operation::Up => "up",
            Operation::Destroy => "destroy",
        }
    }

    /// Whether the operation changes deployed infrastructure.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Operation::Preview)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "preview" => Ok(Operation::Preview),
            "up" => Ok(Operation::Up),
            "destroy" => Ok(Operation::Destroy),
            other => Err(format!(
                "unknown operation '{other}': expected preview, up or destroy"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Resource operation kind (`create`, `update`, `delete`, `same`, ...) to count.
pub type ChangeSummary = BTreeMap<String, u64>;

/// The latest entry of `pulumi stack history` after an update or destroy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub kind: String,
    pub result: String,
    #[serde(default)]
    pub resource_changes: ChangeSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Outcome {
    Preview { change_summary: ChangeSummary },
    Up { summary: UpdateSummary },
    Destroy { summary: UpdateSummary },
}

impl Outcome {
    /// Resource counts regardless of which operation produced them.
    pub fn changes(&self) -> &ChangeSummary {
        match self {
            Outcome::Preview { change_summary } => change_summary,
            Outcome::Up { summary } | Outcome::Destroy { summary } => &summary.resource_changes,
        }
    }
}

/// Render counts as `create=2 same=5`, or `no changes`.
pub fn format_changes(changes: &ChangeSummary) -> String {
    let parts: Vec<String> = changes
        .iter()
        .filter(|(_, n)| **n > 0)
        .map(|(k, n)| format!("{k}={n}"))
        .collect();
    if parts.is_empty() {
        "no changes".to_string()
    } else {
        parts.join(" ")
    }
}

// ---------------------------------------------------------------------------
// StackTarget / StackClient
// ---------------------------------------------------------------------------

/// A stack plus the project directory its program lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTarget {
    pub identity: StackIdentity,
    pub work_dir: PathBuf,
}

impl StackTarget {
    pub fn stack_name(&self) -> String {
        self.identity.qualified_name()
    }
}

/// Operations against a single named stack.
///
/// Each call resolves (or creates) the stack in `target.work_dir`, applies
/// `config` if given, refreshes state and then performs the operation.
pub trait StackClient {
    fn preview(&self, target: &StackTarget, config: Option<&ConfigMap>) -> Result<ChangeSummary>;

    fn up(&self, target: &StackTarget, config: Option<&ConfigMap>) -> Result<UpdateSummary>;

    fn destroy(&self, target: &StackTarget, config: Option<&ConfigMap>) -> Result<UpdateSummary>;

    fn run(
        &self,
        op: Operation,
        target: &StackTarget,
        config: Option<&ConfigMap>,
    ) -> Result<Outcome> {
        Ok(match op {
            Operation::Preview => Outcome::Preview {
                change_summary: self.preview(target, config)?,
            },
            Operation::Up => Outcome::Up {
                summary: self.up(target, config)?,
            },
            Operation::Destroy => Outcome::Destroy {
                summary: self.destroy(target, config)?,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_parse_and_display() {
        for op in [Operation::Preview, Operation::Up, Operation::Destroy] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
            assert_eq!(op.to_string(), op.as_str());
        }
        assert!("apply".parse::<Operation>().is_err());
        assert!(!Operation::Preview.is_mutating());
        assert!(Operation::Destroy.is_mutating());
    }

    #[test]
    fn update_summary_from_history_json() {
        let json = r#"{
            "kind": "update",
            "startTime": "2026-10-18T10:00:00Z",
            "message": "",
            "environment": {"exec.kind": "cli"},
            "config": {},
            "result": "succeeded",
            "endTime": "2026-10-18T10:02:00Z",
            "resourceChanges": {"create": 4, "same": 1}
        }"#;
        let s: UpdateSummary = serde_json::from_str(json).unwrap();
        assert_eq!(s.kind, "update");
        assert_eq!(s.result, "succeeded");
        assert_eq!(s.resource_changes["create"], 4);
        assert_eq!(s.end_time.as_deref(), Some("2026-10-18T10:02:00Z"));
    }

    #[test]
    fn outcome_json_tagged() {
        let mut cs = ChangeSummary::new();
        cs.insert("create".into(), 2);
        let outcome = Outcome::Preview { change_summary: cs };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"operation\":\"preview\""));
        assert_eq!(outcome.changes()["create"], 2);
    }

    #[test]
    fn format_changes_skips_zero_counts() {
        let mut cs = ChangeSummary::new();
        assert_eq!(format_changes(&cs), "no changes");
        cs.insert("same".into(), 3);
        cs.insert("delete".into(), 0);
        cs.insert("create".into(), 1);
        assert_eq!(format_changes(&cs), "create=1 same=3");
    }
}
