//! The per-project apply loop.
//!
//! A run walks the flow's projects strictly in order, one stack operation at
//! a time. Loop state is explicit (`LoopState`): a remaining-work queue that
//! shrinks by one project per step and a result map that grows by one entry
//! per step. When a checkpoint path is set the state is persisted after every
//! step, so an interrupted run can be resumed with the projects it had not
//! finished.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::client::{format_changes, Operation, Outcome, StackClient, StackTarget};
use crate::config::Config;
use crate::error::{MelodyError, Result};
use crate::stack::StackIdentity;
use crate::{io, paths};

// ---------------------------------------------------------------------------
// FailurePolicy
// ---------------------------------------------------------------------------

/// What happens when a project's operation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure; the run yields no result map.
    #[default]
    Abort,
    /// Record the failure against the project and move on.
    Continue,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::Continue => "continue",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "abort" => Ok(FailurePolicy::Abort),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!(
                "unknown failure policy '{other}': expected abort or continue"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// ResultMap
// ---------------------------------------------------------------------------

/// Project identifier to result, iterated (and serialized) in insertion order.
pub type ResultMap<T> = IndexMap<String, T>;

// ---------------------------------------------------------------------------
// ProjectResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectResult {
    Succeeded(Outcome),
    Failed { error: String },
}

impl ProjectResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, ProjectResult::Failed { .. })
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            ProjectResult::Succeeded(o) => Some(o),
            ProjectResult::Failed { .. } => None,
        }
    }

    /// One-line description for tables and logs.
    pub fn describe(&self) -> String {
        match self {
            ProjectResult::Succeeded(o) => format_changes(o.changes()),
            ProjectResult::Failed { error } => format!("FAILED: {error}"),
        }
    }
}

// ---------------------------------------------------------------------------
// RunPlan / LoopState / RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_name: String,
    pub org: String,
    pub stack: String,
    pub operation: Operation,
    pub policy: FailurePolicy,
    pub projects: Vec<String>,
}

/// Everything needed to pick a run back up. Persisted as the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    pub org: String,
    pub stack: String,
    pub operation: Operation,
    pub started_at: DateTime<Utc>,
    pub remaining: VecDeque<String>,
    pub results: ResultMap<ProjectResult>,
}

impl LoopState {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(path, data.as_bytes())
    }

    /// Every project of the run: finished ones first, then the remaining queue.
    pub fn projects(&self) -> Vec<&str> {
        self.results
            .keys()
            .map(String::as_str)
            .chain(self.remaining.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_name: String,
    pub org: String,
    pub stack: String,
    pub operation: Operation,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: ResultMap<ProjectResult>,
}

impl RunReport {
    pub fn failed_projects(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_failed())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_projects().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Resolve every project of a run to its stack and working directory.
/// Fails on the first project that cannot form a valid stack name or that
/// appears twice.
pub fn plan_targets(
    root: &Path,
    org: &str,
    stack: &str,
    projects: &[String],
) -> Result<Vec<StackTarget>> {
    let mut seen = HashSet::new();
    if let Some(dup) = projects.iter().find(|p| !seen.insert(p.as_str())) {
        return Err(MelodyError::DuplicateProject(dup.clone()));
    }
    projects
        .iter()
        .map(|project| -> Result<StackTarget> {
            Ok(StackTarget {
                identity: StackIdentity::new(org, project.as_str(), stack)?,
                work_dir: paths::project_dir(root, project),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ApplyLoop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

pub struct ApplyLoop<'a, C: StackClient> {
    client: &'a C,
    config: &'a Config,
    root: PathBuf,
    run_name: String,
    policy: FailurePolicy,
    checkpoint: Option<PathBuf>,
    state: LoopState,
}

impl<'a, C: StackClient> ApplyLoop<'a, C> {
    /// Start a fresh run over `plan.projects`.
    ///
    /// Stack names are validated for every project before anything runs.
    pub fn new(client: &'a C, config: &'a Config, root: &Path, plan: RunPlan) -> Result<Self> {
        plan_targets(root, &plan.org, &plan.stack, &plan.projects)?;
        Ok(Self {
            client,
            config,
            root: root.to_path_buf(),
            run_name: plan.run_name,
            policy: plan.policy,
            checkpoint: None,
            state: LoopState {
                org: plan.org,
                stack: plan.stack,
                operation: plan.operation,
                started_at: Utc::now(),
                remaining: plan.projects.into_iter().collect(),
                results: ResultMap::new(),
            },
        })
    }

    /// Continue a run from a checkpoint written by an earlier, interrupted run.
    ///
    /// The checkpoint must belong to the same org, stack and operation.
    pub fn resume(
        client: &'a C,
        config: &'a Config,
        root: &Path,
        plan: RunPlan,
        checkpoint: &Path,
    ) -> Result<Self> {
        let state = LoopState::load(checkpoint)?;
        if state.org != plan.org || state.stack != plan.stack || state.operation != plan.operation
        {
            return Err(MelodyError::CheckpointMismatch(format!(
                "checkpoint is for {} {}.*.{}, requested {} {}.*.{}",
                state.operation, state.org, state.stack, plan.operation, plan.org, plan.stack
            )));
        }
        let remaining: Vec<String> = state.remaining.iter().cloned().collect();
        plan_targets(root, &state.org, &state.stack, &remaining)?;
        if state.projects() != plan.projects {
            tracing::warn!(
                run = %plan.run_name,
                checkpoint = ?state.projects(),
                flow = ?plan.projects,
                "flow differs from checkpoint; resuming with the checkpoint's projects"
            );
        }
        tracing::info!(
            run = %plan.run_name,
            done = state.results.len(),
            remaining = state.remaining.len(),
            "resuming from checkpoint"
        );
        Ok(Self {
            client,
            config,
            root: root.to_path_buf(),
            run_name: plan.run_name,
            policy: plan.policy,
            checkpoint: Some(checkpoint.to_path_buf()),
            state,
        })
    }

    /// Persist loop state to `path` after every step.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(path.into());
        self
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Process the next project.
    ///
    /// On an aborting failure the error is returned and the checkpoint (if
    /// any) still lists the failed project as remaining.
    pub fn step(&mut self) -> Result<Step> {
        let Some(project) = self.state.remaining.pop_front() else {
            return Ok(Step::Done);
        };

        let target = StackTarget {
            identity: StackIdentity::new(
                self.state.org.as_str(),
                project.as_str(),
                self.state.stack.as_str(),
            )?,
            work_dir: paths::project_dir(&self.root, &project),
        };
        let op = self.state.operation;
        tracing::info!(project = %project, stack = %target.stack_name(), "running {op}");

        let result = match self.client.run(op, &target, self.config.config_for(&project)) {
            Ok(outcome) => ProjectResult::Succeeded(outcome),
            Err(e) if self.policy == FailurePolicy::Continue => {
                tracing::warn!(project = %project, error = %e, "{op} failed; continuing");
                ProjectResult::Failed {
                    error: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(project = %project, error = %e, "{op} failed; aborting run");
                return Err(e);
            }
        };
        tracing::info!(project = %project, "{}", result.describe());
        self.state.results.insert(project, result);

        if let Some(path) = &self.checkpoint {
            self.state.save(path)?;
        }

        if self.state.remaining.is_empty() {
            Ok(Step::Done)
        } else {
            Ok(Step::Continue)
        }
    }

    /// Drive `step` until every project is processed.
    pub fn run(mut self) -> Result<RunReport> {
        if let Some(path) = &self.checkpoint {
            self.state.save(path)?;
        }

        while self.step()? == Step::Continue {}

        if let Some(path) = &self.checkpoint {
            io::remove_if_exists(path)?;
        }

        let report = RunReport {
            run_name: self.run_name,
            org: self.state.org,
            stack: self.state.stack,
            operation: self.state.operation,
            started_at: self.state.started_at,
            finished_at: Utc::now(),
            results: self.state.results,
        };
        let results = serde_json::to_string(&report.results)?;
        tracing::info!(run = %report.run_name, results = %results, "run complete");
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
