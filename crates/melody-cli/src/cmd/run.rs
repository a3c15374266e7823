use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Args;
use melody_core::{
    client::Operation,
    config::Config,
    flow, io, paths,
    pulumi::PulumiCli,
    runner::{plan_targets, ApplyLoop, FailurePolicy, RunPlan, RunReport},
    stack::build_stack_name,
};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exit codes (no std::process::exit in command code)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RunExit {
    ProjectsFailed { failed: usize, total: usize },
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunExit::ProjectsFailed { .. } => 2,
        }
    }
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunExit::ProjectsFailed { failed, total } => {
                write!(f, "{failed} of {total} project(s) failed")
            }
        }
    }
}

impl std::error::Error for RunExit {}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct RunArgs {
    /// Flow file under flows/ (default: defaults.flow_spec, else test.yml)
    #[arg(long)]
    pub flow_spec: Option<String>,

    /// Organization prefix of every stack name (default: defaults.org)
    #[arg(long)]
    pub org: Option<String>,

    /// Stack name suffix, e.g. dev or prod (default: defaults.stack)
    #[arg(long)]
    pub stack: Option<String>,

    /// Stack operation: preview, up or destroy
    #[arg(long, default_value = "preview")]
    pub operation: Operation,

    /// On a failing project: abort the run, or record it and continue
    #[arg(long, default_value = "abort")]
    pub on_failure: FailurePolicy,

    /// Name of this run, used in logs and for the default checkpoint path
    #[arg(long)]
    pub run_name: Option<String>,

    /// Checkpoint file for this run (default: .melody/runs/<run-name>.yaml)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Continue an interrupted run from its checkpoint instead of starting over
    #[arg(long)]
    pub resume: bool,

    /// Also write the JSON run report to this file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Print the stacks that would be operated on without calling pulumi
    #[arg(long)]
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(root: &Path, pulumi: Option<&Path>, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load melody.yaml")?;
    let defaults = &config.defaults;

    let spec = args.flow_spec.unwrap_or_else(|| defaults.flow_spec.clone());
    let projects = flow::load_steps(root, &spec)
        .with_context(|| format!("failed to load flow '{spec}'"))?;

    let plan = RunPlan {
        run_name: args.run_name.unwrap_or_else(|| defaults.run_name.clone()),
        org: args.org.unwrap_or_else(|| defaults.org.clone()),
        stack: args.stack.unwrap_or_else(|| defaults.stack.clone()),
        operation: args.operation,
        policy: args.on_failure,
        projects,
    };

    if args.dry_run {
        return dry_run(root, &plan, json);
    }

    let client = PulumiCli::from_config(&config.pulumi, pulumi)?;
    tracing::debug!(binary = %client.binary().display(), "using pulumi");

    // Every run checkpoints, so a plain `--resume` finds the interrupted run.
    let checkpoint = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| paths::checkpoint_path(root, &plan.run_name));

    let run_name = plan.run_name.clone();
    let apply = if args.resume {
        if !checkpoint.is_file() {
            anyhow::bail!("no checkpoint to resume at {}", checkpoint.display());
        }
        ApplyLoop::resume(&client, &config, root, plan, &checkpoint)?
    } else {
        ApplyLoop::new(&client, &config, root, plan)?.with_checkpoint(checkpoint)
    };

    let report = apply
        .run()
        .with_context(|| format!("run '{run_name}' aborted"))?;

    if let Some(path) = &args.output {
        let data = serde_json::to_string_pretty(&report)?;
        io::atomic_write(path, data.as_bytes())
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    let failed = report.failed_projects().len();
    if failed > 0 {
        return Err(RunExit::ProjectsFailed {
            failed,
            total: report.results.len(),
        }
        .into());
    }
    Ok(())
}

fn dry_run(root: &Path, plan: &RunPlan, json: bool) -> anyhow::Result<()> {
    let targets = plan_targets(root, &plan.org, &plan.stack, &plan.projects)?;

    if json {
        let items: Vec<serde_json::Value> = targets
            .iter()
            .map(|t| {
                serde_json::json!({
                    "project": t.identity.project,
                    "stack": t.stack_name(),
                    "work_dir": t.work_dir,
                    "operation": plan.operation,
                })
            })
            .collect();
        print_json(&items)?;
        return Ok(());
    }

    if targets.is_empty() {
        println!("Flow has no steps; nothing to {}.", plan.operation);
        return Ok(());
    }

    println!("Would run '{}' on {} stack(s):", plan.operation, targets.len());
    let rows: Vec<Vec<String>> = targets
        .iter()
        .map(|t| {
            vec![
                t.identity.project.clone(),
                t.stack_name(),
                t.work_dir.display().to_string(),
            ]
        })
        .collect();
    print_table(&["PROJECT", "STACK", "WORK DIR"], &rows);
    Ok(())
}

fn print_report(report: &RunReport) {
    if report.results.is_empty() {
        println!("Flow has no steps; nothing to {}.", report.operation);
        return;
    }
    let rows: Vec<Vec<String>> = report
        .results
        .iter()
        .map(|(project, result)| {
            vec![
                project.to_string(),
                build_stack_name(&report.org, project, &report.stack)
                    .unwrap_or_else(|_| project.to_string()),
                result.describe(),
            ]
        })
        .collect();
    print_table(&["PROJECT", "STACK", "RESULT"], &rows);
}
