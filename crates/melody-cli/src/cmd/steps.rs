use crate::output::print_json;
use anyhow::Context;
use melody_core::{config::Config, flow};
use std::path::Path;

pub fn run(root: &Path, flow_spec: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load melody.yaml")?;
    let spec = flow_spec.unwrap_or(&config.defaults.flow_spec);
    let steps =
        flow::load_steps(root, spec).with_context(|| format!("failed to load flow '{spec}'"))?;

    if json {
        let value = serde_json::json!({
            "flow": spec,
            "steps": steps,
        });
        return print_json(&value);
    }

    if steps.is_empty() {
        println!("Flow '{spec}' has no steps.");
        return Ok(());
    }
    for (i, step) in steps.iter().enumerate() {
        println!("{:>3}. {step}", i + 1);
    }
    Ok(())
}
