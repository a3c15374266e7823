use crate::output::print_json;
use melody_core::stack::StackIdentity;

pub fn run(org: &str, project: &str, stack: &str, json: bool) -> anyhow::Result<()> {
    let id = StackIdentity::new(org, project, stack)?;
    if json {
        let value = serde_json::json!({
            "org": id.org,
            "project": id.project,
            "stack": id.stack,
            "name": id.qualified_name(),
        });
        print_json(&value)?;
    } else {
        println!("{id}");
    }
    Ok(())
}
