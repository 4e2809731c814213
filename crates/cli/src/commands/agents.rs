use crate::setup::{CliResult, Workspace};

pub fn run(ws: &Workspace) -> CliResult {
    println!("  Agents ({}):", ws.catalog.len());
    for (name, definition) in ws.catalog.iter() {
        println!();
        println!("  {name}");
        if !definition.description.is_empty() {
            println!("    {}", definition.description);
        }
        println!("    model:  {}", definition.model_or(&ws.config.default_model));
        if let Some(key) = &definition.output_key {
            println!("    writes: {key}");
        }
        if !definition.tools.is_empty() {
            println!("    tools:  {}", definition.tools.join(", "));
        }
        if !definition.agent_tools.is_empty() {
            println!("    calls:  {}", definition.agent_tools.join(", "));
        }
        if let Some(fields) = &definition.output_schema {
            let names: Vec<&str> = fields.keys().map(String::as_str).collect();
            println!("    replies with: {{ {} }}", names.join(", "));
        }
    }
    Ok(())
}
