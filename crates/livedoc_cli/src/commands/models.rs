//! Models command implementation.

use super::load_registry;
use livedoc_core::{ModelsSnapshot, Operation, Timestamp};
use std::path::Path;

/// Renders the metadata of every model in a file.
pub fn render(path: &Path, format: &str) -> Result<String, Box<dyn std::error::Error>> {
    let registry = load_registry(path)?;
    let snapshot = registry.get_models(Timestamp(0));
    let ModelsSnapshot::Changed { models, .. } = snapshot else {
        return Ok(String::new());
    };

    match format {
        "json" => Ok(serde_json::to_string_pretty(&models)?),
        "text" => {
            let mut out = String::new();
            for model in &models {
                let mut flags = Vec::new();
                if model.options.read_only {
                    flags.push("read-only");
                }
                if !model.options.strict {
                    flags.push("open fields");
                }
                if flags.is_empty() {
                    out.push_str(&format!("{}\n", model.name));
                } else {
                    out.push_str(&format!("{} ({})\n", model.name, flags.join(", ")));
                }

                for field in &model.fields {
                    let levels: Vec<String> = [
                        Operation::Create,
                        Operation::Read,
                        Operation::Update,
                        Operation::Delete,
                    ]
                    .into_iter()
                    .filter_map(|op| field.permissions.required(op).map(|l| format!("{op}>={l}")))
                    .collect();
                    out.push_str(&format!("  {:<16} {:?}", field.name, field.field_type));
                    if !levels.is_empty() {
                        out.push_str(&format!("  {}", levels.join(" ")));
                    }
                    out.push('\n');
                }
            }
            Ok(out)
        }
        other => Err(format!("unknown format: {other}").into()),
    }
}

/// Runs the models command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", render(path, format)?);
    Ok(())
}
