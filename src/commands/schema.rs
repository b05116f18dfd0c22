use schemars::schema_for;

use crate::config::ConfigFile;

/// Print the JSON Schema for `loop.toml` to stdout.
pub fn run_schema() -> anyhow::Result<()> {
    let schema = schema_for!(ConfigFile);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
