use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cli_utils::{load_engine, read_optional, read_text, EngineOptions};

/// Print the validation result; exits with status 1 if any rule failed
pub fn cmd_validate(
    schema: PathBuf,
    data: PathBuf,
    context: Option<PathBuf>,
    paths: Vec<String>,
    options: &EngineOptions,
) -> Result<()> {
    let context = read_optional(context.as_ref())?;
    let data = read_text(&data)?;

    let mut eval = load_engine(&schema, options, context.as_deref())?;
    let filter = (!paths.is_empty()).then_some(paths.as_slice());
    let result = eval
        .validate(&data, context.as_deref(), filter, None)
        .context("Validation failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.has_error {
        std::process::exit(1);
    }
    Ok(())
}
