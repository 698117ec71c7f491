use anyhow::{Context, Result};
use json_eval::JsonEval;
use std::path::PathBuf;

use crate::cli_utils::{print_json, read_optional, EngineOptions};

/// Evaluate a standalone JSON Logic expression against an optional data file
pub fn cmd_logic(expr: String, data: Option<PathBuf>, options: &EngineOptions) -> Result<()> {
    let data = read_optional(data.as_ref())?;
    let config = options.resolve()?;

    let eval = JsonEval::new("{}", None, None)?.with_config(&config);
    let result = eval
        .compile_and_run_logic(&expr, Some(data.as_deref().unwrap_or("{}")), None)
        .with_context(|| format!("Failed to evaluate expression: {}", expr))?;
    print_json(&result)
}
