use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cli_utils::{load_engine, print_json, read_optional, read_text, EngineOptions};

pub fn cmd_dependents(
    schema: PathBuf,
    data: PathBuf,
    context: Option<PathBuf>,
    changed: Vec<String>,
    re_evaluate: bool,
    options: &EngineOptions,
) -> Result<()> {
    let context = read_optional(context.as_ref())?;
    let data = read_text(&data)?;

    let mut eval = load_engine(&schema, options, context.as_deref())?;
    eval.evaluate(&data, context.as_deref(), None, None)
        .context("Initial evaluation failed")?;

    let changes = eval
        .evaluate_dependents(&changed, None, None, re_evaluate, None)
        .with_context(|| format!("Dependent evaluation failed for {:?}", changed))?;
    print_json(&changes)
}
