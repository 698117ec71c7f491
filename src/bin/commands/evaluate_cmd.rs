use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::cli_utils::{load_engine, print_json, read_optional, EngineOptions};

pub fn cmd_evaluate(
    schema: PathBuf,
    data: Option<PathBuf>,
    context: Option<PathBuf>,
    skip_layout: bool,
    options: &EngineOptions,
) -> Result<()> {
    let context = read_optional(context.as_ref())?;
    let data = read_optional(data.as_ref())?.unwrap_or_else(|| "{}".to_string());

    let mut eval = load_engine(&schema, options, context.as_deref())?;
    eval.evaluate(&data, context.as_deref(), None, None)
        .context("Evaluation failed")?;

    let stats = eval.cache_stats();
    info!(hits = stats.hits, misses = stats.misses, "evaluation finished");

    print_json(&eval.get_evaluated_schema(skip_layout))
}
