use anyhow::{Context, Result};
use json_eval::{EvalConfig, JsonEval};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Options shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub config: Option<PathBuf>,
    pub no_cache: bool,
    pub cache_size: Option<usize>,
    pub timezone_offset: Option<i32>,
}

impl EngineOptions {
    /// Config file first, then command-line overrides
    pub fn resolve(&self) -> Result<EvalConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = read_text(path)?;
                EvalConfig::from_json(&text)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?
            }
            None => EvalConfig::default(),
        };
        if self.no_cache {
            config.cache_enabled = false;
        }
        if let Some(size) = self.cache_size {
            config.cache_capacity = size;
        }
        if self.timezone_offset.is_some() {
            config.timezone_offset = self.timezone_offset;
        }
        Ok(config)
    }
}

pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn read_optional(path: Option<&PathBuf>) -> Result<Option<String>> {
    path.map(|p| read_text(p)).transpose()
}

fn is_msgpack(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("msgpack") | Some("mpk")
    )
}

/// Build an engine from a `.json` or `.msgpack` schema file
pub fn load_engine(schema: &Path, options: &EngineOptions, context: Option<&str>) -> Result<JsonEval> {
    let config = options.resolve()?;
    let eval = if is_msgpack(schema) {
        let bytes = fs::read(schema).with_context(|| format!("Failed to read {}", schema.display()))?;
        JsonEval::new_from_msgpack(&bytes, context, None)
    } else {
        JsonEval::new(&read_text(schema)?, context, None)
    }
    .with_context(|| format!("Failed to load schema: {}", schema.display()))?;
    Ok(eval.with_config(&config))
}

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
