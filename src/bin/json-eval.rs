mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cli_utils::EngineOptions;
use commands::{cmd_dependents, cmd_evaluate, cmd_logic, cmd_validate};

#[derive(Parser)]
#[command(name = "json-eval")]
#[command(
    about = "Evaluate JSON schemas with embedded JSON Logic",
    long_about = "json-eval - evaluate, validate and propagate changes through JSON schemas\n\n\
    Schemas are JSON (or MessagePack with a .msgpack extension) whose nodes may be\n\
    {\"$evaluation\": <JSON Logic>} expressions. Results are printed as JSON.\n\n\
    Set JSON_EVAL_LOG (e.g. JSON_EVAL_LOG=debug) for diagnostics on stderr.\n\n\
    Examples:\n\
      json-eval evaluate quote.json --data input.json --skip-layout\n\
      json-eval validate quote.json --data input.json\n\
      json-eval dependents quote.json --data input.json --changed plan --re-evaluate\n\
      json-eval logic '{\"+\": [{\"var\": \"a\"}, 1]}' --data input.json"
)]
#[command(version)]
struct Cli {
    /// JSON config file ({"cacheEnabled", "cacheCapacity", "timezoneOffset"})
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Disable the evaluation result cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Evaluation cache capacity
    #[arg(long, global = true)]
    cache_size: Option<usize>,

    /// Minutes east of UTC used by today/now
    #[arg(long, global = true, allow_hyphen_values = true)]
    timezone_offset: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a schema and print the evaluated schema
    Evaluate {
        /// Schema file (.json or .msgpack)
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,

        /// Data file (default: empty object)
        #[arg(short, long, value_name = "FILE")]
        data: Option<PathBuf>,

        /// Context file
        #[arg(short, long, value_name = "FILE")]
        context: Option<PathBuf>,

        /// Leave $layout elements unresolved
        #[arg(long)]
        skip_layout: bool,
    },

    /// Validate data against the schema's rules (exit status 1 on errors)
    Validate {
        /// Schema file (.json or .msgpack)
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,

        /// Data file
        #[arg(short, long, value_name = "FILE")]
        data: PathBuf,

        /// Context file
        #[arg(short, long, value_name = "FILE")]
        context: Option<PathBuf>,

        /// Only validate fields under these paths
        #[arg(short, long, value_name = "PATH")]
        paths: Vec<String>,
    },

    /// Report dependent fields affected by changed paths
    Dependents {
        /// Schema file (.json or .msgpack)
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,

        /// Data file
        #[arg(short, long, value_name = "FILE")]
        data: PathBuf,

        /// Context file
        #[arg(short, long, value_name = "FILE")]
        context: Option<PathBuf>,

        /// Changed field paths
        #[arg(long, value_name = "PATH", required = true)]
        changed: Vec<String>,

        /// Re-evaluate the whole schema after propagation
        #[arg(long)]
        re_evaluate: bool,
    },

    /// Evaluate a standalone JSON Logic expression
    Logic {
        /// Expression as JSON text
        #[arg(value_name = "EXPR")]
        expr: String,

        /// Data file
        #[arg(short, long, value_name = "FILE")]
        data: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("JSON_EVAL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = EngineOptions {
        config: cli.config,
        no_cache: cli.no_cache,
        cache_size: cli.cache_size,
        timezone_offset: cli.timezone_offset,
    };

    match cli.command {
        Commands::Evaluate {
            schema,
            data,
            context,
            skip_layout,
        } => cmd_evaluate(schema, data, context, skip_layout, &options),
        Commands::Validate {
            schema,
            data,
            context,
            paths,
        } => cmd_validate(schema, data, context, paths, &options),
        Commands::Dependents {
            schema,
            data,
            context,
            changed,
            re_evaluate,
        } => cmd_dependents(schema, data, context, changed, re_evaluate, &options),
        Commands::Logic { expr, data } => cmd_logic(expr, data, &options),
    }
}
