//! json-eval - JSON-Logic schema evaluation with a stable C ABI
//!
//! A schema is plain JSON in which any node may be an `{"$evaluation": ...}`
//! expression. Parsing compiles every expression once and orders them by data
//! dependency; an engine instance then evaluates the schema against a data
//! document and an optional caller context, validates field rules, and
//! propagates edits through declared `dependents`.
//!
//! # Quick Start
//!
//! ```rust
//! use json_eval::JsonEval;
//!
//! let schema = r#"{
//!     "type": "object",
//!     "properties": {
//!         "price": {"type": "number"},
//!         "qty": {"type": "number"},
//!         "total": {"type": "number", "value": {"$evaluation": {"*": [{"var": "price"}, {"var": "qty"}]}}}
//!     }
//! }"#;
//!
//! let mut eval = JsonEval::new(schema, None, None)?;
//! eval.evaluate(r#"{"price": 4, "qty": 3}"#, None, None, None)?;
//!
//! let evaluated = eval.get_evaluated_schema(true);
//! assert_eq!(evaluated["properties"]["total"]["value"], 12);
//! # Ok::<(), json_eval::EvalError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   parse once    ┌────────────────────┐
//! │ schema JSON  │ ──────────────> │ Arc<ParsedSchema>  │ <── ParsedSchemaCache
//! └──────────────┘                 └────────────────────┘
//!                                           │ shared
//!                                           v
//!        data + context  ───────>  JsonEval (per document)
//!                                           │
//!                       ┌───────────────────┼──────────────────┐
//!                       v                   v                  v
//!               evaluated schema     validation result   dependent changes
//! ```
//!
//! The [`c_api`] module wraps engine instances in integer handles for
//! foreign hosts; every call returns an [`c_api::FFIResult`] whose buffer the
//! host releases with `json_eval_free_result`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Parsed-schema cache shared across instances
pub mod cache;
pub mod cancel;
pub mod config;
pub mod engine;
/// Error types
pub mod error;
pub mod eval_cache;
pub mod logic;
pub mod path;
pub mod schema;

/// Handle registry and async dispatch used by the C API
pub mod bridge;

// Public C API
pub mod c_api;

pub use crate::cache::{CacheStats, ParsedSchemaCache};
pub use crate::cancel::CancellationToken;
pub use crate::config::EvalConfig;
pub use crate::engine::{JsonEval, ValidationError, ValidationResult};
pub use crate::error::{EvalError, Result};
pub use crate::eval_cache::EvalCacheStats;
pub use crate::logic::{CompiledLogicStats, CompiledLogicStore};
pub use crate::path::ReturnFormat;
pub use crate::schema::ParsedSchema;

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
