//! Evaluation engine
//!
//! [`JsonEval`] binds a shared [`ParsedSchema`] to one document: the current
//! data, the caller context, the evaluated `$params` and the evaluated copy
//! of the schema. All evaluation reads from a single scope object laid out as
//!
//! ```text
//! { ...data fields..., "$params": {...}, "$context": {...} }
//! ```
//!
//! so expressions address data as `{"var": "insured.age"}`, parameters as
//! `{"var": "$params.rate"}` and context as `{"var": "$context.user"}`.

mod dependents;
mod getters;
mod layout;
mod subforms;
mod table;
mod validation;

pub use validation::{ValidationError, ValidationResult};

use crate::cache::ParsedSchemaCache;
use crate::cancel::CancellationToken;
use crate::config::EvalConfig;
use crate::error::{EvalError, Result};
use crate::eval_cache::{EvalCache, EvalCacheStats};
use crate::logic::{self, CompiledLogicStore, EvalEnv};
use crate::path;
use crate::schema::{EvaluationKind, ParsedSchema};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

const PARAMS_KEY: &str = "$params";
const CONTEXT_KEY: &str = "$context";

/// Parse JSON text, mapping failures to [`EvalError::Parse`]
pub(crate) fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| EvalError::Parse(e.to_string()))
}

fn parse_optional(text: Option<&str>) -> Result<Option<Value>> {
    text.map(parse_json).transpose()
}

/// One evaluation instance
#[derive(Debug)]
pub struct JsonEval {
    parsed: Arc<ParsedSchema>,
    evaluated_schema: Value,
    scope: Value,
    eval_cache: EvalCache,
    env: EvalEnv,
    subforms: IndexMap<String, JsonEval>,
}

impl JsonEval {
    /// Build from JSON schema text with optional context and data
    pub fn new(schema: &str, context: Option<&str>, data: Option<&str>) -> Result<Self> {
        let parsed = ParsedSchema::parse(schema)?;
        Self::with_parsed_schema(Arc::new(parsed), context, data)
    }

    /// Build from a MessagePack-encoded schema
    pub fn new_from_msgpack(schema: &[u8], context: Option<&str>, data: Option<&str>) -> Result<Self> {
        let parsed = ParsedSchema::parse_msgpack(schema)?;
        Self::with_parsed_schema(Arc::new(parsed), context, data)
    }

    /// Build from a schema stored in the global parsed-schema cache
    pub fn new_from_cache(key: &str, context: Option<&str>, data: Option<&str>) -> Result<Self> {
        Self::new_from_cache_in(ParsedSchemaCache::global(), key, context, data)
    }

    /// Build from a schema stored in `cache`; fails fast if `key` is absent
    pub fn new_from_cache_in(
        cache: &ParsedSchemaCache,
        key: &str,
        context: Option<&str>,
        data: Option<&str>,
    ) -> Result<Self> {
        let parsed = cache.require(key)?;
        Self::with_parsed_schema(parsed, context, data)
    }

    /// Build from an already-parsed schema
    pub fn with_parsed_schema(
        parsed: Arc<ParsedSchema>,
        context: Option<&str>,
        data: Option<&str>,
    ) -> Result<Self> {
        let context = parse_optional(context)?.unwrap_or_else(|| Value::Object(Map::new()));
        let data = parse_optional(data)?.unwrap_or_else(|| Value::Object(Map::new()));
        let subforms = Self::build_subforms(&parsed)?;

        let mut eval = JsonEval {
            evaluated_schema: parsed.schema.clone(),
            parsed,
            scope: Value::Object(Map::new()),
            eval_cache: EvalCache::default(),
            env: EvalEnv::default(),
            subforms,
        };
        eval.reset_scope(data, context);
        Ok(eval)
    }

    fn build_subforms(parsed: &ParsedSchema) -> Result<IndexMap<String, JsonEval>> {
        parsed
            .subforms
            .iter()
            .map(|(key, sub)| Ok((key.clone(), JsonEval::with_parsed_schema(Arc::clone(sub), None, None)?)))
            .collect()
    }

    /// Apply configuration to this instance and its subforms
    pub fn with_config(mut self, config: &EvalConfig) -> Self {
        self.apply_config(config);
        self
    }

    fn apply_config(&mut self, config: &EvalConfig) {
        self.eval_cache = EvalCache::new(config.cache_capacity);
        if !config.cache_enabled {
            self.eval_cache.disable();
        }
        self.env.timezone_offset = config.timezone_offset;
        for sub in self.subforms.values_mut() {
            sub.apply_config(config);
        }
    }

    /// The parsed schema backing this instance
    pub fn parsed_schema(&self) -> &Arc<ParsedSchema> {
        &self.parsed
    }

    /// Current data without `$params` and `$context`
    pub fn data(&self) -> Value {
        let mut data = self.scope.clone();
        if let Value::Object(map) = &mut data {
            map.remove(PARAMS_KEY);
            map.remove(CONTEXT_KEY);
        }
        data
    }

    /// Current context
    pub fn context(&self) -> &Value {
        self.scope.get(CONTEXT_KEY).unwrap_or(&Value::Null)
    }

    fn reset_scope(&mut self, data: Value, context: Value) {
        let mut map = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let params = self
            .parsed
            .schema
            .get(PARAMS_KEY)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        map.insert(PARAMS_KEY.to_string(), params);
        map.insert(CONTEXT_KEY.to_string(), context);
        self.scope = Value::Object(map);
    }

    fn replace_data(&mut self, data: Value, context: Option<Value>) {
        let context = context.unwrap_or_else(|| Value::Object(Map::new()));
        self.reset_scope(data, context);
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Replace data and context, then run evaluations
    ///
    /// With `paths`, only evaluations under those schema paths run and the
    /// rest of the evaluated schema is kept.
    pub fn evaluate(
        &mut self,
        data: &str,
        context: Option<&str>,
        paths: Option<&[String]>,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        let data = parse_json(data)?;
        let context = parse_optional(context)?;
        self.replace_data(data, context);
        self.evaluate_internal(paths, token)
    }

    /// Re-run evaluations against the current data
    pub fn reevaluate(&mut self, token: Option<&CancellationToken>) -> Result<()> {
        self.evaluate_internal(None, token)
    }

    pub(crate) fn evaluate_internal(
        &mut self,
        paths: Option<&[String]>,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        let parsed = Arc::clone(&self.parsed);
        let filters: Option<Vec<String>> = paths.map(|ps| {
            ps.iter()
                .map(|p| path::resolve_schema_pointer(&parsed.schema, p))
                .collect()
        });
        if filters.is_none() {
            self.evaluated_schema = parsed.schema.clone();
        }

        for key in &parsed.sorted_evaluations {
            if let Some(t) = token {
                t.check()?;
            }
            if let Some(fs) = &filters {
                if !fs.iter().any(|f| path::overlaps(key, f)) {
                    continue;
                }
            }
            self.run_evaluation(&parsed, key)?;
        }
        debug!(evaluations = parsed.sorted_evaluations.len(), "evaluated schema");
        Ok(())
    }

    fn run_evaluation(&mut self, parsed: &ParsedSchema, key: &str) -> Result<()> {
        let Some(ev) = parsed.evaluations.get(key) else {
            return Ok(());
        };

        let cacheable = self.eval_cache.is_enabled() && ev.is_cacheable();
        let hash = if cacheable {
            EvalCache::input_hash(&ev.deps, &self.scope)
        } else {
            0
        };
        let cached = if cacheable { self.eval_cache.get(key, hash) } else { None };
        let value = match cached {
            Some(v) => v,
            None => {
                let v = match &ev.kind {
                    EvaluationKind::Logic(logic) => logic.evaluate(&self.scope, &self.env),
                    EvaluationKind::Table(plan) => {
                        let own = ev.produces.as_deref().unwrap_or_default();
                        table::evaluate_table(plan, own, &ev.deps, &self.scope, &self.evaluated_schema, &self.env)
                    }
                }
                .map_err(|e| EvalError::Logic(format!("{} ({})", e, key)))?;
                if cacheable {
                    self.eval_cache.put(key, hash, v.clone());
                }
                v
            }
        };

        if let Some(target) = &ev.produces {
            path::set_or_warn(&mut self.scope, target, value.clone());
        }
        path::set_or_warn(&mut self.evaluated_schema, key, value);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Schema reload
    // ------------------------------------------------------------------------

    /// Swap in a new schema, keeping cache and timezone settings
    pub fn reload_schema(&mut self, schema: &str, context: Option<&str>, data: Option<&str>) -> Result<()> {
        let parsed = ParsedSchema::parse(schema)?;
        self.reload_parsed(Arc::new(parsed), context, data)
    }

    /// Swap in a new MessagePack schema
    pub fn reload_schema_msgpack(&mut self, schema: &[u8], context: Option<&str>, data: Option<&str>) -> Result<()> {
        let parsed = ParsedSchema::parse_msgpack(schema)?;
        self.reload_parsed(Arc::new(parsed), context, data)
    }

    /// Swap in a schema from the global parsed-schema cache
    pub fn reload_schema_from_cache(&mut self, key: &str, context: Option<&str>, data: Option<&str>) -> Result<()> {
        let parsed = ParsedSchemaCache::global().require(key)?;
        self.reload_parsed(parsed, context, data)
    }

    /// Swap in a schema from `cache`
    pub fn reload_schema_from_cache_in(
        &mut self,
        cache: &ParsedSchemaCache,
        key: &str,
        context: Option<&str>,
        data: Option<&str>,
    ) -> Result<()> {
        let parsed = cache.require(key)?;
        self.reload_parsed(parsed, context, data)
    }

    fn reload_parsed(&mut self, parsed: Arc<ParsedSchema>, context: Option<&str>, data: Option<&str>) -> Result<()> {
        let context = parse_optional(context)?.unwrap_or_else(|| Value::Object(Map::new()));
        let data = parse_optional(data)?.unwrap_or_else(|| Value::Object(Map::new()));
        let mut subforms = Self::build_subforms(&parsed)?;
        for sub in subforms.values_mut() {
            sub.env = self.env;
            if !self.eval_cache.is_enabled() {
                sub.eval_cache.disable();
            }
        }
        self.evaluated_schema = parsed.schema.clone();
        self.parsed = parsed;
        self.subforms = subforms;
        self.eval_cache.clear();
        self.reset_scope(data, context);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Compiled logic
    // ------------------------------------------------------------------------

    /// Compile an expression into the process-wide logic store
    pub fn compile_logic(&self, logic_json: &str) -> Result<u64> {
        let expr = parse_json(logic_json)?;
        CompiledLogicStore::global().compile(&expr)
    }

    /// Run stored logic; omitted data or context default to the current ones
    pub fn run_logic(&self, id: u64, data: Option<&str>, context: Option<&str>) -> Result<Value> {
        let logic = CompiledLogicStore::global().get(id)?;
        let scope = self.logic_scope(data, context)?;
        logic.evaluate(&scope, &self.env)
    }

    /// Compile and run in one step without storing the expression
    pub fn compile_and_run_logic(&self, logic_json: &str, data: Option<&str>, context: Option<&str>) -> Result<Value> {
        let expr = parse_json(logic_json)?;
        let logic = logic::compile(&expr)?;
        let scope = self.logic_scope(data, context)?;
        logic.evaluate(&scope, &self.env)
    }

    fn logic_scope(&self, data: Option<&str>, context: Option<&str>) -> Result<Value> {
        let mut scope = match parse_optional(data)? {
            Some(Value::Object(map)) => Value::Object(map),
            Some(_) => Value::Object(Map::new()),
            None => self.scope.clone(),
        };
        if let Value::Object(map) = &mut scope {
            if !map.contains_key(PARAMS_KEY) {
                let params = self.scope.get(PARAMS_KEY).cloned().unwrap_or(Value::Null);
                map.insert(PARAMS_KEY.to_string(), params);
            }
            match parse_optional(context)? {
                Some(ctx) => {
                    map.insert(CONTEXT_KEY.to_string(), ctx);
                }
                None if !map.contains_key(CONTEXT_KEY) => {
                    map.insert(CONTEXT_KEY.to_string(), self.context().clone());
                }
                None => {}
            }
        }
        Ok(scope)
    }

    // ------------------------------------------------------------------------
    // Cache and settings
    // ------------------------------------------------------------------------

    /// Evaluation cache counters
    pub fn cache_stats(&self) -> EvalCacheStats {
        self.eval_cache.stats()
    }

    /// Drop cached evaluation results
    pub fn clear_cache(&mut self) {
        self.eval_cache.clear();
        for sub in self.subforms.values_mut() {
            sub.clear_cache();
        }
    }

    /// Number of cached evaluation results
    pub fn cache_len(&self) -> usize {
        self.eval_cache.len()
    }

    /// Turn the evaluation cache on
    pub fn enable_cache(&mut self) {
        self.eval_cache.enable();
        for sub in self.subforms.values_mut() {
            sub.enable_cache();
        }
    }

    /// Turn the evaluation cache off
    pub fn disable_cache(&mut self) {
        self.eval_cache.disable();
        for sub in self.subforms.values_mut() {
            sub.disable_cache();
        }
    }

    /// True if the evaluation cache is active
    pub fn is_cache_enabled(&self) -> bool {
        self.eval_cache.is_enabled()
    }

    /// Set the offset (minutes east of UTC) used by `today`/`now`
    ///
    /// `None` resets to UTC.
    pub fn set_timezone_offset(&mut self, minutes: Option<i32>) {
        self.env.timezone_offset = minutes;
        for sub in self.subforms.values_mut() {
            sub.set_timezone_offset(minutes);
        }
    }

    /// Current timezone offset
    pub fn timezone_offset(&self) -> Option<i32> {
        self.env.timezone_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ORDER_SCHEMA: &str = r#"{
        "type": "object",
        "$params": {"taxRate": 0.1},
        "properties": {
            "price": {"type": "number"},
            "qty": {"type": "number"},
            "subtotal": {"type": "number", "value": {"$evaluation": {"*": [{"var": "price"}, {"var": "qty"}]}}},
            "tax": {"type": "number", "value": {"$evaluation": {"*": [{"var": "subtotal"}, {"var": "$params.taxRate"}]}}},
            "total": {"type": "number", "value": {"$evaluation": {"+": [{"var": "subtotal"}, {"var": "tax"}]}}}
        }
    }"#;

    #[test]
    fn test_evaluate_writes_schema_and_data() {
        let mut eval = JsonEval::new(ORDER_SCHEMA, None, None).unwrap();
        eval.evaluate(r#"{"price": 10, "qty": 3}"#, None, None, None).unwrap();
        let schema = eval.get_evaluated_schema(true);
        assert_eq!(schema["properties"]["subtotal"]["value"], json!(30));
        assert_eq!(schema["properties"]["total"]["value"], json!(33));
        assert_eq!(eval.data()["total"], json!(33));
        assert!(eval.data().get("$params").is_none());
    }

    #[test]
    fn test_cache_hits_on_unchanged_inputs() {
        let mut eval = JsonEval::new(ORDER_SCHEMA, None, None).unwrap();
        eval.evaluate(r#"{"price": 10, "qty": 3}"#, None, None, None).unwrap();
        assert_eq!(eval.cache_stats().hits, 0);
        eval.evaluate(r#"{"price": 10, "qty": 3}"#, None, None, None).unwrap();
        assert_eq!(eval.cache_stats().hits, 3);
        assert_eq!(eval.cache_len(), 3);

        eval.disable_cache();
        assert!(!eval.is_cache_enabled());
        eval.evaluate(r#"{"price": 1, "qty": 1}"#, None, None, None).unwrap();
        assert_eq!(eval.data()["total"], json!(1.1));
    }

    #[test]
    fn test_cancelled_token_stops_evaluation() {
        let mut eval = JsonEval::new(ORDER_SCHEMA, None, None).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = eval.evaluate("{}", None, None, Some(&token)).unwrap_err();
        assert_eq!(err, EvalError::Cancelled);
    }

    #[test]
    fn test_run_logic_defaults_to_current_data() {
        let mut eval = JsonEval::new(ORDER_SCHEMA, Some(r#"{"user": "ann"}"#), None).unwrap();
        eval.evaluate(r#"{"price": 2, "qty": 2}"#, Some(r#"{"user": "bob"}"#), None, None)
            .unwrap();
        let id = eval.compile_logic(r#"{"cat": [{"var": "$context.user"}, ":", {"var": "subtotal"}]}"#)
            .unwrap();
        assert_eq!(eval.run_logic(id, None, None).unwrap(), json!("bob:4"));
        assert_eq!(
            eval.run_logic(id, Some(r#"{"subtotal": 9}"#), Some(r#"{"user": "cy"}"#)).unwrap(),
            json!("cy:9")
        );
    }

    #[test]
    fn test_reload_schema_resets_state() {
        let mut eval = JsonEval::new(ORDER_SCHEMA, None, None).unwrap();
        eval.set_timezone_offset(Some(60));
        eval.reload_schema(r#"{"type": "object", "properties": {"a": {"type": "string"}}}"#, None, Some(r#"{"a": "x"}"#))
            .unwrap();
        assert_eq!(eval.data(), json!({"a": "x"}));
        assert_eq!(eval.timezone_offset(), Some(60));
        assert!(eval.parsed_schema().sorted_evaluations().is_empty());
    }

    #[test]
    fn test_missing_cache_key_fails_fast() {
        let cache = ParsedSchemaCache::new();
        let err = JsonEval::new_from_cache_in(&cache, "nope", None, None).unwrap_err();
        assert_eq!(err, EvalError::CacheMiss("nope".into()));
    }
}
