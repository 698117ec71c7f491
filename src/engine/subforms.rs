//! Subform instances
//!
//! Every array field with `items` gets its own [`JsonEval`], built from the
//! subform's parsed schema. Subform instances keep their own data, context
//! and evaluation cache, so evaluating one never touches another or the root.

use super::{JsonEval, ValidationResult};
use crate::cancel::CancellationToken;
use crate::error::{EvalError, Result};
use crate::path::ReturnFormat;
use serde_json::Value;

impl JsonEval {
    fn subform_key(&self, subform_path: &str) -> Result<String> {
        self.parsed
            .find_subform(subform_path)
            .map(|(key, _)| key.to_string())
            .ok_or_else(|| EvalError::SubformNotFound(subform_path.to_string()))
    }

    /// Subform instance addressed by `#/riders`, `riders` or `#/properties/riders`
    pub fn subform(&self, subform_path: &str) -> Result<&JsonEval> {
        let key = self.subform_key(subform_path)?;
        self.subforms
            .get(&key)
            .ok_or_else(|| EvalError::SubformNotFound(subform_path.to_string()))
    }

    /// Mutable subform instance
    pub fn subform_mut(&mut self, subform_path: &str) -> Result<&mut JsonEval> {
        let key = self.subform_key(subform_path)?;
        self.subforms
            .get_mut(&key)
            .ok_or_else(|| EvalError::SubformNotFound(subform_path.to_string()))
    }

    /// True if `subform_path` names a subform
    pub fn has_subform(&self, subform_path: &str) -> bool {
        self.parsed.find_subform(subform_path).is_some()
    }

    /// Schema pointers of all subforms, in declaration order
    pub fn get_subform_paths(&self) -> Vec<String> {
        self.subforms.keys().cloned().collect()
    }

    /// [`JsonEval::evaluate`] on one subform
    pub fn evaluate_subform(
        &mut self,
        subform_path: &str,
        data: &str,
        context: Option<&str>,
        paths: Option<&[String]>,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        self.subform_mut(subform_path)?.evaluate(data, context, paths, token)
    }

    /// [`JsonEval::validate`] on one subform
    pub fn validate_subform(
        &mut self,
        subform_path: &str,
        data: &str,
        context: Option<&str>,
        paths: Option<&[String]>,
        token: Option<&CancellationToken>,
    ) -> Result<ValidationResult> {
        self.subform_mut(subform_path)?.validate(data, context, paths, token)
    }

    /// [`JsonEval::evaluate_dependents`] on one subform
    pub fn evaluate_dependents_subform(
        &mut self,
        subform_path: &str,
        changed_paths: &[String],
        data: Option<&str>,
        context: Option<&str>,
        re_evaluate: bool,
        token: Option<&CancellationToken>,
    ) -> Result<Value> {
        self.subform_mut(subform_path)?
            .evaluate_dependents(changed_paths, data, context, re_evaluate, token)
    }

    /// [`JsonEval::resolve_layout`] on one subform
    pub fn resolve_layout_subform(
        &mut self,
        subform_path: &str,
        evaluate: bool,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        self.subform_mut(subform_path)?.resolve_layout(evaluate, token)
    }

    /// Evaluated schema of one subform
    pub fn get_evaluated_schema_subform(&mut self, subform_path: &str, skip_layout: bool) -> Result<Value> {
        Ok(self.subform_mut(subform_path)?.get_evaluated_schema(skip_layout))
    }

    /// Evaluated schema of one subform without `$params`
    pub fn get_evaluated_schema_without_params_subform(
        &mut self,
        subform_path: &str,
        skip_layout: bool,
    ) -> Result<Value> {
        Ok(self
            .subform_mut(subform_path)?
            .get_evaluated_schema_without_params(skip_layout))
    }

    /// One node of a subform's evaluated schema
    pub fn get_evaluated_schema_by_path_subform(
        &mut self,
        subform_path: &str,
        path: &str,
        skip_layout: bool,
    ) -> Result<Option<Value>> {
        Ok(self
            .subform_mut(subform_path)?
            .get_evaluated_schema_by_path(path, skip_layout))
    }

    /// Several nodes of a subform's evaluated schema
    pub fn get_evaluated_schema_by_paths_subform(
        &mut self,
        subform_path: &str,
        paths: &[String],
        skip_layout: bool,
        format: ReturnFormat,
    ) -> Result<Value> {
        Ok(self
            .subform_mut(subform_path)?
            .get_evaluated_schema_by_paths(paths, skip_layout, format))
    }

    /// Field values of one subform
    pub fn get_schema_value_subform(&self, subform_path: &str) -> Result<Value> {
        Ok(self.subform(subform_path)?.get_schema_value())
    }

    /// One node of a subform's schema as supplied
    pub fn get_schema_by_path_subform(&self, subform_path: &str, path: &str) -> Result<Option<Value>> {
        Ok(self.subform(subform_path)?.get_schema_by_path(path))
    }

    /// Several nodes of a subform's schema as supplied
    pub fn get_schema_by_paths_subform(
        &self,
        subform_path: &str,
        paths: &[String],
        format: ReturnFormat,
    ) -> Result<Value> {
        Ok(self.subform(subform_path)?.get_schema_by_paths(paths, format))
    }
}
