//! JSON-Schema validation of request parameters.
//!
//! Failures are reported all at once in the shape
//! `{"inputValidation": "failed", "params": [{"path", "message"}]}` wrapped in
//! a 400 response.

use std::sync::Arc;

use jsonschema::{Draft, Validator};
use serde_json::{json, Value};

use super::error::ApiError;

/// Schema compiled once and shared by every request of a route.
#[derive(Clone)]
pub struct ParamSchema {
    validator: Arc<Validator>,
}

impl std::fmt::Debug for ParamSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamSchema").finish_non_exhaustive()
    }
}

impl ParamSchema {
    pub fn compile(schema: &Value) -> Result<Self, ApiError> {
        let validator = Validator::options()
            .with_draft(Draft::Draft7)
            .build(schema)
            .map_err(|e| ApiError::internal(format!("Invalid parameter schema: {}", e)))?;
        Ok(Self { validator: Arc::new(validator) })
    }

    pub fn validate(&self, params: &Value) -> Result<(), ApiError> {
        let failures: Vec<Value> = self
            .validator
            .iter_errors(params)
            .map(|e| json!({ "path": e.instance_path.to_string(), "message": e.to_string() }))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            tracing::debug!(failures = failures.len(), "Request parameters failed validation");
            Err(ApiError::Validation(json!({ "inputValidation": "failed", "params": failures })))
        }
    }
}

/// Compile `schema` and validate `params` against it.
pub fn validate_params(params: &Value, schema: &Value) -> Result<(), ApiError> {
    ParamSchema::compile(schema)?.validate(params)
}
