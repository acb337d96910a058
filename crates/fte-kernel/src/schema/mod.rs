//! Parameter schemas
//!
//! A [`ParameterSchema`] is a JSON Schema (draft 7) document describing the
//! context a version expects. It is compiled once at registration
//! ([`ParameterSchema::compile`]) and the compiled validator checks every
//! request, rendered as JSON, before execution.
//!
//! Draft 7 rules apply as written: `required` only asks that a key be
//! present, so an explicit `null` satisfies it. Give the property a `type`
//! to reject `null`.

use fte_context::Context;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, ValidationError, Validator};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;

/// JSON Schema document for a version's context
///
/// The default, `{}`, admits every context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema(serde_json::Value);

impl Default for ParameterSchema {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

impl ParameterSchema {
    #[must_use]
    pub fn new(document: serde_json::Value) -> Self {
        Self(document)
    }

    #[must_use]
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Whether the schema places no constraint at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(&self.0, serde_json::Value::Object(m) if m.is_empty())
            || self.0 == serde_json::Value::Bool(true)
    }

    /// Check the document against the draft 7 meta-schema and build a
    /// validator with format assertions enabled
    ///
    /// # Errors
    /// [`EngineError::InvalidSchema`] for a document that is not a valid
    /// schema, including patterns that do not compile.
    pub fn compile(&self) -> Result<CompiledSchema, EngineError> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft7)
            .should_validate_formats(true)
            .build(&self.0)
            .map_err(|e| EngineError::InvalidSchema(e.to_string()))?;
        Ok(CompiledSchema {
            validator,
            document: self.0.clone(),
        })
    }

    /// # Errors
    /// As [`ParameterSchema::compile`].
    pub fn check(&self) -> Result<(), EngineError> {
        self.compile().map(|_| ())
    }
}

/// Schema ready to validate contexts
pub struct CompiledSchema {
    validator: Validator,
    document: serde_json::Value,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    #[must_use]
    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }

    /// Check a context
    ///
    /// # Errors
    /// [`EngineError::SchemaViolation`] naming the first offending field as a
    /// dotted path (`range.0`); the reason is the validator's message.
    pub fn validate(&self, context: &Context) -> Result<(), EngineError> {
        let instance = context.to_json();
        let result = match self.validator.iter_errors(&instance).next() {
            None => Ok(()),
            Some(error) => Err(EngineError::schema_violation(
                violation_field(&error),
                error.to_string(),
            )),
        };
        result
    }
}

fn violation_field(error: &ValidationError<'_>) -> String {
    let pointer = error.instance_path.to_string();
    let mut segments: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect();
    match &error.kind {
        ValidationErrorKind::Required { property } => {
            segments.push(property.as_str().map_or_else(|| property.to_string(), str::to_string));
        }
        ValidationErrorKind::AdditionalProperties { unexpected } => {
            if let Some(key) = unexpected.first() {
                segments.push(key.clone());
            }
        }
        _ => {}
    }
    segments.join(".")
}
