//! Schema validation with detailed error reporting
//!
//! Gates every loaded document before object construction: a document that
//! fails the gate never reaches the builder, so builder code can assume the
//! top-level shape holds.

use jsonschema::{validator_for, ValidationError as JsonSchemaError, Validator as JsonValidator};
use miette::{Diagnostic, NamedSource, SourceSpan};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use crate::core::loader::Document;
use crate::yaml::{find_key_span, first_line_span};

/// Validation error with source location information
#[derive(Debug, Error, Diagnostic)]
#[error("schema validation failed for '{file_name}': {summary}")]
#[diagnostic(code(tmkit::schema::validation_error))]
pub struct ValidationError {
    file_name: String,
    summary: String,

    #[source_code]
    src: NamedSource<String>,

    #[related]
    violations: Vec<SchemaViolation>,
}

/// A single schema violation
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
pub struct SchemaViolation {
    #[label("{}", self.hint)]
    span: SourceSpan,

    message: String,
    hint: String,

    #[help]
    help: Option<String>,
}

impl SchemaViolation {
    pub fn new(message: String, hint: String, span: SourceSpan, help: Option<String>) -> Self {
        Self {
            span,
            message,
            hint,
            help,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ValidationError {
    pub fn new(file_name: &str, source: &str, violations: Vec<SchemaViolation>) -> Self {
        let count = violations.len();
        let summary = if count == 1 {
            "1 error".to_string()
        } else {
            format!("{} errors", count)
        };
        Self {
            file_name: file_name.to_string(),
            summary,
            src: NamedSource::new(file_name, source.to_string()),
            violations,
        }
    }

    /// Get the number of violations
    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }

    pub fn violations(&self) -> &[SchemaViolation] {
        &self.violations
    }
}

/// The top-level shape of a threat model document.
///
/// Collection entries are checked in depth by the builder, which can produce
/// richer errors than a schema can; the gate only pins down the keys the
/// loader and builder dereference unconditionally.
fn document_schema() -> JsonValue {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["ID", "scope", "analysis"],
        "properties": {
            "ID": {
                "type": "string",
                "pattern": "^[A-Za-z0-9_]*$"
            },
            "title": { "type": "string" },
            "analysis": { "type": "string" },
            "scope": { "type": "object" },
            "threats": {
                "type": ["array", "null"],
                "items": { "type": "object" }
            },
            "children": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["ID"],
                    "properties": { "ID": { "type": "string" } }
                }
            }
        },
        "additionalProperties": true
    })
}

/// Validator for threat model documents, compiled once and reused for every
/// document in the forest.
pub struct DocumentValidator {
    compiled: JsonValidator,
}

impl DocumentValidator {
    pub fn new() -> Self {
        let schema = document_schema();
        let compiled = validator_for(&schema).expect("embedded document schema must compile");
        Self { compiled }
    }

    /// Validate one document, collecting every violation.
    pub fn validate(&self, doc: &Document) -> Result<(), ValidationError> {
        let json_value: JsonValue = match serde_json::to_value(&doc.mapping) {
            Ok(v) => v,
            Err(e) => {
                let violation = SchemaViolation::new(
                    format!("failed to convert YAML to JSON: {}", e),
                    "conversion error".to_string(),
                    first_line_span(&doc.text),
                    None,
                );
                return Err(ValidationError::new(&doc.file_name, &doc.text, vec![violation]));
            }
        };

        let violations: Vec<SchemaViolation> = self
            .compiled
            .iter_errors(&json_value)
            .map(|e| error_to_violation(&doc.text, &e))
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(&doc.file_name, &doc.text, violations))
        }
    }

    /// Validate a document and, recursively, all of its children.
    pub fn validate_tree(&self, doc: &Document) -> Result<(), ValidationError> {
        self.validate(doc)?;
        for child in &doc.children {
            self.validate_tree(child)?;
        }
        Ok(())
    }
}

impl Default for DocumentValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a JSON Schema validation error to our violation format
fn error_to_violation(content: &str, error: &JsonSchemaError) -> SchemaViolation {
    let path = error.instance_path.to_string();
    let message = format_schema_error(error);
    let hint = format_error_hint(error);
    let help = generate_help_message(error);

    let span = find_path_span(content, &path, error);

    SchemaViolation::new(message, hint, span, help)
}

/// Format a JSON Schema error into a user-friendly message
fn format_schema_error(error: &JsonSchemaError) -> String {
    let path = if error.instance_path.as_str().is_empty() {
        "document root".to_string()
    } else {
        format!("'{}'", error.instance_path)
    };

    match &error.kind {
        jsonschema::error::ValidationErrorKind::Required { property } => {
            let prop_str = property
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| property.to_string());
            format!("missing required field: {} at {}", prop_str, path)
        }
        jsonschema::error::ValidationErrorKind::Type { kind } => {
            format!("wrong type at {}: expected {:?}", path, kind)
        }
        jsonschema::error::ValidationErrorKind::Pattern { pattern } => {
            format!("value at {} doesn't match pattern: {}", path, pattern)
        }
        _ => {
            format!("validation error at {}: {}", path, error)
        }
    }
}

/// Generate a short hint for the error label
fn format_error_hint(error: &JsonSchemaError) -> String {
    match &error.kind {
        jsonschema::error::ValidationErrorKind::Required { .. } => {
            "required field missing".to_string()
        }
        jsonschema::error::ValidationErrorKind::Type { .. } => "wrong type".to_string(),
        jsonschema::error::ValidationErrorKind::Pattern { .. } => "pattern mismatch".to_string(),
        _ => "validation error".to_string(),
    }
}

/// Generate a help message with suggestions for fixing the error
fn generate_help_message(error: &JsonSchemaError) -> Option<String> {
    match &error.kind {
        jsonschema::error::ValidationErrorKind::Required { property } => {
            let prop_str = property
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| property.to_string());
            Some(format!("Add the '{}' field to your document", prop_str))
        }
        jsonschema::error::ValidationErrorKind::Pattern { pattern } => {
            if pattern.contains("A-Za-z0-9_") {
                Some("IDs may only contain letters, digits, and underscores".to_string())
            } else {
                None
            }
        }
        jsonschema::error::ValidationErrorKind::Type { kind } => {
            Some(format!("Expected value of type: {:?}", kind))
        }
        _ => None,
    }
}

/// Find the span for a JSON path in YAML content
fn find_path_span(content: &str, json_path: &str, error: &JsonSchemaError) -> SourceSpan {
    let parts: Vec<&str> = json_path.split('/').filter(|s| !s.is_empty()).collect();

    if parts.is_empty() {
        // Errors at the root are usually missing-field errors; point at the
        // field's future sibling if we know its name, otherwise line one.
        if let jsonschema::error::ValidationErrorKind::Required { property } = &error.kind {
            if let Some(name) = property.as_str() {
                if let Some(span) = find_key_span(content, name) {
                    return span;
                }
            }
        }
        return first_line_span(content);
    }

    // Look for the last non-index path component in the YAML
    let search_key = parts
        .iter()
        .rev()
        .find(|p| p.parse::<usize>().is_err())
        .unwrap_or(&"");

    if let Some(span) = find_key_span(content, search_key) {
        return span;
    }

    first_line_span(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn doc_from(text: &str) -> Document {
        let mapping = match serde_yml::from_str(text).unwrap() {
            serde_yml::Value::Mapping(m) => m,
            other => panic!("fixture must be a mapping, got {other:?}"),
        };
        Document {
            path: PathBuf::from("test.yaml"),
            file_name: "test.yaml".to_string(),
            text: text.to_string(),
            mapping,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_valid_document() {
        let validator = DocumentValidator::new();
        let doc = doc_from(
            "ID: Root\n\
             title: Example\n\
             analysis: Some analysis text\n\
             scope:\n  description: everything\n\
             threats:\n  - ID: T1\n    threatType: Spoofing\n",
        );
        assert!(validator.validate(&doc).is_ok());
    }

    #[test]
    fn test_missing_id() {
        let validator = DocumentValidator::new();
        let doc = doc_from("title: Example\nanalysis: text\nscope: {}\n");
        let err = validator.validate(&doc).unwrap_err();
        assert!(err.violation_count() >= 1);
        assert!(err
            .violations()
            .iter()
            .any(|v| v.message().contains("ID")));
    }

    #[test]
    fn test_id_pattern() {
        let validator = DocumentValidator::new();
        let doc = doc_from("ID: \"bad id!\"\nanalysis: text\nscope: {}\n");
        let err = validator.validate(&doc).unwrap_err();
        assert!(err
            .violations()
            .iter()
            .any(|v| v.message().contains("pattern")));
    }

    #[test]
    fn test_null_threats_allowed() {
        let validator = DocumentValidator::new();
        let doc = doc_from("ID: Root\nanalysis: text\nscope: {}\nthreats:\n");
        assert!(validator.validate(&doc).is_ok());
    }

    #[test]
    fn test_children_entries_need_id() {
        let validator = DocumentValidator::new();
        let doc = doc_from(
            "ID: Root\nanalysis: text\nscope: {}\nchildren:\n  - title: nope\n",
        );
        assert!(validator.validate(&doc).is_err());
    }

    #[test]
    fn test_unknown_top_level_keys_pass() {
        let validator = DocumentValidator::new();
        let doc = doc_from("ID: Root\nanalysis: text\nscope: {}\ncustomField: kept\n");
        assert!(validator.validate(&doc).is_ok());
    }
}
