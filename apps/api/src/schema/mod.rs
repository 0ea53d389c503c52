//! Schema Validator: input/output contracts for every flow.
//!
//! Input schemas validate the raw JSON a caller sends and collect every
//! violation before anything is rendered or sent to the model. Output schemas
//! check the model's structured answer (see `output`).

pub mod data_uri;
pub mod output;

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub use data_uri::DataUri;
pub use output::{OutputField, OutputMismatch, OutputSchema, StructuredOutput};

/// Field name used for violations that concern the input as a whole.
pub const ROOT_FIELD: &str = "$";

// ────────────────────────────────────────────────────────────────────────────
// Definitions
// ────────────────────────────────────────────────────────────────────────────

/// A validation predicate attached to a string field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Constraint {
    /// Present and not blank.
    Required,
    /// At least `n` characters (Unicode scalar values).
    MinLength(usize),
    /// Well-formed absolute URI with one of the given schemes.
    Url { schemes: Vec<String> },
    /// `data:<type>/<subtype>[;param=value]*;base64,<payload>`.
    DataUri,
}

/// A named string field in an input schema.
#[derive(Debug, Clone, Serialize)]
pub struct InputField {
    pub name: String,
    pub description: String,
    pub constraints: Vec<Constraint>,
}

impl InputField {
    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            constraints: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.constraints.push(Constraint::Required);
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.constraints.push(Constraint::MinLength(n));
        self
    }

    pub fn url(mut self, schemes: &[&str]) -> Self {
        self.constraints.push(Constraint::Url {
            schemes: schemes.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn data_uri(mut self) -> Self {
        self.constraints.push(Constraint::DataUri);
        self
    }

    pub fn is_data_uri(&self) -> bool {
        self.constraints.contains(&Constraint::DataUri)
    }

    pub fn is_required(&self) -> bool {
        self.constraints.contains(&Constraint::Required)
    }
}

/// Ordered set of input fields for one flow.
#[derive(Debug, Clone, Serialize)]
pub struct InputSchema {
    pub fields: Vec<InputField>,
}

impl InputSchema {
    pub fn new(fields: Vec<InputField>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&InputField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validates `raw` against the schema.
    ///
    /// Every field is checked against every constraint; the error lists all of
    /// them so a caller can report the whole set at once. Keys that are not
    /// declared in the schema are ignored and dropped.
    pub fn validate(&self, raw: &Value) -> Result<ValidatedValues, ValidationError> {
        let Some(object) = raw.as_object() else {
            return Err(ValidationError::single(
                ROOT_FIELD,
                "input must be a JSON object",
            ));
        };

        let mut violations = Vec::new();
        let mut values = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.is_required() {
                        violations.push(FieldViolation::new(&field.name, "is required"));
                    }
                }
                Some(Value::String(s)) => {
                    let before = violations.len();
                    for constraint in &field.constraints {
                        if let Err(reason) = check_constraint(constraint, s) {
                            violations.push(FieldViolation::new(&field.name, reason));
                        }
                    }
                    if violations.len() == before {
                        values.push((field.name.clone(), s.clone()));
                    }
                }
                Some(_) => violations.push(FieldViolation::new(&field.name, "must be a string")),
            }
        }

        if violations.is_empty() {
            Ok(ValidatedValues { values })
        } else {
            Err(ValidationError { violations })
        }
    }
}

fn check_constraint(constraint: &Constraint, value: &str) -> Result<(), String> {
    match constraint {
        Constraint::Required => {
            if value.trim().is_empty() {
                Err("is required".to_string())
            } else {
                Ok(())
            }
        }
        Constraint::MinLength(n) => {
            if value.chars().count() < *n {
                Err(format!("must be at least {n} characters long"))
            } else {
                Ok(())
            }
        }
        Constraint::Url { schemes } => {
            let url = Url::parse(value).map_err(|e| format!("must be a valid URL ({e})"))?;
            if url.cannot_be_a_base() || !schemes.iter().any(|s| s == url.scheme()) {
                return Err(format!(
                    "must be an absolute URL using one of: {}",
                    schemes.join(", ")
                ));
            }
            Ok(())
        }
        Constraint::DataUri => DataUri::parse(value)
            .map(|_| ())
            .map_err(|e| format!("must be a data URI with a MIME type and base64 payload ({e})")),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

/// Input values that passed validation, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedValues {
    values: Vec<(String, String)>,
}

impl ValidatedValues {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl Serialize for ValidatedValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.values.iter().map(|(k, v)| (k, v)))
    }
}

/// One failed check on one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Every violation found while validating one input.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    fn single(field: &str, reason: &str) -> Self {
        Self {
            violations: vec![FieldViolation::new(field, reason)],
        }
    }

    /// Violated field names, deduplicated, in the order they were found.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for v in &self.violations {
            if !fields.contains(&v.field.as_str()) {
                fields.push(&v.field);
            }
        }
        fields
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid input: ")?;
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} {}", v.field, v.reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code_schema() -> InputSchema {
        InputSchema::new(vec![
            InputField::string("githubRepoUrl", "repo")
                .required()
                .url(&["http", "https"]),
            InputField::string("prompt", "request").required().min_length(10),
        ])
    }

    #[test]
    fn test_valid_input_passes() {
        let values = code_schema()
            .validate(&json!({
                "githubRepoUrl": "https://github.com/acme/widgets",
                "prompt": "a function that reverses a string"
            }))
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values.get("githubRepoUrl"), Some("https://github.com/acme/widgets"));
    }

    #[test]
    fn test_bad_scheme_and_short_prompt_are_both_reported() {
        let err = code_schema()
            .validate(&json!({"githubRepoUrl": "ftp://bad", "prompt": "hi"}))
            .unwrap_err();
        assert_eq!(err.fields(), vec!["githubRepoUrl", "prompt"]);
    }

    #[test]
    fn test_not_a_url() {
        let err = code_schema()
            .validate(&json!({"githubRepoUrl": "not-a-url", "prompt": "a long enough prompt"}))
            .unwrap_err();
        assert_eq!(err.fields(), vec!["githubRepoUrl"]);
        assert!(err.violations[0].reason.contains("valid URL"));
    }

    #[test]
    fn test_missing_fields_are_required() {
        let err = code_schema().validate(&json!({})).unwrap_err();
        assert_eq!(err.violations.len(), 2);
        assert!(err.violations.iter().all(|v| v.reason == "is required"));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = code_schema()
            .validate(&json!({"githubRepoUrl": null, "prompt": "a long enough prompt"}))
            .unwrap_err();
        assert_eq!(err.fields(), vec!["githubRepoUrl"]);
    }

    #[test]
    fn test_blank_prompt_reports_every_failed_constraint() {
        let err = code_schema()
            .validate(&json!({"githubRepoUrl": "https://github.com/a/b", "prompt": "   "}))
            .unwrap_err();
        assert_eq!(err.violations.len(), 2);
        assert_eq!(err.fields(), vec!["prompt"]);
    }

    #[test]
    fn test_non_string_value() {
        let err = code_schema()
            .validate(&json!({"githubRepoUrl": 42, "prompt": "a long enough prompt"}))
            .unwrap_err();
        assert_eq!(err.violations[0].reason, "must be a string");
    }

    #[test]
    fn test_non_object_input() {
        let err = code_schema().validate(&json!(["x"])).unwrap_err();
        assert_eq!(err.fields(), vec![ROOT_FIELD]);
    }

    #[test]
    fn test_unknown_keys_are_dropped() {
        let values = code_schema()
            .validate(&json!({
                "githubRepoUrl": "https://github.com/a/b",
                "prompt": "a long enough prompt",
                "extra": true
            }))
            .unwrap();
        assert_eq!(values.get("extra"), None);
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_min_length_counts_chars_not_bytes() {
        let schema = InputSchema::new(vec![InputField::string("p", "").min_length(3)]);
        assert!(schema.validate(&json!({"p": "ééé"})).is_ok());
    }

    #[test]
    fn test_data_uri_constraint() {
        let schema = InputSchema::new(vec![InputField::string("voiceQuery", "")
            .required()
            .data_uri()]);
        assert!(schema
            .validate(&json!({"voiceQuery": "data:audio/webm;base64,GkXfow=="}))
            .is_ok());
        let err = schema
            .validate(&json!({"voiceQuery": "not-a-data-uri"}))
            .unwrap_err();
        assert_eq!(err.fields(), vec!["voiceQuery"]);
    }

    #[test]
    fn test_display_lists_all_violations() {
        let err = code_schema()
            .validate(&json!({"githubRepoUrl": "ftp://bad", "prompt": "hi"}))
            .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("invalid input: githubRepoUrl"));
        assert!(text.contains("; prompt must be at least 10 characters long"));
    }
}
