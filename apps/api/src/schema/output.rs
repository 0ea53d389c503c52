//! Output schemas and structured-output conformance.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// A named string field the model must produce.
#[derive(Debug, Clone, Serialize)]
pub struct OutputField {
    pub name: String,
    /// Sent to the model as a hint; never checked.
    pub description: String,
}

impl OutputField {
    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSchema {
    pub fields: Vec<OutputField>,
}

#[derive(Debug, Error)]
pub enum OutputMismatch {
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("response is missing field '{0}'")]
    MissingField(String),

    #[error("response field '{0}' is not a string")]
    NotAString(String),
}

/// A model response that matched its output schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StructuredOutput(Map<String, Value>);

impl StructuredOutput {
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Converts into a flow's typed output record.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0))
    }
}

impl OutputSchema {
    pub fn new(fields: Vec<OutputField>) -> Self {
        Self { fields }
    }

    /// Parses the model's text into a `StructuredOutput`.
    ///
    /// Every declared field must be present as a string. Undeclared keys are
    /// dropped so callers only ever see the contract.
    pub fn conform(&self, text: &str) -> Result<StructuredOutput, OutputMismatch> {
        let value: Value = serde_json::from_str(strip_json_fences(text))?;
        let Value::Object(mut object) = value else {
            return Err(OutputMismatch::NotAnObject);
        };

        let mut out = Map::new();
        for field in &self.fields {
            match object.remove(&field.name) {
                None | Some(Value::Null) => {
                    return Err(OutputMismatch::MissingField(field.name.clone()))
                }
                Some(v @ Value::String(_)) => {
                    out.insert(field.name.clone(), v);
                }
                Some(_) => return Err(OutputMismatch::NotAString(field.name.clone())),
            }
        }
        Ok(StructuredOutput(out))
    }

    /// The schema in the model's `responseSchema` dialect.
    pub fn response_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    json!({ "type": "STRING", "description": f.description }),
                )
            })
            .collect();
        let names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();

        json!({
            "type": "OBJECT",
            "properties": properties,
            "required": names,
            "propertyOrdering": names,
        })
    }
}

/// Unwraps one markdown code fence, with or without a language tag, around
/// the model's JSON. Anything else is returned trimmed.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(body) = text.strip_prefix("```").and_then(|t| t.strip_suffix("```")) else {
        return text;
    };
    // Drop the info string ("json", "JSON", ...) on the opening fence line.
    match body.split_once('\n') {
        Some((tag, rest)) if !tag.trim_start().starts_with('{') => rest.trim(),
        _ => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> OutputSchema {
        OutputSchema::new(vec![OutputField::string(
            "codeSuggestion",
            "The suggested code snippet.",
        )])
    }

    #[test]
    fn test_conform_passes_through() {
        let out = schema()
            .conform(r#"{"codeSuggestion": "function reverse(s) { ... }"}"#)
            .unwrap();
        assert_eq!(out.get("codeSuggestion"), Some("function reverse(s) { ... }"));
    }

    #[test]
    fn test_conform_drops_undeclared_keys() {
        let out = schema()
            .conform(r#"{"codeSuggestion": "x", "confidence": 0.9}"#)
            .unwrap();
        assert_eq!(serde_json::to_value(&out).unwrap(), json!({"codeSuggestion": "x"}));
    }

    #[test]
    fn test_conform_missing_field() {
        let err = schema().conform(r#"{"text": "x"}"#).unwrap_err();
        assert!(matches!(err, OutputMismatch::MissingField(f) if f == "codeSuggestion"));
    }

    #[test]
    fn test_conform_wrong_type() {
        let err = schema().conform(r#"{"codeSuggestion": 7}"#).unwrap_err();
        assert!(matches!(err, OutputMismatch::NotAString(_)));
    }

    #[test]
    fn test_conform_rejects_free_text() {
        assert!(matches!(
            schema().conform("Here is your code"),
            Err(OutputMismatch::Json(_))
        ));
        assert!(matches!(
            schema().conform(r#"["x"]"#),
            Err(OutputMismatch::NotAnObject)
        ));
    }

    #[test]
    fn test_conform_accepts_fenced_json() {
        let out = schema()
            .conform("```json\n{\"codeSuggestion\": \"x\"}\n```")
            .unwrap();
        assert_eq!(out.get("codeSuggestion"), Some("x"));
    }

    #[test]
    fn test_response_schema_shape() {
        let s = schema().response_schema();
        assert_eq!(s["type"], "OBJECT");
        assert_eq!(s["properties"]["codeSuggestion"]["type"], "STRING");
        assert_eq!(s["required"], json!(["codeSuggestion"]));
    }

    #[test]
    fn test_conform_accepts_fences_without_language_tag() {
        let out = schema().conform("```\n{\"codeSuggestion\": \"y\"}\n```").unwrap();
        assert_eq!(out.get("codeSuggestion"), Some("y"));
    }

    #[test]
    fn test_conform_accepts_single_line_fence() {
        let out = schema().conform("```{\"codeSuggestion\": \"z\"}```").unwrap();
        assert_eq!(out.get("codeSuggestion"), Some("z"));
    }

    #[test]
    fn test_conform_unclosed_fence_is_not_json() {
        assert!(matches!(
            schema().conform("```json\n{\"codeSuggestion\": \"x\"}"),
            Err(OutputMismatch::Json(_))
        ));
    }
}
