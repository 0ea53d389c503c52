/// LLM Client: the single point of entry for all generative-model calls.
///
/// ARCHITECTURAL RULE: No other module may call the model API directly.
/// Flows reach the model only through `ModelClient`, which the `FlowRunner`
/// receives at construction.
///
/// One request per call: no retries, no caching.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::schema::data_uri::{DataUri, DataUriError};
use crate::schema::OutputSchema;
use crate::template::{PromptPart, RenderedPrompt};

pub mod prompts;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Headroom given to the HTTP client beyond the flow timeout, so an elapsed
/// flow deadline is always reported by the flow runner and not by reqwest.
const TRANSPORT_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Finish reasons that mean the model declined to answer.
const REFUSAL_REASONS: &[&str] = &["SAFETY", "RECITATION", "BLOCKLIST", "PROHIBITED_CONTENT"];

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed (status {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("model refused to answer: {0}")]
    Refused(String),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("invalid media part: {0}")]
    InvalidMedia(#[from] DataUriError),
}

/// Everything the model needs for one structured-output call.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub prompt: &'a RenderedPrompt,
    pub output_schema: &'a OutputSchema,
}

/// The model seam. `FlowRunner` holds an `Arc<dyn ModelClient>`; tests swap
/// in a stub.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Returns the model's raw text, which should be a JSON object matching
    /// `request.output_schema`. Conformance is checked by the caller.
    async fn generate(&self, request: ModelRequest<'_>) -> Result<String, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Gemini wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    system_instruction: GeminiSystemInstruction,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiOwnedText>,
}

#[derive(Debug, Serialize)]
struct GeminiOwnedText {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// Google Gemini `generateContent` client with structured output.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    /// `flow_timeout` is the per-invocation deadline enforced by `FlowRunner`.
    pub fn new(api_key: String, endpoint: String, flow_timeout: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(transport_timeout(flow_timeout))
                .build()?,
            api_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<String, LlmError> {
        let body = build_request(&request)?;

        let response = self
            .client
            .post(self.url(request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_error(status, body);
            warn!("Model API call failed: {error}");
            return Err(error);
        }

        let text = response.text().await?;
        let parsed: GeminiResponse = serde_json::from_str(&text)?;
        extract_text(parsed)
    }
}

fn transport_timeout(flow_timeout: Duration) -> Duration {
    flow_timeout + TRANSPORT_TIMEOUT_SLACK
}

/// Maps a non-2xx response to an error. The message comes from Gemini's
/// `{"error": {"message": ...}}` body when there is one, else the raw body.
fn classify_error(status: StatusCode, body: String) -> LlmError {
    let message = serde_json::from_str::<GeminiError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth {
            status: status.as_u16(),
            message,
        },
        _ => LlmError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Builds the `generateContent` body. Media parts are checked again here so
/// a malformed data URI can never be sent, whatever the caller validated.
fn build_request<'a>(request: &ModelRequest<'a>) -> Result<GeminiRequest<'a>, LlmError> {
    let prompt: &'a RenderedPrompt = request.prompt;
    let mut parts = Vec::with_capacity(prompt.parts.len());
    for part in &prompt.parts {
        match part {
            PromptPart::Text(text) => parts.push(GeminiPart::Text {
                text: text.as_str(),
            }),
            PromptPart::Media(url) => {
                let uri = DataUri::parse(url)?;
                debug!(
                    "Attaching media part: mime_type={}, params={:?}, bytes={}",
                    uri.mime_type, uri.parameters, uri.byte_len
                );
                parts.push(GeminiPart::InlineData {
                    inline_data: GeminiBlob {
                        mime_type: uri.mime_type,
                        data: uri.payload,
                    },
                });
            }
        }
    }

    Ok(GeminiRequest {
        contents: vec![GeminiContent {
            role: "user",
            parts,
        }],
        system_instruction: GeminiSystemInstruction {
            parts: vec![GeminiOwnedText {
                text: prompts::structured_output_instruction(request.system, request.output_schema),
            }],
        },
        generation_config: GeminiGenerationConfig {
            response_mime_type: "application/json",
            response_schema: request.output_schema.response_schema(),
        },
    })
}

/// Pulls the answer text out of a response, turning blocks and empty
/// candidates into errors.
fn extract_text(response: GeminiResponse) -> Result<String, LlmError> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|f| f.block_reason)
    {
        return Err(LlmError::Refused(reason));
    }

    if let Some(usage) = &response.usage_metadata {
        debug!(
            "Model call succeeded: prompt_tokens={}, candidate_tokens={}",
            usage.prompt_token_count, usage.candidates_token_count
        );
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyContent)?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if REFUSAL_REASONS.contains(&reason) {
            return Err(LlmError::Refused(reason.to_string()));
        }
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LlmError::EmptyContent);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OutputField;
    use serde_json::json;

    fn output_schema() -> OutputSchema {
        OutputSchema::new(vec![OutputField::string(
            "textResponse",
            "The text response from the AI voice assistant.",
        )])
    }

    fn response(value: Value) -> GeminiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_build_request_with_media_part() {
        let prompt = RenderedPrompt {
            parts: vec![
                PromptPart::Text("Voice Query: ".to_string()),
                PromptPart::Media("data:audio/webm;codecs=opus;base64,GkXfow==".to_string()),
            ],
        };
        let schema = output_schema();
        let request = ModelRequest {
            model: DEFAULT_MODEL,
            system: "You are Cognova.",
            prompt: &prompt,
            output_schema: &schema,
        };

        let body = serde_json::to_value(build_request(&request).unwrap()).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(parts[0]["text"], "Voice Query: ");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "audio/webm");
        assert_eq!(parts[1]["inlineData"]["data"], "GkXfow==");
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(
            body["generationConfig"]["responseSchema"]["required"],
            json!(["textResponse"])
        );
        let system = body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert!(system.starts_with("You are Cognova."));
        assert!(system.contains("\"textResponse\""));
    }

    #[test]
    fn test_build_request_rejects_bad_media() {
        let prompt = RenderedPrompt {
            parts: vec![PromptPart::Media("not-a-data-uri".to_string())],
        };
        let schema = output_schema();
        let request = ModelRequest {
            model: DEFAULT_MODEL,
            system: "",
            prompt: &prompt,
            output_schema: &schema,
        };
        assert!(matches!(
            build_request(&request),
            Err(LlmError::InvalidMedia(_))
        ));
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let r = response(json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"textResponse\":"}, {"text": " \"hi\"}"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4}
        }));
        assert_eq!(extract_text(r).unwrap(), "{\"textResponse\": \"hi\"}");
    }

    #[test]
    fn test_extract_text_prompt_blocked() {
        let r = response(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        assert!(matches!(extract_text(r), Err(LlmError::Refused(r)) if r == "SAFETY"));
    }

    #[test]
    fn test_extract_text_safety_finish() {
        let r = response(json!({"candidates": [{"finishReason": "SAFETY"}]}));
        assert!(matches!(extract_text(r), Err(LlmError::Refused(_))));
    }

    #[test]
    fn test_extract_text_empty() {
        assert!(matches!(
            extract_text(response(json!({}))),
            Err(LlmError::EmptyContent)
        ));
        assert!(matches!(
            extract_text(response(json!({"candidates": [{"content": {"parts": []}}]}))),
            Err(LlmError::EmptyContent)
        ));
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = GeminiClient::new(
            "test-key".to_string(),
            format!("{DEFAULT_ENDPOINT}/"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.url("gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_classify_error_auth_statuses() {
        let body = r#"{"error": {"code": 403, "message": "API key not valid.", "status": "PERMISSION_DENIED"}}"#;
        match classify_error(StatusCode::FORBIDDEN, body.to_string()) {
            LlmError::Auth { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "API key not valid.");
            }
            other => panic!("expected auth error, got {other:?}"),
        }
        assert!(matches!(
            classify_error(StatusCode::UNAUTHORIZED, String::new()),
            LlmError::Auth { status: 401, .. }
        ));
    }

    #[test]
    fn test_classify_error_other_statuses_are_api_errors() {
        let body = r#"{"error": {"code": 500, "message": "Internal error encountered."}}"#;
        match classify_error(StatusCode::INTERNAL_SERVER_ERROR, body.to_string()) {
            LlmError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Internal error encountered.");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_error_keeps_non_json_body() {
        let err = classify_error(StatusCode::BAD_GATEWAY, "upstream connect error".to_string());
        assert!(matches!(
            err,
            LlmError::Api { status: 502, message } if message == "upstream connect error"
        ));
    }

    #[test]
    fn test_transport_timeout_outlasts_flow_timeout() {
        let flow = Duration::from_secs(60);
        assert!(transport_timeout(flow) > flow);
    }

    #[tokio::test]
    #[ignore = "requires live GEMINI_API_KEY and network"]
    async fn test_live_structured_output() {
        let api_key = match std::env::var("GEMINI_API_KEY") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => return,
        };
        let client = GeminiClient::new(
            api_key,
            DEFAULT_ENDPOINT.to_string(),
            Duration::from_secs(60),
        )
        .expect("client should initialize");
        let prompt = RenderedPrompt {
            parts: vec![PromptPart::Text("Say hello.".to_string())],
        };
        let schema = output_schema();
        let text = client
            .generate(ModelRequest {
                model: DEFAULT_MODEL,
                system: "",
                prompt: &prompt,
                output_schema: &schema,
            })
            .await
            .expect("live call should succeed");
        assert!(schema.conform(&text).is_ok());
    }
}
