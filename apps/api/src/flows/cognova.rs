//! Cognova voice-assistant flow: answers a recorded voice query.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::flows::prompts::{COGNOVA_SYSTEM, COGNOVA_TEMPLATE};
use crate::flows::{Flow, FlowDefinition, FlowError, FlowRunner};
use crate::schema::{InputField, InputSchema, OutputField, OutputSchema};
use crate::template::TemplateError;

pub const FLOW_NAME: &str = "interactWithCognovaFlow";
pub const PROMPT_NAME: &str = "cognovaPrompt";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractWithCognovaInput {
    /// `data:<mimetype>;base64,<encoded_data>`
    #[serde(default)]
    pub voice_query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractWithCognovaOutput {
    pub text_response: String,
}

pub fn flow() -> Result<Flow, TemplateError> {
    Flow::compile(FlowDefinition {
        name: FLOW_NAME,
        prompt_name: PROMPT_NAME,
        system: COGNOVA_SYSTEM,
        template: COGNOVA_TEMPLATE,
        input: InputSchema::new(vec![InputField::string(
            "voiceQuery",
            "The voice query, as a data URI that must include a MIME type and use Base64 \
             encoding. Expected format: 'data:<mimetype>;base64,<encoded_data>'.",
        )
        .required()
        .data_uri()]),
        output: OutputSchema::new(vec![OutputField::string(
            "textResponse",
            "The text response from the AI voice assistant.",
        )]),
    })
}

/// Typed entry point for in-process callers. The HTTP handlers use
/// `FlowRunner::run_as` on the raw body instead.
#[allow(dead_code)]
pub async fn interact_with_cognova(
    runner: &FlowRunner,
    input: &InteractWithCognovaInput,
    cancel: &CancellationToken,
) -> Result<InteractWithCognovaOutput, FlowError> {
    runner.run_typed(FLOW_NAME, input, cancel).await
}
