//! Code-suggestion flow: suggests a snippet for a GitHub repository.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::flows::prompts::{CODE_SUGGESTION_SYSTEM, CODE_SUGGESTION_TEMPLATE};
use crate::flows::{Flow, FlowDefinition, FlowError, FlowRunner};
use crate::schema::{InputField, InputSchema, OutputField, OutputSchema};
use crate::template::TemplateError;

pub const FLOW_NAME: &str = "generateCodeSuggestionsFlow";
pub const PROMPT_NAME: &str = "generateCodeSuggestionsPrompt";

/// Shortest request description accepted.
pub const MIN_PROMPT_CHARS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodeSuggestionsInput {
    /// Missing fields deserialize as empty and are reported by validation.
    #[serde(default)]
    pub github_repo_url: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodeSuggestionsOutput {
    pub code_suggestion: String,
}

pub fn flow() -> Result<Flow, TemplateError> {
    Flow::compile(FlowDefinition {
        name: FLOW_NAME,
        prompt_name: PROMPT_NAME,
        system: CODE_SUGGESTION_SYSTEM,
        template: CODE_SUGGESTION_TEMPLATE,
        input: InputSchema::new(vec![
            InputField::string(
                "githubRepoUrl",
                "The URL of the GitHub repository to analyze.",
            )
            .required()
            .url(&["http", "https"]),
            InputField::string(
                "prompt",
                "The prompt describing the desired code snippet.",
            )
            .required()
            .min_length(MIN_PROMPT_CHARS),
        ]),
        output: OutputSchema::new(vec![OutputField::string(
            "codeSuggestion",
            "The suggested code snippet.",
        )]),
    })
}

/// Typed entry point for in-process callers. The HTTP handlers use
/// `FlowRunner::run_as` on the raw body instead.
#[allow(dead_code)]
pub async fn generate_code_suggestions(
    runner: &FlowRunner,
    input: &GenerateCodeSuggestionsInput,
    cancel: &CancellationToken,
) -> Result<GenerateCodeSuggestionsOutput, FlowError> {
    runner.run_typed(FLOW_NAME, input, cancel).await
}
