//! Flow Orchestrator.
//!
//! A flow is a named pairing of input schema, prompt template, and output
//! schema. `FlowRunner` owns the registered flows and the injected model
//! client, and is the only thing the HTTP layer calls.
//!
//! Per invocation:
//!   Received → Validating → Prompting → Invoking → ParsingOutput → Succeeded | Failed
//!
//! Invalid input never reaches the model, and a response that does not match
//! the output schema is an error, never a partial result.

pub mod code_assistant;
pub mod cognova;
pub mod handlers;
pub mod prompts;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm_client::{LlmError, ModelClient, ModelRequest};
use crate::schema::{InputSchema, OutputSchema, StructuredOutput, ValidatedValues, ValidationError};
use crate::template::{RenderedPrompt, Template, TemplateError};

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Why a model invocation failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvocationFailure {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("model API error: {0}")]
    Api(String),

    #[error("request could not be built: {0}")]
    InvalidRequest(String),

    #[error("model refused to answer ({0})")]
    Refused(String),

    #[error("model returned no content")]
    Empty,

    #[error("response does not match the output schema: {0}")]
    NonConforming(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl InvocationFailure {
    /// Stable machine-readable tag for the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Auth(_) => "auth",
            Self::Api(_) => "api",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Refused(_) => "refused",
            Self::Empty => "empty",
            Self::NonConforming(_) => "non_conforming",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<LlmError> for InvocationFailure {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Http(e) => Self::Transport(e.to_string()),
            LlmError::Auth { status, message } => Self::Auth(format!("status {status}: {message}")),
            LlmError::Api { status, message } => Self::Api(format!("status {status}: {message}")),
            LlmError::Parse(e) => Self::NonConforming(e.to_string()),
            LlmError::Refused(reason) => Self::Refused(reason),
            LlmError::EmptyContent => Self::Empty,
            LlmError::InvalidMedia(e) => Self::InvalidRequest(e.to_string()),
        }
    }
}

/// The model call for a flow failed or its answer was unusable.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("flow '{flow}' invocation failed: {reason}")]
pub struct InvocationError {
    pub flow: String,
    pub reason: InvocationFailure,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unknown flow '{0}'")]
    UnknownFlow(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// Template/schema pairing broken at runtime. A programming error.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("failed to encode flow input: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("flow '{0}' is already registered")]
    Duplicate(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Flow definitions
// ────────────────────────────────────────────────────────────────────────────

/// Static description of a flow, compiled into a `Flow` at registration.
pub struct FlowDefinition<'a> {
    pub name: &'a str,
    pub prompt_name: &'a str,
    pub system: &'a str,
    pub template: &'a str,
    pub input: InputSchema,
    pub output: OutputSchema,
}

/// A registered flow. Immutable after construction.
#[derive(Debug)]
pub struct Flow {
    name: String,
    system: String,
    template: Template,
    input: InputSchema,
    output: OutputSchema,
}

impl Flow {
    pub fn compile(def: FlowDefinition<'_>) -> Result<Self, TemplateError> {
        let template = Template::compile(def.prompt_name, def.template, &def.input)?;
        Ok(Self {
            name: def.name.to_string(),
            system: def.system.to_string(),
            template,
            input: def.input,
            output: def.output,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Public description of a registered flow.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDescriptor {
    pub name: String,
    pub prompt: String,
    pub input_schema: InputSchema,
    pub output_schema: OutputSchema,
}

/// Both flows served by the portfolio.
pub fn default_flows() -> Result<Vec<Flow>, TemplateError> {
    Ok(vec![code_assistant::flow()?, cognova::flow()?])
}

// ────────────────────────────────────────────────────────────────────────────
// Invocation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Received,
    Validating,
    Prompting,
    Invoking,
    ParsingOutput,
    Succeeded,
    Failed,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Prompting => "prompting",
            Self::Invoking => "invoking",
            Self::ParsingOutput => "parsing_output",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-call record. Fills in as the invocation advances and is dropped when
/// `run` returns.
struct Invocation<'a> {
    id: Uuid,
    flow: &'a str,
    state: InvocationState,
    started: Instant,
    input: Option<ValidatedValues>,
    prompt: Option<RenderedPrompt>,
    raw_response: Option<String>,
}

impl<'a> Invocation<'a> {
    fn start(flow: &'a str) -> Self {
        let id = Uuid::new_v4();
        debug!(invocation_id = %id, flow, "Invocation received");
        Self {
            id,
            flow,
            state: InvocationState::Received,
            started: Instant::now(),
            input: None,
            prompt: None,
            raw_response: None,
        }
    }

    fn advance(&mut self, state: InvocationState) {
        debug!(invocation_id = %self.id, flow = self.flow, from = %self.state, to = %state, "Invocation state change");
        self.state = state;
    }

    fn succeed(mut self, output: StructuredOutput) -> StructuredOutput {
        self.advance(InvocationState::Succeeded);
        info!(
            invocation_id = %self.id,
            flow = self.flow,
            input_fields = self.input.as_ref().map_or(0, ValidatedValues::len),
            media_parts = self.prompt.as_ref().map_or(0, RenderedPrompt::media_count),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Flow invocation succeeded"
        );
        output
    }

    fn fail(mut self, error: FlowError) -> FlowError {
        let at = self.state;
        self.advance(InvocationState::Failed);
        if let Some(raw) = &self.raw_response {
            debug!(invocation_id = %self.id, "Raw model response: {raw}");
        }
        warn!(
            invocation_id = %self.id,
            flow = self.flow,
            at = %at,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Flow invocation failed: {error}"
        );
        error
    }

    fn invocation_error(&self, reason: InvocationFailure) -> FlowError {
        FlowError::Invocation(InvocationError {
            flow: self.flow.to_string(),
            reason,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Runner
// ────────────────────────────────────────────────────────────────────────────

/// Model selection and per-invocation bound.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub timeout: Duration,
}

/// Owns the flow registry and the model client. Shared as `Arc<FlowRunner>`;
/// holds no per-call state.
pub struct FlowRunner {
    flows: HashMap<String, Arc<Flow>>,
    order: Vec<String>,
    client: Arc<dyn ModelClient>,
    settings: ModelSettings,
}

impl FlowRunner {
    pub fn new(client: Arc<dyn ModelClient>, settings: ModelSettings) -> Self {
        Self {
            flows: HashMap::new(),
            order: Vec::new(),
            client,
            settings,
        }
    }

    /// Builds a runner with every flow in `flows` registered.
    pub fn with_flows(
        client: Arc<dyn ModelClient>,
        settings: ModelSettings,
        flows: Vec<Flow>,
    ) -> Result<Self, RegistrationError> {
        let mut runner = Self::new(client, settings);
        for flow in flows {
            runner.register(flow)?;
        }
        Ok(runner)
    }

    pub fn register(&mut self, flow: Flow) -> Result<(), RegistrationError> {
        if self.flows.contains_key(flow.name()) {
            return Err(RegistrationError::Duplicate(flow.name().to_string()));
        }
        info!(
            "Registered flow '{}' (prompt '{}', placeholders {:?})",
            flow.name(),
            flow.template.name(),
            flow.template.placeholders()
        );
        self.order.push(flow.name().to_string());
        self.flows.insert(flow.name().to_string(), Arc::new(flow));
        Ok(())
    }

    pub fn describe(&self) -> Vec<FlowDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.flows.get(name))
            .map(|flow| FlowDescriptor {
                name: flow.name.clone(),
                prompt: flow.template.name().to_string(),
                input_schema: flow.input.clone(),
                output_schema: flow.output.clone(),
            })
            .collect()
    }

    /// Runs `flow_name` on `raw_input`.
    ///
    /// The model call is bounded by the configured timeout and by `cancel`.
    pub async fn run(
        &self,
        flow_name: &str,
        raw_input: &Value,
        cancel: &CancellationToken,
    ) -> Result<StructuredOutput, FlowError> {
        let mut invocation = Invocation::start(flow_name);

        let Some(flow) = self.flows.get(flow_name).cloned() else {
            return Err(invocation.fail(FlowError::UnknownFlow(flow_name.to_string())));
        };

        invocation.advance(InvocationState::Validating);
        let values = match flow.input.validate(raw_input) {
            Ok(values) => values,
            Err(e) => return Err(invocation.fail(e.into())),
        };

        invocation.advance(InvocationState::Prompting);
        let rendered = flow.template.render(invocation.input.insert(values));
        let prompt = match rendered {
            Ok(prompt) => prompt,
            Err(e) => return Err(invocation.fail(e.into())),
        };
        debug!(
            invocation_id = %invocation.id,
            media_parts = prompt.media_count(),
            "Rendered prompt: {}",
            prompt.text()
        );

        invocation.advance(InvocationState::Invoking);
        let outcome = {
            let request = ModelRequest {
                model: &self.settings.model,
                system: &flow.system,
                prompt: invocation.prompt.insert(prompt),
                output_schema: &flow.output,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(InvocationFailure::Cancelled),
                res = tokio::time::timeout(self.settings.timeout, self.client.generate(request)) => match res {
                    Err(_) => Err(InvocationFailure::Timeout(self.settings.timeout)),
                    Ok(Err(e)) => Err(InvocationFailure::from(e)),
                    Ok(Ok(text)) => Ok(text),
                },
            }
        };
        let raw_text = match outcome {
            Ok(text) => text,
            Err(reason) => {
                let error = invocation.invocation_error(reason);
                return Err(invocation.fail(error));
            }
        };

        invocation.advance(InvocationState::ParsingOutput);
        let conformed = flow.output.conform(invocation.raw_response.insert(raw_text));
        match conformed {
            Ok(output) => Ok(invocation.succeed(output)),
            Err(e) => {
                let error = invocation.invocation_error(InvocationFailure::NonConforming(e.to_string()));
                Err(invocation.fail(error))
            }
        }
    }

    /// Runs `flow_name` on a raw JSON input and decodes the output record.
    ///
    /// Input is never decoded into a typed record first, so `null` or
    /// non-string values still come back as validation violations.
    pub async fn run_as<O>(
        &self,
        flow_name: &str,
        raw_input: &Value,
        cancel: &CancellationToken,
    ) -> Result<O, FlowError>
    where
        O: DeserializeOwned,
    {
        let output = self.run(flow_name, raw_input, cancel).await?;
        output.into_typed().map_err(|e| {
            FlowError::Invocation(InvocationError {
                flow: flow_name.to_string(),
                reason: InvocationFailure::NonConforming(e.to_string()),
            })
        })
    }

    /// Typed wrapper over `run`: encodes `input`, decodes the output record.
    pub async fn run_typed<I, O>(
        &self,
        flow_name: &str,
        input: &I,
        cancel: &CancellationToken,
    ) -> Result<O, FlowError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let raw = serde_json::to_value(input)?;
        self.run_as(flow_name, &raw, cancel).await
    }
}
