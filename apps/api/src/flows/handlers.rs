//! Axum route handlers for the Flow API.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::errors::AppError;
use crate::flows::code_assistant::{self, GenerateCodeSuggestionsOutput};
use crate::flows::cognova::{self, InteractWithCognovaOutput};
use crate::flows::FlowDescriptor;
use crate::schema::StructuredOutput;
use crate::state::AppState;

/// GET /api/v1/flows
pub async fn handle_list_flows(State(state): State<AppState>) -> Json<Vec<FlowDescriptor>> {
    Json(state.runner.describe())
}

/// POST /api/v1/flows/:name/run
///
/// Runs any registered flow on a raw JSON input object.
pub async fn handle_run_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<Value>,
) -> Result<Json<StructuredOutput>, AppError> {
    let cancel = state.shutdown.child_token();
    let output = state.runner.run(&name, &input, &cancel).await?;
    Ok(Json(output))
}

/// POST /api/v1/code-assistant/suggestions
///
/// The body stays raw JSON until validation so wrong-typed fields are
/// reported alongside every other violation.
pub async fn handle_code_suggestions(
    State(state): State<AppState>,
    Json(input): Json<Value>,
) -> Result<Json<GenerateCodeSuggestionsOutput>, AppError> {
    let cancel = state.shutdown.child_token();
    let output = state
        .runner
        .run_as(code_assistant::FLOW_NAME, &input, &cancel)
        .await?;
    Ok(Json(output))
}

/// POST /api/v1/cognova/interact
pub async fn handle_cognova_interact(
    State(state): State<AppState>,
    Json(input): Json<Value>,
) -> Result<Json<InteractWithCognovaOutput>, AppError> {
    let cancel = state.shutdown.child_token();
    let output = state
        .runner
        .run_as(cognova::FLOW_NAME, &input, &cancel)
        .await?;
    Ok(Json(output))
}
