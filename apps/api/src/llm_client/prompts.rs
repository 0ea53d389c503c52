// Shared prompt fragments for structured-output calls.
// Flow-specific templates live in flows::prompts.

use crate::schema::OutputSchema;

/// System fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with a single valid JSON object only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Builds the system instruction sent with every structured-output call:
/// the flow's own system text, the JSON-only rule, and the field contract.
pub fn structured_output_instruction(system: &str, schema: &OutputSchema) -> String {
    let mut out = String::new();
    if !system.trim().is_empty() {
        out.push_str(system.trim());
        out.push_str("\n\n");
    }
    out.push_str(JSON_ONLY_SYSTEM);
    out.push_str("\n\nThe JSON object must contain exactly these string fields:\n");
    for field in &schema.fields {
        out.push_str(&format!("- \"{}\": {}\n", field.name, field.description));
    }
    out
}
