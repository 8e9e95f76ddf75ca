//! Structured-output mode on top of plain completion.

use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

use crate::pipeline::StructuredMap;

use super::{with_deadline, LanguageModel, LlmError, LlmRequest};

/// Invokes the model and parses its answer as a JSON object.
///
/// Unparseable answers are retried up to `retries` extra times; provider
/// and timeout errors are returned immediately.
pub async fn invoke_structured(
    model: &dyn LanguageModel,
    request: &LlmRequest,
    retries: u32,
    deadline: Instant,
) -> Result<StructuredMap, LlmError> {
    let mut last_reason = String::new();

    for attempt in 0..=retries {
        let text = with_deadline(deadline, model.complete(request)).await?;
        match parse_structured(&text) {
            Ok(map) => return Ok(map),
            Err(reason) => {
                warn!(
                    attempt = attempt + 1,
                    max_attempts = retries + 1,
                    reason = %reason,
                    "Structured response did not parse"
                );
                last_reason = reason;
            }
        }
    }

    Err(LlmError::MalformedStructured(last_reason))
}

/// Extracts a JSON object from model text.
///
/// Accepts bare JSON, JSON inside a Markdown code fence, or JSON embedded
/// in prose (first `{` to last `}`).
pub fn parse_structured(text: &str) -> Result<StructuredMap, String> {
    let trimmed = strip_code_fence(text.trim());
    if trimmed.is_empty() {
        return Err("empty response".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return match value {
            Value::Object(map) => Ok(map),
            other => Err(format!("expected a JSON object, got {}", type_name(&other))),
        };
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<StructuredMap>(&trimmed[start..=end])
                .map_err(|e| format!("invalid JSON object: {}", e))
        }
        _ => Err("no JSON object found in response".to_string()),
    }
}

/// Removes one surrounding ``` fence (with optional language tag).
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
