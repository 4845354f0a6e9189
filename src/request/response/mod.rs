use crate::providers::base::{FinishReason, Request, Response, ToolCall, Usage};
use std::time::Duration;

/// Adapter-shaped reply fields before canonicalization.
#[derive(Debug, Default)]
pub struct ReplyParts {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// Wire-level finish reason string, if the backend sent one.
    pub finish_reason: Option<String>,
    pub model: Option<String>,
    pub confidence: Option<f32>,
}

/// Map a backend's finish-reason string onto the canonical enum.
pub fn normalize_finish_reason(wire: Option<&str>, has_tool_calls: bool) -> FinishReason {
    match wire {
        Some("stop") | Some("end_turn") | Some("done") => {
            if has_tool_calls {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            }
        }
        Some("length") | Some("max_tokens") => FinishReason::Length,
        Some("tool_calls") | Some("tool_use") | Some("function_call") => FinishReason::ToolCalls,
        Some("error") => FinishReason::Error,
        _ if has_tool_calls => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

/// Build the canonical `Response` from adapter-shaped parts.
pub fn assemble_response(
    req: &Request,
    provider: &str,
    parts: ReplyParts,
    elapsed: Duration,
) -> Response {
    let has_tool_calls = !parts.tool_calls.is_empty();
    let finish_reason = normalize_finish_reason(parts.finish_reason.as_deref(), has_tool_calls);
    Response {
        id: req.id.clone(),
        content: parts.content.unwrap_or_default(),
        model: parts
            .model
            .or_else(|| req.model.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        provider: provider.to_string(),
        usage: parts.usage.unwrap_or_default(),
        tool_calls: parts.tool_calls,
        finish_reason,
        response_time: elapsed,
        confidence: parts.confidence,
    }
}

#[cfg(test)]
mod tests;
