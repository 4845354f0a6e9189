use super::*;
use crate::providers::base::{Priority, RequestContext};

fn request() -> Request {
    Request {
        id: "req-1".into(),
        prompt: "hi".into(),
        model: Some("llama3.1".into()),
        provider: None,
        temperature: 0.7,
        max_tokens: 256,
        stream: false,
        tools: vec![],
        messages: vec![],
        context: RequestContext::default(),
        timeout: Duration::from_secs(30),
        priority: Priority::Medium,
    }
}

#[test]
fn finish_reason_maps_wire_strings() {
    assert_eq!(normalize_finish_reason(Some("stop"), false), FinishReason::Stop);
    assert_eq!(normalize_finish_reason(Some("length"), false), FinishReason::Length);
    assert_eq!(
        normalize_finish_reason(Some("tool_calls"), true),
        FinishReason::ToolCalls
    );
    assert_eq!(normalize_finish_reason(Some("error"), false), FinishReason::Error);
}

#[test]
fn tool_calls_override_stop() {
    // Some backends report "stop" even when the reply carries tool calls.
    assert_eq!(normalize_finish_reason(Some("stop"), true), FinishReason::ToolCalls);
    assert_eq!(normalize_finish_reason(None, true), FinishReason::ToolCalls);
}

#[test]
fn assemble_fills_model_from_request() {
    let resp = assemble_response(
        &request(),
        "ollama",
        ReplyParts {
            content: Some("hello".into()),
            ..Default::default()
        },
        Duration::from_millis(120),
    );
    assert_eq!(resp.model, "llama3.1");
    assert_eq!(resp.provider, "ollama");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.response_time, Duration::from_millis(120));
}

#[test]
fn assemble_carries_usage_and_tool_calls() {
    let resp = assemble_response(
        &request(),
        "lm-studio",
        ReplyParts {
            content: None,
            tool_calls: vec![ToolCall {
                id: "t_1".into(),
                name: "read_file".into(),
                arguments: "{}".into(),
            }],
            usage: Some(Usage::new(10, 5)),
            finish_reason: Some("stop".into()),
            model: Some("qwen2.5-coder".into()),
            confidence: None,
        },
        Duration::from_millis(80),
    );
    assert_eq!(resp.usage.total_tokens, 15);
    assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
    assert!(resp.content.is_empty());
    assert_eq!(resp.model, "qwen2.5-coder");
}
