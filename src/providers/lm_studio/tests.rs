use super::*;
use crate::providers::base::{Priority, RequestContext};
use futures_util::StreamExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(prompt: &str) -> Request {
    Request {
        id: "r1".into(),
        prompt: prompt.into(),
        model: None,
        provider: Some(PROVIDER_NAME.into()),
        temperature: 0.2,
        max_tokens: 256,
        stream: false,
        tools: vec![],
        messages: vec![],
        context: RequestContext::default(),
        timeout: Duration::from_secs(30),
        priority: Priority::Medium,
    }
}

fn adapter(base_url: &str) -> LmStudioAdapter {
    LmStudioAdapter::new(base_url.to_string(), None, Duration::from_secs(2))
}

#[tokio::test]
async fn request_parses_completion_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "qwen2.5-coder",
            "choices": [{
                "message": { "role": "assistant", "content": "fn main() {}" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 6 }
        })))
        .mount(&server)
        .await;

    let response = adapter(&server.uri()).request(&request("write main")).await.unwrap();
    assert_eq!(response.content, "fn main() {}");
    assert_eq!(response.provider, "lm-studio");
    assert_eq!(response.usage.total_tokens, 18);
    assert_eq!(response.finish_reason, crate::providers::base::FinishReason::Stop);
}

#[tokio::test]
async fn request_parses_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "t_1",
                        "type": "function",
                        "function": { "name": "read_file", "arguments": "{\"path\":\"a.rs\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .mount(&server)
        .await;

    let response = adapter(&server.uri()).request(&request("read a.rs")).await.unwrap();
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].name, "read_file");
    assert_eq!(
        response.finish_reason,
        crate::providers::base::FinishReason::ToolCalls
    );
}

#[tokio::test]
async fn http_error_lowers_to_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .mount(&server)
        .await;

    let err = adapter(&server.uri()).request(&request("x")).await.unwrap_err();
    assert_eq!(err.code(), "PROVIDER_PROTOCOL_ERROR");
}

#[tokio::test]
async fn unreachable_server_is_unavailable() {
    // Nothing listens on this port.
    let adapter = adapter("http://127.0.0.1:1");
    assert!(!adapter.is_available().await);
    let err = adapter.request(&request("x")).await.unwrap_err();
    assert!(matches!(
        err,
        CrucibleError::ProviderUnavailable { .. } | CrucibleError::ProviderTimeout { .. }
    ));
}

#[tokio::test]
async fn probe_and_model_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "id": "qwen2.5-coder" }, { "id": "llama-3.1-8b-instruct" }]
        })))
        .mount(&server)
        .await;

    let adapter = adapter(&server.uri());
    assert!(adapter.is_available().await);
    let models = adapter.list_models().await.unwrap();
    assert_eq!(models, vec!["qwen2.5-coder", "llama-3.1-8b-instruct"]);
}

#[tokio::test]
async fn stream_emits_content_and_tool_call_deltas() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"t_1\",\"function\":{\"name\":\"read_file\",\"arguments\":\"{\\\"pa\"}}]},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"th\\\":\\\"a.rs\\\"}\"}}]},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let mut req = request("hi");
    req.stream = true;
    let mut stream = adapter(&server.uri()).stream(&req).await.unwrap();

    let mut content = String::new();
    let mut deltas = Vec::new();
    let mut finished = None;
    while let Some(chunk) = stream.next().await {
        match chunk.unwrap() {
            StreamChunk::Content(text) => content.push_str(&text),
            StreamChunk::ToolCallDelta { slot, arguments, .. } => deltas.push((slot, arguments)),
            StreamChunk::Finish(reason) => finished = Some(reason),
            StreamChunk::Usage(_) => {}
        }
    }
    assert_eq!(content, "Hello");
    let joined: String = deltas.iter().map(|(_, a)| a.as_str()).collect();
    assert_eq!(joined, "{\"path\":\"a.rs\"}");
    assert_eq!(finished, Some(crate::providers::base::FinishReason::ToolCalls));
}
