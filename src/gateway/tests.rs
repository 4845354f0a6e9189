use super::*;
use crate::config::Config;
use axum::body::to_bytes;
use axum::http::Request as HttpRequest;
use tempfile::TempDir;
use tower::util::ServiceExt;
use wiremock::matchers::{method, path as url_path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn orchestrator_with_mock(content: &str, tmp: &TempDir) -> (Arc<Orchestrator>, MockServer) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(url_path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 3 }
        })))
        .mount(&server)
        .await;
    let mut config = Config::default();
    config.providers.lm_studio.base_url = server.uri();
    config.providers.ollama.enabled = false;
    config.router.fallback_chain = vec!["lm-studio".into()];
    config.workspace = Some(tmp.path().to_path_buf());
    (Arc::new(Orchestrator::new(config).unwrap()), server)
}

fn json_request(uri: &str, body: serde_json::Value) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn request_endpoint_returns_response_json() {
    let tmp = TempDir::new().unwrap();
    let (orchestrator, _server) = orchestrator_with_mock("pong", &tmp).await;
    let app = build_router(orchestrator);

    let response = app
        .oneshot(json_request("/request", serde_json::json!({"prompt": "ping"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["response"]["content"], "pong");
    assert_eq!(json["escalated"], false);
}

#[tokio::test]
async fn empty_request_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let (orchestrator, _server) = orchestrator_with_mock("x", &tmp).await;
    let app = build_router(orchestrator);

    let response = app
        .oneshot(json_request("/request", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn health_endpoint_reports_providers() {
    let tmp = TempDir::new().unwrap();
    let (orchestrator, _server) = orchestrator_with_mock("x", &tmp).await;
    let app = build_router(orchestrator);

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["healthy"], true);
    assert!(json["providers"]["lm-studio"].is_object());
}

#[tokio::test]
async fn stream_endpoint_emits_ndjson_with_terminal_token() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"str\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"eam\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(url_path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;
    let mut config = Config::default();
    config.providers.lm_studio.base_url = server.uri();
    config.providers.ollama.enabled = false;
    config.router.fallback_chain = vec!["lm-studio".into()];
    config.workspace = Some(tmp.path().to_path_buf());
    let app = build_router(Arc::new(Orchestrator::new(config).unwrap()));

    let response = app
        .oneshot(json_request("/stream", serde_json::json!({"prompt": "go"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-ndjson"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 3);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["content"], "str");
    assert_eq!(first["index"], 0);
    assert_eq!(first["is_complete"], false);

    let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
    assert_eq!(last["is_complete"], true);
    assert_eq!(last["index"], 2);
}
