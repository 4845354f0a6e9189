// Shared test helpers — not all items used by every test binary.
#![allow(unused)]

use crucible::config::Config;
use crucible::orchestrator::Orchestrator;
use crucible::request::RequestDraft;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config pointing both providers at the given URLs, workspace at `tmp`.
pub fn test_config(lm_url: &str, ollama_url: &str, workspace: &Path) -> Config {
    let mut config = Config::default();
    config.providers.lm_studio.base_url = lm_url.to_string();
    config.providers.ollama.base_url = ollama_url.to_string();
    config.workspace = Some(workspace.to_path_buf());
    config
}

pub fn orchestrator(config: Config) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(config).expect("orchestrator should start"))
}

/// An lm-studio-shaped completion body.
pub fn lm_completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": "qwen2.5-coder",
        "choices": [{
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 8, "completion_tokens": 4 }
    })
}

/// An ollama-shaped chat body.
pub fn ollama_completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": "llama3.1",
        "message": { "role": "assistant", "content": content },
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": 8,
        "eval_count": 4
    })
}

pub async fn mock_lm_server(content: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lm_completion(content)))
        .mount(&server)
        .await;
    server
}

pub async fn mock_ollama_server(content: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_completion(content)))
        .mount(&server)
        .await;
    server
}

pub fn draft(prompt: &str) -> RequestDraft {
    RequestDraft::from_prompt(prompt)
}
