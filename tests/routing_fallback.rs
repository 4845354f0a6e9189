mod common;

use common::*;
use crucible::utils::cancel::CancelSignal;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn forced_provider_is_honored_with_both_available() {
    let tmp = TempDir::new().unwrap();
    let lm = mock_lm_server("from lm-studio").await;
    let ollama = mock_ollama_server("from ollama").await;
    let orchestrator = orchestrator(test_config(&lm.uri(), &ollama.uri(), tmp.path()));

    let mut d = draft("hi");
    d.provider = Some("lm-studio".into());
    let req = orchestrator.accept(d).unwrap();
    let report = orchestrator
        .complete(&req, CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(report.response.provider, "lm-studio");
    assert_eq!(report.response.content, "from lm-studio");
    assert!(!report.escalated);
    assert!(ollama.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn tool_requests_retry_the_only_capable_provider() {
    let tmp = TempDir::new().unwrap();

    // lm-studio fails the first call, then answers the agent properly.
    let lm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&lm)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lm_completion(
            "{\"thought\": \"done\", \"tool\": \"final_answer\", \"toolInput\": {\"answer\": \"ok\"}}",
        )))
        .mount(&lm)
        .await;
    let ollama = mock_ollama_server("never used").await;

    let orchestrator = orchestrator(test_config(&lm.uri(), &ollama.uri(), tmp.path()));
    let req = orchestrator.accept(draft("do a task")).unwrap();
    let outcome = orchestrator
        .run_agent(&req, CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(outcome.answer, "ok");
    // The transient failure was retried on lm-studio, never on ollama
    // (which is not tool-capable without an allow-listed model).
    assert_eq!(lm.received_requests().await.unwrap().len(), 2);
    assert!(ollama.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn attempts_are_bounded_by_retry_budget() {
    let tmp = TempDir::new().unwrap();
    let lm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&lm)
        .await;

    let mut config = test_config(&lm.uri(), "http://127.0.0.1:1", tmp.path());
    config.router.max_retries = 2;
    config.router.fallback_chain = vec!["lm-studio".into()];
    config.providers.ollama.enabled = false;
    let orchestrator = orchestrator(config);

    let req = orchestrator.accept(draft("hi")).unwrap();
    let err = orchestrator
        .complete(&req, CancelSignal::never())
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    // max_retries = 2 means at most 3 provider attempts.
    assert_eq!(lm.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn unavailable_provider_falls_back_to_the_chain() {
    let tmp = TempDir::new().unwrap();
    let ollama = mock_ollama_server("fallback answer").await;
    let orchestrator = orchestrator(test_config(
        "http://127.0.0.1:1",
        &ollama.uri(),
        tmp.path(),
    ));

    let req = orchestrator.accept(draft("hi")).unwrap();
    let report = orchestrator
        .complete(&req, CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(report.response.provider, "ollama");
    assert_eq!(report.response.content, "fallback answer");
}

#[tokio::test]
async fn prompt_at_byte_limit_is_accepted_and_one_past_rejected() {
    let tmp = TempDir::new().unwrap();
    let lm = mock_lm_server("ok").await;
    let mut config = test_config(&lm.uri(), "http://127.0.0.1:1", tmp.path());
    config.security.max_input_length = 64;
    config.providers.ollama.enabled = false;
    config.router.fallback_chain = vec!["lm-studio".into()];
    let orchestrator = orchestrator(config);

    assert!(orchestrator.accept(draft(&"x".repeat(64))).is_ok());
    let err = orchestrator.accept(draft(&"x".repeat(65))).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}
