mod common;

use common::*;
use crucible::bus::Event;
use crucible::config::IsolationLevel;
use crucible::utils::cancel::CancelSignal;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A standard-level session asking for a write (not in its allowed set)
/// gets a recorded violation, the tool is refused, and the agent still
/// terminates cleanly with its session torn down.
#[tokio::test]
async fn unauthorized_operation_is_refused_and_recorded() {
    let tmp = TempDir::new().unwrap();
    let lm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lm_completion(
            "{\"thought\": \"save it\", \"tool\": \"write_file\", \
             \"toolInput\": {\"path\": \"out.txt\", \"content\": \"data\"}}",
        )))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&lm)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lm_completion(
            "{\"thought\": \"give up\", \"tool\": \"final_answer\", \
             \"toolInput\": {\"answer\": \"could not write\"}}",
        )))
        .mount(&lm)
        .await;

    let mut config = test_config(&lm.uri(), "http://127.0.0.1:1", tmp.path());
    config.providers.ollama.enabled = false;
    config.router.fallback_chain = vec!["lm-studio".into()];
    config.isolation.default_level = IsolationLevel::Standard;
    let orchestrator = orchestrator(config);
    let mut violations = orchestrator.bus().subscribe();

    let req = orchestrator.accept(draft("write data to out.txt")).unwrap();
    let outcome = orchestrator
        .run_agent(&req, CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(outcome.answer, "could not write");
    // The write was refused: nothing on disk.
    assert!(!tmp.path().join("out.txt").exists());
    let observation = outcome.steps[0].observation.as_deref().unwrap();
    assert!(observation.contains("isolation violation"));

    // The violation went out on the bus.
    let mut saw_violation = false;
    while let Ok(event) = violations.try_recv() {
        if let Event::IsolationViolation { violation, .. } = event
            && violation.contains("Unauthorized operation: write")
        {
            saw_violation = true;
        }
    }
    assert!(saw_violation);
}

/// Minimal-level sessions may read and analyze; the same flow succeeds.
#[tokio::test]
async fn permitted_operations_run_at_minimal_level() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("in.txt"), "payload").unwrap();
    let lm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lm_completion(
            "{\"thought\": \"read\", \"tool\": \"read_file\", \"toolInput\": {\"path\": \"in.txt\"}}",
        )))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&lm)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lm_completion(
            "{\"thought\": \"done\", \"tool\": \"final_answer\", \"toolInput\": {\"answer\": \"payload\"}}",
        )))
        .mount(&lm)
        .await;

    let mut config = test_config(&lm.uri(), "http://127.0.0.1:1", tmp.path());
    config.providers.ollama.enabled = false;
    config.router.fallback_chain = vec!["lm-studio".into()];
    config.isolation.default_level = IsolationLevel::Minimal;
    let orchestrator = orchestrator(config);

    let req = orchestrator.accept(draft("what is in in.txt?")).unwrap();
    let outcome = orchestrator
        .run_agent(&req, CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(outcome.answer, "payload");
    assert_eq!(outcome.steps[0].observation.as_deref(), Some("payload"));
}
