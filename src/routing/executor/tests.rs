use super::*;
use crate::metrics::ProviderState;
use crate::testutil::{MockAdapter, adapters_map, basic_request, text_response};
use crate::utils::cancel::CancelToken;

fn decision(chain: &[&str]) -> RoutingDecision {
    RoutingDecision {
        selected_provider: chain[0].to_string(),
        confidence: 0.9,
        reasoning: "test".into(),
        fallback_chain: chain.iter().map(|s| (*s).to_string()).collect(),
        escalation_threshold: Some(0.7),
        estimated_response_time_ms: 500,
    }
}

struct Fixture {
    executor: HybridExecutor,
    lm: Arc<MockAdapter>,
    ollama: Arc<MockAdapter>,
    metrics: Arc<MetricsRegistry>,
}

fn fixture(max_retries: usize) -> Fixture {
    let lm = Arc::new(MockAdapter::new("lm-studio"));
    let ollama =
        Arc::new(MockAdapter::new("ollama").with_class(ResponseTimeClass::Medium));
    let mut registry = MetricsRegistry::new();
    registry.register(ProviderState::new("lm-studio", 4));
    registry.register(ProviderState::new("ollama", 4));
    let metrics = Arc::new(registry);
    let executor = HybridExecutor::new(
        adapters_map(vec![lm.clone(), ollama.clone()]),
        Arc::clone(&metrics),
        ExecutorOptions {
            max_retries,
            backoff_base_ms: 1,
            ..Default::default()
        },
        EventBus::default(),
    );
    Fixture {
        executor,
        lm,
        ollama,
        metrics,
    }
}

fn unavailable(provider: &str) -> CrucibleError {
    CrucibleError::ProviderUnavailable {
        provider: provider.into(),
        message: "connection refused".into(),
    }
}

#[tokio::test]
async fn direct_returns_first_success() {
    let f = fixture(2);
    f.lm.push_response(f.lm.response("hello"));
    let report = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Direct,
            CancelSignal::never(),
        )
        .await
        .unwrap();
    assert_eq!(report.response.content, "hello");
    assert_eq!(report.attempts, 1);
    assert!(!report.escalated);
    assert_eq!(f.ollama.call_count(), 0);
}

#[tokio::test]
async fn direct_advances_through_fallback_chain() {
    let f = fixture(2);
    f.lm.push_error(unavailable("lm-studio"));
    f.ollama.push_response(f.ollama.response("fallback answer"));
    let report = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Direct,
            CancelSignal::never(),
        )
        .await
        .unwrap();
    assert_eq!(report.response.provider, "ollama");
    assert_eq!(report.attempts, 2);
}

#[tokio::test]
async fn attempts_never_exceed_retry_budget_plus_one() {
    let f = fixture(2);
    for _ in 0..5 {
        f.lm.push_error(unavailable("lm-studio"));
        f.ollama.push_error(unavailable("ollama"));
    }
    let err = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Direct,
            CancelSignal::never(),
        )
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(f.lm.call_count() + f.ollama.call_count(), 3);
}

#[tokio::test]
async fn single_provider_chain_retries_same_provider() {
    let f = fixture(1);
    f.lm.push_error(unavailable("lm-studio"));
    f.lm.push_response(f.lm.response("second try"));
    let report = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio"]),
            ExecutionMode::Direct,
            CancelSignal::never(),
        )
        .await
        .unwrap();
    assert_eq!(report.response.content, "second try");
    assert_eq!(f.lm.call_count(), 2);
    assert_eq!(f.ollama.call_count(), 0);
}

#[tokio::test]
async fn non_recoverable_error_stops_the_chain() {
    let f = fixture(2);
    f.lm.push_error(CrucibleError::Validation("bad request".into()));
    let err = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Direct,
            CancelSignal::never(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(f.ollama.call_count(), 0);
}

#[tokio::test]
async fn forced_mode_does_not_fall_back() {
    let f = fixture(2);
    f.lm.push_error(unavailable("lm-studio"));
    f.lm.push_error(unavailable("lm-studio"));
    f.lm.push_error(unavailable("lm-studio"));
    let err = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Forced {
                allow_fallback: false,
            },
            CancelSignal::never(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PROVIDER_UNAVAILABLE");
    assert_eq!(f.ollama.call_count(), 0);
    assert_eq!(f.lm.call_count(), 3);
}

#[tokio::test]
async fn hybrid_escalates_on_low_confidence() {
    let f = fixture(2);
    // Short reply with "error" wording scores well under 0.7.
    f.lm.push_response(text_response("lm-studio", "error"));
    f.ollama
        .push_response(text_response("ollama", "a thorough, capable answer"));
    let report = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Hybrid,
            CancelSignal::never(),
        )
        .await
        .unwrap();
    assert!(report.escalated);
    assert_eq!(report.providers, vec!["lm-studio", "ollama"]);
    assert_eq!(report.response.provider, "ollama");
}

#[tokio::test]
async fn hybrid_keeps_confident_fast_response() {
    let f = fixture(2);
    f.lm.push_response(text_response(
        "lm-studio",
        "Here is the full explanation:\n```rust\nfn main() {}\n```",
    ));
    let report = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Hybrid,
            CancelSignal::never(),
        )
        .await
        .unwrap();
    assert!(!report.escalated);
    assert_eq!(report.providers, vec!["lm-studio"]);
    assert_eq!(f.ollama.call_count(), 0);
}

#[tokio::test]
async fn failed_escalation_retains_fast_response() {
    let f = fixture(2);
    f.lm.push_response(text_response("lm-studio", "error"));
    f.ollama.push_error(unavailable("ollama"));
    let report = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Hybrid,
            CancelSignal::never(),
        )
        .await
        .unwrap();
    assert!(!report.escalated);
    assert_eq!(report.response.provider, "lm-studio");
    assert_eq!(report.attempts, 2);
}

#[tokio::test]
async fn load_counters_return_to_zero_after_terminal_state() {
    let f = fixture(1);
    f.lm.push_error(unavailable("lm-studio"));
    f.ollama.push_response(f.ollama.response("ok"));
    let _ = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Direct,
            CancelSignal::never(),
        )
        .await
        .unwrap();
    assert_eq!(f.metrics.get("lm-studio").unwrap().current_load(), 0);
    assert_eq!(f.metrics.get("ollama").unwrap().current_load(), 0);
}

#[tokio::test]
async fn cancellation_surfaces_and_releases_load() {
    let f = fixture(2);
    let (token, signal) = CancelToken::new();
    token.cancel();
    let err = f
        .executor
        .execute(
            &basic_request("hi"),
            &decision(&["lm-studio", "ollama"]),
            ExecutionMode::Direct,
            signal,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CANCELLED");
    assert_eq!(f.metrics.get("lm-studio").unwrap().current_load(), 0);
}

#[test]
fn confidence_derivation_matches_contract() {
    let mut resp = text_response("lm-studio", "x");
    resp.response_time = Duration::from_millis(300);
    // Short output: 0.8 - 0.3 + fast-tier bonus 0.1
    let c = derive_confidence(&resp, ResponseTimeClass::Fast);
    assert!((c - 0.6).abs() < 1e-6);

    let mut resp = text_response("lm-studio", "some ```code``` and detail here");
    resp.response_time = Duration::from_millis(300);
    let c = derive_confidence(&resp, ResponseTimeClass::Fast);
    assert!((c - 1.0).abs() < 1e-6);

    let mut resp = text_response("ollama", "Error: everything failed");
    resp.response_time = Duration::from_secs(15);
    // 0.8 - 0.2 (error) - 0.2 (slow for class) = 0.4
    let c = derive_confidence(&resp, ResponseTimeClass::Medium);
    assert!((c - 0.4).abs() < 1e-6);

    // Clamp floor.
    let mut resp = text_response("ollama", "err");
    resp.content = "error".into();
    resp.response_time = Duration::from_secs(60);
    let c = derive_confidence(&resp, ResponseTimeClass::Fast);
    assert!(c >= 0.1);
}
