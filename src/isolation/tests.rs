use super::*;
use crate::config::IsolationLevel;

fn manager(level: IsolationLevel) -> IsolationManager {
    IsolationManager::new(level, EventBus::default())
}

#[tokio::test]
async fn standard_level_allows_read_denies_execute() {
    let mgr = manager(IsolationLevel::Standard);
    mgr.create("s1", None).await;
    assert!(mgr.validate("s1", Operation::Read).await);
    assert!(mgr.validate("s1", Operation::Analyze).await);
    assert!(!mgr.validate("s1", Operation::Execute).await);
}

#[tokio::test]
async fn violation_poisons_the_session() {
    let mgr = manager(IsolationLevel::Standard);
    mgr.create("s1", None).await;
    assert!(!mgr.validate("s1", Operation::Execute).await);
    // Previously allowed operations are now rejected too.
    assert!(!mgr.validate("s1", Operation::Read).await);

    let report = mgr.terminate("s1").await.unwrap();
    assert!(report.violations.len() >= 2);
    assert!(
        report.violations[0]
            .message
            .contains("Unauthorized operation: execute")
    );
}

#[tokio::test]
async fn network_follows_level_policy() {
    let minimal = manager(IsolationLevel::Minimal);
    minimal.create("s1", None).await;
    assert!(minimal.validate("s1", Operation::Network).await);

    let strict = manager(IsolationLevel::Strict);
    strict.create("s2", None).await;
    assert!(!strict.validate("s2", Operation::Network).await);
}

#[tokio::test]
async fn maximum_level_allows_nothing() {
    let mgr = manager(IsolationLevel::Maximum);
    mgr.create("s1", None).await;
    assert!(!mgr.validate("s1", Operation::Read).await);
}

#[tokio::test]
async fn cpu_budget_breach_is_recorded_lazily() {
    let mgr = manager(IsolationLevel::Strict);
    mgr.create("s1", None).await;
    // Strict allows 10s of CPU; record 11s of usage.
    mgr.record_usage("s1", 1024, Duration::from_secs(11)).await;
    assert!(!mgr.validate("s1", Operation::Read).await);
    let report = mgr.terminate("s1").await.unwrap();
    assert!(report.violations[0].message.contains("CPU time budget"));
}

#[tokio::test]
async fn memory_budget_breach_is_recorded() {
    let mgr = manager(IsolationLevel::Maximum);
    mgr.create("s1", None).await;
    mgr.record_usage("s1", 33 * 1024 * 1024, Duration::ZERO).await;
    let report = mgr.terminate("s1").await.unwrap();
    assert_eq!(report.violations.len(), 1);
    assert!(report.violations[0].message.contains("memory budget"));
}

#[tokio::test]
async fn violations_are_published_on_the_bus() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let mgr = IsolationManager::new(IsolationLevel::Standard, bus);
    mgr.create("s1", None).await;
    assert!(!mgr.validate("s1", Operation::Write).await);
    let event = rx.recv().await.unwrap();
    assert_eq!(event.topic(), "isolation.violation");
}

#[tokio::test]
async fn terminate_removes_the_session() {
    let mgr = manager(IsolationLevel::Standard);
    mgr.create("s1", Some(IsolationLevel::Minimal)).await;
    assert_eq!(mgr.active_sessions().await, 1);
    assert!(mgr.terminate("s1").await.is_some());
    assert_eq!(mgr.active_sessions().await, 0);
    assert!(mgr.terminate("s1").await.is_none());
}

#[test]
fn budgets_decrease_with_level() {
    let minimal = limits_for(IsolationLevel::Minimal);
    let standard = limits_for(IsolationLevel::Standard);
    let strict = limits_for(IsolationLevel::Strict);
    let maximum = limits_for(IsolationLevel::Maximum);
    assert!(minimal.max_memory_bytes > standard.max_memory_bytes);
    assert!(standard.max_memory_bytes > strict.max_memory_bytes);
    assert!(strict.max_memory_bytes > maximum.max_memory_bytes);
    assert!(minimal.max_cpu_time > maximum.max_cpu_time);
    assert!(maximum.allowed_operations.is_empty());
}
