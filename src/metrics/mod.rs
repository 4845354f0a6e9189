use crate::providers::base::ProviderHealth;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Consecutive failures that mark a provider unavailable.
const FAILURE_THRESHOLD: u32 = 3;
/// Cool-down before an unavailable provider is probed again.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Per-provider health and performance counters.
///
/// Hot fields are atomics so the router can read them without a lock;
/// readers tolerate slightly stale values. `last_error` and the cool-down
/// deadline sit behind a short std mutex, never held across an await.
pub struct ProviderState {
    name: String,
    max_load: u32,
    available: AtomicBool,
    current_load: AtomicU32,
    request_count: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    consecutive_failures: AtomicU32,
    total_latency_ms: AtomicU64,
    cooldown: Duration,
    inner: Mutex<StateInner>,
}

#[derive(Default)]
struct StateInner {
    last_error: Option<String>,
    unavailable_until: Option<Instant>,
}

impl ProviderState {
    pub fn new(name: impl Into<String>, max_load: u32) -> Self {
        Self {
            name: name.into(),
            max_load,
            available: AtomicBool::new(true),
            current_load: AtomicU32::new(0),
            request_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            total_latency_ms: AtomicU64::new(0),
            cooldown: DEFAULT_COOLDOWN,
            inner: Mutex::new(StateInner::default()),
        }
    }

    #[cfg(test)]
    pub fn with_cooldown(name: impl Into<String>, max_load: u32, cooldown: Duration) -> Self {
        let mut state = Self::new(name, max_load);
        state.cooldown = cooldown;
        state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Begin a provider attempt. Increments the load counter and returns a
    /// guard that decrements it on drop, so the counter is released on
    /// success, failure, panic, and cancellation alike.
    pub fn begin_attempt(self: &Arc<Self>) -> LoadGuard {
        self.current_load.fetch_add(1, Ordering::SeqCst);
        self.request_count.fetch_add(1, Ordering::Relaxed);
        LoadGuard {
            state: Arc::clone(self),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.available.store(true, Ordering::SeqCst);
    }

    pub fn record_failure(&self, error: &str) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.last_error = Some(error.to_string());
        if failures >= FAILURE_THRESHOLD {
            warn!(
                provider = %self.name,
                failures, "marking provider unavailable for cool-down"
            );
            self.available.store(false, Ordering::SeqCst);
            inner.unavailable_until = Some(Instant::now() + self.cooldown);
        }
    }

    /// Result of an explicit availability probe.
    pub fn record_probe(&self, available: bool) {
        if available {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            self.available.store(true, Ordering::SeqCst);
            let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.unavailable_until = None;
        } else {
            self.available.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Whether the cool-down has elapsed and a probe may be attempted.
    pub fn probe_due(&self) -> bool {
        if self.is_available() {
            return false;
        }
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.unavailable_until.is_none_or(|t| Instant::now() >= t)
    }

    pub fn current_load(&self) -> u32 {
        self.current_load.load(Ordering::SeqCst)
    }

    pub fn max_load(&self) -> u32 {
        self.max_load
    }

    pub fn at_capacity(&self) -> bool {
        self.current_load() >= self.max_load
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.request_count.load(Ordering::Relaxed);
        if total == 0 {
            // No data yet: assume healthy so fresh providers are routable.
            return 1.0;
        }
        self.success_count.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn error_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let successes = self.success_count.load(Ordering::Relaxed);
        if successes == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / successes as f64
    }

    pub fn health(&self) -> ProviderHealth {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        ProviderHealth {
            available: self.is_available(),
            current_load: self.current_load(),
            max_load: self.max_load,
            avg_response_time_ms: self.avg_latency_ms(),
            error_rate: self.error_rate(),
            last_error: inner.last_error.clone(),
        }
    }
}

/// RAII release of a provider's load counter.
pub struct LoadGuard {
    state: Arc<ProviderState>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.state.current_load.fetch_sub(1, Ordering::SeqCst);
    }
}

/// All provider states, keyed by name. Immutable after startup.
#[derive(Default)]
pub struct MetricsRegistry {
    providers: HashMap<String, Arc<ProviderState>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, state: ProviderState) {
        self.providers
            .insert(state.name().to_string(), Arc::new(state));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderState>> {
        self.providers.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ProviderState>)> {
        self.providers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn health_snapshot(&self) -> HashMap<String, ProviderHealth> {
        self.providers
            .iter()
            .map(|(name, state)| (name.clone(), state.health()))
            .collect()
    }
}
