use chrono::{DateTime, Utc};

/// Typed events published on the in-process bus.
///
/// Delivery is at-most-once and best-effort: slow subscribers lose events
/// rather than back-pressuring publishers. Handlers must be fast or enqueue
/// their own work.
#[derive(Debug, Clone)]
pub enum Event {
    RoutingDecision {
        request_id: String,
        provider: String,
        confidence: f64,
        fallback_chain: Vec<String>,
    },
    ProviderPerformance {
        provider: String,
        success: bool,
        latency_ms: u64,
    },
    ToolStarted {
        request_id: String,
        tool: String,
    },
    ToolCompleted {
        request_id: String,
        tool: String,
        success: bool,
        execution_time_ms: u64,
    },
    StreamStarted {
        request_id: String,
        provider: String,
    },
    StreamToken {
        request_id: String,
        index: u64,
    },
    StreamCompleted {
        request_id: String,
        token_count: u64,
        cancelled: bool,
    },
    IsolationViolation {
        session_id: String,
        violation: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Topic label used in logs.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::RoutingDecision { .. } => "routing.decision",
            Self::ProviderPerformance { .. } => "provider.performance",
            Self::ToolStarted { .. } => "tool.started",
            Self::ToolCompleted { .. } => "tool.completed",
            Self::StreamStarted { .. } => "stream.started",
            Self::StreamToken { .. } => "stream.token",
            Self::StreamCompleted { .. } => "stream.completed",
            Self::IsolationViolation { .. } => "isolation.violation",
        }
    }
}
