use crate::bus::{Event, EventBus};
use crate::config::IsolationLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Operations a sandboxed session may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Analyze,
    Compute,
    Network,
    Execute,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Analyze => "analyze",
            Self::Compute => "compute",
            Self::Network => "network",
            Self::Execute => "execute",
        };
        write!(f, "{s}")
    }
}

/// Resource and capability budget for one isolation level.
#[derive(Debug, Clone, Copy)]
pub struct IsolationLimits {
    pub max_memory_bytes: u64,
    pub max_cpu_time: Duration,
    pub allowed_operations: &'static [Operation],
    pub network_allowed: bool,
}

const MB: u64 = 1024 * 1024;

pub fn limits_for(level: IsolationLevel) -> IsolationLimits {
    match level {
        IsolationLevel::Minimal => IsolationLimits {
            max_memory_bytes: 256 * MB,
            max_cpu_time: Duration::from_secs(30),
            allowed_operations: &[Operation::Read, Operation::Analyze, Operation::Compute],
            network_allowed: true,
        },
        IsolationLevel::Standard => IsolationLimits {
            max_memory_bytes: 128 * MB,
            max_cpu_time: Duration::from_secs(15),
            allowed_operations: &[Operation::Read, Operation::Analyze],
            network_allowed: false,
        },
        IsolationLevel::Strict => IsolationLimits {
            max_memory_bytes: 64 * MB,
            max_cpu_time: Duration::from_secs(10),
            allowed_operations: &[Operation::Read],
            network_allowed: false,
        },
        IsolationLevel::Maximum => IsolationLimits {
            max_memory_bytes: 32 * MB,
            max_cpu_time: Duration::from_secs(5),
            allowed_operations: &[],
            network_allowed: false,
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Session-scoped budget accounting. Append-only violation log; once any
/// violation is recorded, every subsequent operation is rejected.
#[derive(Debug)]
pub struct IsolationContext {
    pub agent_id: String,
    pub session_id: String,
    pub level: IsolationLevel,
    pub started_at: DateTime<Utc>,
    memory_used: u64,
    cpu_time_used: Duration,
    violations: Vec<Violation>,
}

impl IsolationContext {
    fn new(agent_id: String, session_id: String, level: IsolationLevel) -> Self {
        Self {
            agent_id,
            session_id,
            level,
            started_at: Utc::now(),
            memory_used: 0,
            cpu_time_used: Duration::ZERO,
            violations: Vec::new(),
        }
    }

    fn record_violation(&mut self, message: String) -> Violation {
        warn!(
            session = %self.session_id,
            violation = %message,
            "isolation violation"
        );
        let violation = Violation {
            message,
            at: Utc::now(),
        };
        self.violations.push(violation.clone());
        violation
    }

    /// Approve or reject an operation against the session budget. Any
    /// rejection is recorded; a session with a prior violation approves
    /// nothing.
    pub fn validate_operation(&mut self, op: Operation) -> bool {
        if !self.violations.is_empty() {
            self.record_violation(format!("operation '{op}' after prior violation"));
            return false;
        }
        let limits = limits_for(self.level);
        if op == Operation::Network && !limits.network_allowed {
            self.record_violation(format!("Unauthorized operation: {op}"));
            return false;
        }
        if op != Operation::Network && !limits.allowed_operations.contains(&op) {
            self.record_violation(format!("Unauthorized operation: {op}"));
            return false;
        }
        if self.cpu_time_used > limits.max_cpu_time {
            self.record_violation(format!(
                "CPU time budget exceeded: {:?} > {:?}",
                self.cpu_time_used, limits.max_cpu_time
            ));
            return false;
        }
        if self.memory_used > limits.max_memory_bytes {
            self.record_violation(format!(
                "memory budget exceeded: {} > {} bytes",
                self.memory_used, limits.max_memory_bytes
            ));
            return false;
        }
        true
    }

    /// Record observed usage samples and lazily flag budget breaches.
    pub fn enforce_resource_limits(&mut self, memory_bytes: u64, cpu_time: Duration) {
        self.memory_used = self.memory_used.max(memory_bytes);
        self.cpu_time_used += cpu_time;
        let limits = limits_for(self.level);
        if self.violations.is_empty() {
            if self.memory_used > limits.max_memory_bytes {
                self.record_violation(format!(
                    "memory budget exceeded: {} > {} bytes",
                    self.memory_used, limits.max_memory_bytes
                ));
            } else if self.cpu_time_used > limits.max_cpu_time {
                self.record_violation(format!(
                    "CPU time budget exceeded: {:?} > {:?}",
                    self.cpu_time_used, limits.max_cpu_time
                ));
            }
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    fn report(&self) -> IsolationReport {
        IsolationReport {
            agent_id: self.agent_id.clone(),
            session_id: self.session_id.clone(),
            level: self.level,
            started_at: self.started_at,
            memory_used: self.memory_used,
            cpu_time_used_ms: self.cpu_time_used.as_millis() as u64,
            violations: self.violations.clone(),
        }
    }
}

/// Final accounting produced when a context is terminated.
#[derive(Debug, Clone, Serialize)]
pub struct IsolationReport {
    pub agent_id: String,
    pub session_id: String,
    pub level: IsolationLevel,
    pub started_at: DateTime<Utc>,
    pub memory_used: u64,
    pub cpu_time_used_ms: u64,
    pub violations: Vec<Violation>,
}

/// Process-wide session map. Mutations are serialized behind one async
/// mutex; the lock is never held across tool execution.
pub struct IsolationManager {
    sessions: Mutex<HashMap<String, IsolationContext>>,
    default_level: IsolationLevel,
    bus: EventBus,
}

impl IsolationManager {
    pub fn new(default_level: IsolationLevel, bus: EventBus) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_level,
            bus,
        }
    }

    pub async fn create(&self, session_id: &str, level: Option<IsolationLevel>) {
        let level = level.unwrap_or(self.default_level);
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| IsolationContext::new(uuid_short(), session_id.to_string(), level));
    }

    /// Validate an operation for a session; unknown sessions get a context
    /// at the default level.
    pub async fn validate(&self, session_id: &str, op: Operation) -> bool {
        let mut sessions = self.sessions.lock().await;
        let ctx = sessions.entry(session_id.to_string()).or_insert_with(|| {
            IsolationContext::new(uuid_short(), session_id.to_string(), self.default_level)
        });
        let approved = ctx.validate_operation(op);
        if !approved && let Some(violation) = ctx.violations().last() {
            self.bus.publish(Event::IsolationViolation {
                session_id: session_id.to_string(),
                violation: violation.message.clone(),
                at: violation.at,
            });
        }
        approved
    }

    pub async fn record_usage(&self, session_id: &str, memory_bytes: u64, cpu_time: Duration) {
        let mut sessions = self.sessions.lock().await;
        if let Some(ctx) = sessions.get_mut(session_id) {
            let had = ctx.violations().len();
            ctx.enforce_resource_limits(memory_bytes, cpu_time);
            if ctx.violations().len() > had
                && let Some(violation) = ctx.violations().last()
            {
                self.bus.publish(Event::IsolationViolation {
                    session_id: session_id.to_string(),
                    violation: violation.message.clone(),
                    at: violation.at,
                });
            }
        }
    }

    /// Remove a session and return its final report.
    pub async fn terminate(&self, session_id: &str) -> Option<IsolationReport> {
        let mut sessions = self.sessions.lock().await;
        let ctx = sessions.remove(session_id)?;
        let report = ctx.report();
        info!(
            session = session_id,
            violations = report.violations.len(),
            "isolation context terminated"
        );
        Some(report)
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn uuid_short() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests;
