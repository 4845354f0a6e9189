use serde::Serialize;
use thiserror::Error;

/// Typed error hierarchy for crucible.
///
/// Use at module boundaries (provider calls, routing, tool execution, search,
/// isolation). Internal/leaf functions can continue using `anyhow::Result` —
/// the `Internal` variant allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum CrucibleError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no tool-capable provider available for this request")]
    NoToolCapableProvider,

    #[error("provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("provider '{provider}' timed out after {elapsed_ms}ms")]
    ProviderTimeout { provider: String, elapsed_ms: u64 },

    #[error("provider '{provider}' protocol error: {message}")]
    ProviderProtocol { provider: String, message: String },

    #[error("tool '{tool}' rejected arguments: {message}")]
    ToolValidation { tool: String, message: String },

    #[error("tool '{tool}' failed: {message}")]
    ToolExecution {
        tool: String,
        message: String,
        recoverable: bool,
    },

    #[error("could not parse reasoning output: {0}")]
    ReasoningParse(String),

    #[error("reasoning budget of {budget} steps exhausted")]
    ReasoningBudgetExceeded { budget: usize },

    #[error("search timed out after {elapsed_ms}ms")]
    SearchTimeout { elapsed_ms: u64 },

    #[error("isolation violation in session '{session}': {message}")]
    IsolationViolation { session: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Broad classification used for logging, metrics, and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Configuration,
    Network,
    ExternalApi,
    ToolExecution,
    Security,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Caller-visible error shape for non-recoverable failures.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub suggestions: Vec<&'static str>,
}

impl CrucibleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::NoToolCapableProvider => "NO_TOOL_CAPABLE_PROVIDER",
            Self::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            Self::ProviderTimeout { .. } => "PROVIDER_TIMEOUT",
            Self::ProviderProtocol { .. } => "PROVIDER_PROTOCOL_ERROR",
            Self::ToolValidation { .. } => "TOOL_VALIDATION_ERROR",
            Self::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            Self::ReasoningParse(_) => "REASONING_PARSE_FAILURE",
            Self::ReasoningBudgetExceeded { .. } => "REASONING_BUDGET_EXCEEDED",
            Self::SearchTimeout { .. } => "SEARCH_TIMEOUT",
            Self::IsolationViolation { .. } => "ISOLATION_VIOLATION",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::ToolValidation { .. } => ErrorCategory::Validation,
            Self::Configuration(_) | Self::NoToolCapableProvider => ErrorCategory::Configuration,
            Self::ProviderTimeout { .. } => ErrorCategory::Network,
            Self::ProviderUnavailable { .. } | Self::ProviderProtocol { .. } => {
                ErrorCategory::ExternalApi
            }
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::IsolationViolation { .. } => ErrorCategory::Security,
            Self::ReasoningParse(_)
            | Self::ReasoningBudgetExceeded { .. }
            | Self::SearchTimeout { .. }
            | Self::Cancelled
            | Self::Internal(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Cancelled => Severity::Low,
            Self::Configuration(_)
            | Self::NoToolCapableProvider
            | Self::ProviderProtocol { .. }
            | Self::IsolationViolation { .. } => Severity::High,
            Self::Internal(_) => Severity::Critical,
            _ => Severity::Medium,
        }
    }

    /// Whether the failure is transient and the operation may be retried
    /// (against a fallback provider or search strategy).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ProviderUnavailable { .. }
            | Self::ProviderTimeout { .. }
            | Self::ProviderProtocol { .. }
            | Self::SearchTimeout { .. } => true,
            Self::ToolExecution { recoverable, .. } => *recoverable,
            Self::Internal(_) => true,
            _ => false,
        }
    }

    fn suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Validation(_) => vec!["check the request fields and retry"],
            Self::Configuration(_) => {
                vec!["inspect ~/.crucible/config.toml", "run `crucible status`"]
            }
            Self::NoToolCapableProvider => vec![
                "enable a tool-capable provider in config",
                "load a tool-capable model in the backend",
            ],
            Self::ProviderUnavailable { .. } | Self::ProviderTimeout { .. } => vec![
                "verify the backend is running",
                "run `crucible status` to see provider health",
            ],
            Self::ReasoningBudgetExceeded { .. } => {
                vec!["break the task into smaller requests"]
            }
            Self::IsolationViolation { .. } => {
                vec!["lower the requested operation set or raise the isolation level"]
            }
            _ => vec![],
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
            category: self.category(),
            severity: self.severity(),
            suggestions: self.suggestions(),
        }
    }
}
