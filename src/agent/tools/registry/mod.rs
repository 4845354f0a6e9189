use crate::agent::tools::base::{Tool, ToolContext, validate_args};
use crate::errors::CrucibleError;
use crate::isolation::IsolationManager;
use crate::providers::base::ToolSpec;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Holds tool definitions and owns argument validation and the
/// execution-context gate. Immutable after startup registration.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    isolation: Arc<IsolationManager>,
}

impl ToolRegistry {
    pub fn new(isolation: Arc<IsolationManager>) -> Self {
        Self {
            tools: HashMap::new(),
            isolation,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if name.is_empty() || name.len() > 256 || name.chars().any(char::is_control) {
            warn!("rejecting tool with invalid name (len={})", name.len());
            return;
        }
        if self.tools.contains_key(name) {
            warn!("overwriting duplicate tool '{name}'");
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted tool names, for prompts and diagnostics.
    pub fn tool_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Wire-facing specs for every registered tool, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Validate arguments against the tool's parameter descriptors,
    /// returning the normalized arguments (defaults injected).
    pub fn validate(&self, name: &str, args: &Value) -> Result<Value, CrucibleError> {
        let tool = self.get(name).ok_or_else(|| CrucibleError::ToolValidation {
            tool: name.to_string(),
            message: "unknown tool".to_string(),
        })?;
        validate_args(tool.parameters(), args).map_err(|problems| CrucibleError::ToolValidation {
            tool: name.to_string(),
            message: problems.join("; "),
        })
    }

    /// Gate on the execution context: the context's security level must not
    /// exceed what the tool tolerates, and the session's isolation budget
    /// must approve every operation the tool performs.
    pub async fn can_execute(&self, name: &str, ctx: &ToolContext) -> Result<(), CrucibleError> {
        let tool = self.get(name).ok_or_else(|| CrucibleError::ToolValidation {
            tool: name.to_string(),
            message: "unknown tool".to_string(),
        })?;

        if ctx.security_level > tool.max_security_level() {
            return Err(CrucibleError::ToolValidation {
                tool: name.to_string(),
                message: format!(
                    "tool not permitted at security level {:?}",
                    ctx.security_level
                ),
            });
        }

        for &op in tool.required_operations() {
            if !self.isolation.validate(&ctx.session_id, op).await {
                return Err(CrucibleError::IsolationViolation {
                    session: ctx.session_id.clone(),
                    message: format!("Unauthorized operation: {op}"),
                });
            }
        }
        Ok(())
    }

    /// Feed an observed usage sample into the session's isolation budget.
    pub async fn record_usage(
        &self,
        session_id: &str,
        memory_bytes: u64,
        cpu_time: std::time::Duration,
    ) {
        self.isolation
            .record_usage(session_id, memory_bytes, cpu_time)
            .await;
    }
}

#[cfg(test)]
mod tests;
