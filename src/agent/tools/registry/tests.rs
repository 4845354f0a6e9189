use super::*;
use crate::agent::tools::base::ParamDescriptor;
use crate::agent::tools::filesystem::{ListFilesTool, ReadFileTool, WriteFileTool};
use crate::bus::EventBus;
use crate::config::{IsolationLevel, SecurityLevel};
use crate::isolation::Operation;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::LazyLock;

fn registry(level: IsolationLevel) -> ToolRegistry {
    let isolation = Arc::new(IsolationManager::new(level, EventBus::default()));
    let mut registry = ToolRegistry::new(isolation);
    registry.register(Arc::new(ListFilesTool));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry
}

fn ctx(security_level: SecurityLevel) -> ToolContext {
    ToolContext {
        request_id: "r1".into(),
        session_id: "s1".into(),
        workspace: PathBuf::from("/tmp"),
        security_level,
    }
}

#[test]
fn specs_are_sorted_by_name() {
    let registry = registry(IsolationLevel::Minimal);
    let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["list_files", "read_file", "write_file"]);
}

#[test]
fn unknown_tool_is_a_validation_error() {
    let registry = registry(IsolationLevel::Minimal);
    let err = registry
        .validate("frobnicate", &serde_json::json!({}))
        .unwrap_err();
    assert_eq!(err.code(), "TOOL_VALIDATION_ERROR");
}

#[test]
fn validate_injects_defaults() {
    let registry = registry(IsolationLevel::Minimal);
    let normalized = registry
        .validate("list_files", &serde_json::json!({}))
        .unwrap();
    assert_eq!(normalized["path"], ".");
}

#[test]
fn validate_reports_missing_required() {
    let registry = registry(IsolationLevel::Minimal);
    let err = registry
        .validate("write_file", &serde_json::json!({"path": "a.rs"}))
        .unwrap_err();
    assert!(err.to_string().contains("content"));
}

#[tokio::test]
async fn write_blocked_at_high_security() {
    let registry = registry(IsolationLevel::Minimal);
    let err = registry
        .can_execute("write_file", &ctx(SecurityLevel::High))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TOOL_VALIDATION_ERROR");

    assert!(
        registry
            .can_execute("read_file", &ctx(SecurityLevel::High))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn isolation_budget_gates_operations() {
    // Standard isolation allows read/analyze but not write.
    let registry = registry(IsolationLevel::Standard);
    assert!(
        registry
            .can_execute("read_file", &ctx(SecurityLevel::Low))
            .await
            .is_ok()
    );
    let err = registry
        .can_execute("write_file", &ctx(SecurityLevel::Low))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ISOLATION_VIOLATION");
}

struct ShoutTool;

static NO_PARAMS: LazyLock<Vec<ParamDescriptor>> = LazyLock::new(Vec::new);

#[async_trait]
impl Tool for ShoutTool {
    fn name(&self) -> &'static str {
        "list_files"
    }
    fn description(&self) -> &'static str {
        "duplicate name on purpose"
    }
    fn parameters(&self) -> &'static [ParamDescriptor] {
        &NO_PARAMS
    }
    fn required_operations(&self) -> &'static [Operation] {
        &[]
    }
    async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> anyhow::Result<String> {
        Ok("SHOUT".into())
    }
}

#[test]
fn duplicate_registration_overwrites() {
    let mut registry = registry(IsolationLevel::Minimal);
    registry.register(Arc::new(ShoutTool));
    let tool = registry.get("list_files").unwrap();
    assert_eq!(tool.description(), "duplicate name on purpose");
}

