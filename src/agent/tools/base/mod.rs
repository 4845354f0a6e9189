use crate::config::SecurityLevel;
use crate::isolation::Operation;
use crate::providers::base::ToolSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::time::Duration;

/// Execution category driving batch scheduling. Categories run in a fixed
/// order (fast, file, network, heavy) with per-category concurrency caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Fast,
    File,
    Network,
    Heavy,
}

/// Classify a tool by name heuristics. Anything unrecognized is heavy and
/// therefore serialized.
pub fn classify_tool(name: &str) -> ToolCategory {
    let lower = name.to_lowercase();
    if ["list", "status", "analyze"].iter().any(|k| lower.contains(k)) {
        ToolCategory::Fast
    } else if ["read", "write"].iter().any(|k| lower.contains(k)) {
        ToolCategory::File
    } else if ["search", "web", "research"].iter().any(|k| lower.contains(k)) {
        ToolCategory::Network
    } else {
        ToolCategory::Heavy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Static, tagged parameter descriptor, fixed at registration. Replaces
/// runtime schema introspection: validation and default injection read
/// this table, and the wire-facing JSON schema is generated from it.
#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ParamDescriptor {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    pub fn optional(
        name: &'static str,
        kind: ParamKind,
        default: Option<Value>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            required: false,
            default,
            description,
        }
    }
}

/// Context passed to every tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub request_id: String,
    pub session_id: String,
    pub workspace: PathBuf,
    pub security_level: SecurityLevel,
}

/// Canonical record of one tool execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ToolExecutionResult {
    pub fn success(tool_name: &str, result: String, elapsed: Duration) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(tool_name: &str, error: String, elapsed: Duration) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            success: false,
            result: None,
            error: Some(error),
            execution_time_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> &'static [ParamDescriptor];

    /// Operations this tool performs, checked against the session's
    /// isolation budget before execution.
    fn required_operations(&self) -> &'static [Operation];

    /// Highest security level at which this tool may still run.
    fn max_security_level(&self) -> SecurityLevel {
        SecurityLevel::Maximum
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String>;

    /// Per-tool timeout override.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether successful results may be cached. Mutating tools must
    /// return false.
    fn cacheable(&self) -> bool {
        false
    }

    /// Wire-facing schema generated from the static descriptors.
    fn spec(&self) -> ToolSpec {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in self.parameters() {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.kind.type_name()));
            if !param.description.is_empty() {
                prop.insert("description".into(), json!(param.description));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.to_string(), Value::Object(prop));
            if param.required {
                required.push(param.name);
            }
        }
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Validate arguments against a tool's descriptors and inject defaults.
/// Returns the normalized argument object or a list of problems.
pub fn validate_args(
    descriptors: &[ParamDescriptor],
    args: &Value,
) -> Result<Value, Vec<String>> {
    let mut problems = Vec::new();
    let Some(map) = args.as_object() else {
        return Err(vec![format!("arguments must be an object, got {args}")]);
    };
    let mut normalized = map.clone();

    for param in descriptors {
        match normalized.get(param.name) {
            Some(value) if value.is_null() => {
                if let Some(default) = &param.default {
                    normalized.insert(param.name.to_string(), default.clone());
                } else if param.required {
                    problems.push(format!("missing required field '{}'", param.name));
                }
            }
            Some(value) => {
                if !param.kind.matches(value) {
                    problems.push(format!(
                        "field '{}' should be {}, got {value}",
                        param.name,
                        param.kind.type_name()
                    ));
                }
            }
            None => {
                if let Some(default) = &param.default {
                    normalized.insert(param.name.to_string(), default.clone());
                } else if param.required {
                    problems.push(format!("missing required field '{}'", param.name));
                }
            }
        }
    }

    if problems.is_empty() {
        Ok(Value::Object(normalized))
    } else {
        Err(problems)
    }
}
