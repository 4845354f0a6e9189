use crate::config::SecurityLevel;
use crate::errors::CrucibleError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Messages and tool calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured function invocation produced by the model. `arguments` is
/// the raw JSON argument string as the provider emitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn parsed_arguments(&self) -> Value {
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For `role = tool` messages: the assistant tool-call id being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Wire-facing description of a tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema-like parameter object.
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub security_level: SecurityLevel,
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// An accepted request. Immutable once it leaves the request processor:
/// every downstream component reads it, none mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context: RequestContext,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default)]
    pub priority: Priority,
}

impl Request {
    /// The conversation to send: explicit `messages`, or the bare prompt
    /// wrapped as a single user message.
    pub fn conversation(&self) -> Vec<Message> {
        if self.messages.is_empty() {
            vec![Message::user(self.prompt.clone())]
        } else {
            self.messages.clone()
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Error,
}

/// Canonical provider response. `content` and `tool_calls` may both be
/// present (textual reasoning alongside calls); at least one is the primary
/// payload, matching `finish_reason`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub content: String,
    pub model: String,
    pub provider: String,
    pub usage: Usage,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    #[serde(with = "duration_secs")]
    pub response_time: Duration,
    /// Provider-native confidence, when the adapter reports one. When
    /// absent the hybrid executor derives a value from response shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Response {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Metadata attached to the terminal token of a stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenMetadata {
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// One unit of streamed output. `index` is assigned by the pipeline,
/// strictly increasing from 0; exactly one token per stream carries
/// `is_complete = true` and it is the last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamToken {
    pub content: String,
    pub is_complete: bool,
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TokenMetadata>,
}

/// Raw delta emitted by an adapter's streaming endpoint, before the
/// pipeline assigns indices and reassembles tool calls.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Content(String),
    /// A fragment of a function call. `slot` groups fragments belonging to
    /// the same call; `id`/`name` arrive on the first fragment for a slot.
    ToolCallDelta {
        slot: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Usage(Usage),
    Finish(FinishReason),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, CrucibleError>> + Send>>;

// ---------------------------------------------------------------------------
// Capabilities and health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseTimeClass {
    Fast,
    Medium,
    Slow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub strengths: Vec<String>,
    pub optimal_for: Vec<String>,
    pub response_time_class: ResponseTimeClass,
    pub context_window: u32,
    pub supports_streaming: bool,
    pub max_concurrent: u32,
}

/// Mutable health snapshot, written by adapters and the executor, read by
/// the router. Readers may observe slightly stale values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub available: bool,
    pub current_load: u32,
    pub max_load: u32,
    pub avg_response_time_ms: f64,
    pub error_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Uniform contract over a model backend. Adapters translate the canonical
/// request/response types to their wire dialect and lower every failure
/// into the error taxonomy; they never silently substitute a model.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Unique provider name ("lm-studio", "ollama").
    fn name(&self) -> &str;

    /// Availability probe, bounded by the configured probe timeout.
    async fn is_available(&self) -> bool;

    /// Non-streaming completion.
    async fn request(&self, req: &Request) -> Result<Response, CrucibleError>;

    /// Streaming completion, as raw deltas. The streaming pipeline owns
    /// ordering, index assignment, and tool-call reassembly.
    async fn stream(&self, req: &Request) -> Result<ChunkStream, CrucibleError>;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Models the backend currently serves, for probes and `status`.
    async fn list_models(&self) -> Result<Vec<String>, CrucibleError> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests;
