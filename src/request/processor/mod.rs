use crate::config::Config;
use crate::errors::CrucibleError;
use crate::providers::base::{Message, Priority, Request, RequestContext, Role, ToolSpec};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Rough chars-per-token ratio used for context trimming.
const CHARS_PER_TOKEN: usize = 4;

/// Incoming request shape before normalization. Everything optional except
/// the content itself; the processor fills defaults and validates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RequestDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl RequestDraft {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }
}

/// Normalizes incoming requests: validation, default injection, path
/// sanitization, and context trimming. A request that comes back from
/// `accept` is immutable downstream.
pub struct RequestProcessor {
    max_input_length: usize,
    allowed_roots: Vec<PathBuf>,
    restricted_paths: Vec<PathBuf>,
    default_timeout: Duration,
    default_security_level: crate::config::SecurityLevel,
    context_ceiling_tokens: usize,
}

impl RequestProcessor {
    pub fn new(config: &Config) -> Self {
        let mut allowed_roots = config.security.allowed_paths.clone();
        allowed_roots.push(config.workspace_path());
        Self {
            max_input_length: config.security.max_input_length,
            allowed_roots,
            restricted_paths: config.security.restricted_paths.clone(),
            default_timeout: config.request_timeout(),
            default_security_level: config.security.level,
            context_ceiling_tokens: config.agent.context_ceiling_tokens,
        }
    }

    pub fn accept(&self, draft: RequestDraft) -> Result<Request, CrucibleError> {
        let prompt = draft.prompt.unwrap_or_default();
        if prompt.is_empty() && draft.messages.is_empty() {
            return Err(CrucibleError::Validation(
                "request needs a prompt or at least one message".to_string(),
            ));
        }
        if prompt.len() > self.max_input_length {
            return Err(CrucibleError::Validation(format!(
                "prompt is {} bytes, limit is {}",
                prompt.len(),
                self.max_input_length
            )));
        }

        let mut seen = HashSet::new();
        for tool in &draft.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(CrucibleError::Validation(format!(
                    "duplicate tool name '{}'",
                    tool.name
                )));
            }
        }

        validate_tool_message_links(&draft.messages)?;

        if let Some(t) = draft.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(CrucibleError::Validation(format!(
                "temperature must be in [0, 2], got {t}"
            )));
        }

        let mut context = draft.context.unwrap_or_else(|| RequestContext {
            security_level: self.default_security_level,
            ..Default::default()
        });
        if let Some(dir) = &context.working_directory {
            self.check_path(dir)?;
        }
        for file in &context.files {
            self.check_path(file)?;
        }
        if context.session_id.is_none() {
            context.session_id = Some(Uuid::new_v4().to_string());
        }

        let messages = self.trim_messages(draft.messages);

        let request = Request {
            id: draft.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            prompt,
            model: draft.model,
            provider: draft.provider,
            temperature: draft.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: draft.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            stream: draft.stream,
            tools: draft.tools,
            messages,
            context,
            timeout: draft
                .timeout_secs
                .map_or(self.default_timeout, Duration::from_secs),
            priority: draft.priority.unwrap_or_default(),
        };
        debug!(request_id = %request.id, "request accepted");
        Ok(request)
    }

    /// Reject traversal components and paths outside the allowed roots.
    fn check_path(&self, path: &Path) -> Result<(), CrucibleError> {
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(CrucibleError::Validation(format!(
                "path '{}' contains a traversal component",
                path.display()
            )));
        }
        for restricted in &self.restricted_paths {
            if path.starts_with(restricted) {
                return Err(CrucibleError::Validation(format!(
                    "path '{}' is restricted",
                    path.display()
                )));
            }
        }
        if path.is_absolute() && !self.allowed_roots.iter().any(|root| path.starts_with(root)) {
            return Err(CrucibleError::Validation(format!(
                "path '{}' is outside the allowed roots",
                path.display()
            )));
        }
        Ok(())
    }

    /// Drop oldest messages until the estimated token count fits the
    /// context ceiling. The most recent user message is never dropped, and
    /// tool results are only removed together with the assistant call they
    /// answer (orphans are stripped afterwards).
    fn trim_messages(&self, messages: Vec<Message>) -> Vec<Message> {
        let budget = self.context_ceiling_tokens;
        if estimate_tokens(&messages) <= budget {
            return messages;
        }

        let last_user = messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(messages.len());

        let mut kept: Vec<Option<Message>> = messages.into_iter().map(Some).collect();
        for i in 0..kept.len() {
            if i == last_user {
                continue;
            }
            let total: usize = kept.iter().flatten().map(estimate_message_tokens).sum();
            if total <= budget {
                break;
            }
            kept[i] = None;
        }

        let trimmed: Vec<Message> = kept.into_iter().flatten().collect();
        strip_orphaned_tool_messages(trimmed)
    }
}

fn validate_tool_message_links(messages: &[Message]) -> Result<(), CrucibleError> {
    let mut known_call_ids: HashSet<&str> = HashSet::new();
    for message in messages {
        if let Some(calls) = &message.tool_calls {
            known_call_ids.extend(calls.iter().map(|c| c.id.as_str()));
        }
        if message.role == Role::Tool {
            let id = message.tool_call_id.as_deref().ok_or_else(|| {
                CrucibleError::Validation("tool message is missing tool_call_id".to_string())
            })?;
            if !known_call_ids.contains(id) {
                return Err(CrucibleError::Validation(format!(
                    "tool message references unknown tool call '{id}'"
                )));
            }
        }
    }
    Ok(())
}

/// Remove tool messages whose assistant call was trimmed away.
fn strip_orphaned_tool_messages(messages: Vec<Message>) -> Vec<Message> {
    let known_call_ids: HashSet<String> = messages
        .iter()
        .filter_map(|m| m.tool_calls.as_ref())
        .flatten()
        .map(|c| c.id.clone())
        .collect();
    messages
        .into_iter()
        .filter(|m| {
            m.role != Role::Tool
                || m.tool_call_id
                    .as_ref()
                    .is_some_and(|id| known_call_ids.contains(id))
        })
        .collect()
}

fn estimate_message_tokens(message: &Message) -> usize {
    message.content.len() / CHARS_PER_TOKEN + 4
}

fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
