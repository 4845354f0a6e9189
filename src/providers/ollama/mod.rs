use crate::errors::CrucibleError;
use crate::providers::base::{
    ChunkStream, Message, ProviderAdapter, ProviderCapabilities, Request, Response,
    ResponseTimeClass, Role, StreamChunk, ToolCall, Usage,
};
use crate::providers::errors::{check_response, lower_transport_error};
use crate::request::{ReplyParts, assemble_response, normalize_finish_reason};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PROVIDER_NAME: &str = "ollama";
const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 300;
const FALLBACK_MODEL: &str = "llama3.1";

/// Adapter for a locally hosted Ollama daemon.
///
/// Wire dialect: `POST /api/chat` (single JSON object, or newline-delimited
/// JSON when streaming) and `GET /api/tags` as the availability probe.
/// Ollama emits tool calls whole, with arguments as a JSON object, so the
/// streaming path synthesizes call ids and passes each call as one delta.
pub struct OllamaAdapter {
    base_url: String,
    default_model: String,
    probe_timeout: Duration,
    client: Client,
}

impl OllamaAdapter {
    pub fn new(base_url: String, default_model: Option<String>, probe_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: default_model.unwrap_or_else(|| FALLBACK_MODEL.to_string()),
            probe_timeout,
            client: Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    fn build_payload(&self, req: &Request, stream: bool) -> Value {
        let messages: Vec<Value> = req.conversation().iter().map(wire_message).collect();
        let mut payload = json!({
            "model": req.model.as_deref().unwrap_or(&self.default_model),
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": req.temperature,
                "num_predict": req.max_tokens,
            }
        });
        if !req.tools.is_empty() {
            payload["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        payload
    }

    fn parse_reply(json: &Value) -> ReplyParts {
        let message = &json["message"];
        ReplyParts {
            content: message["content"].as_str().map(str::to_string),
            tool_calls: parse_tool_calls(message),
            usage: parse_usage(json),
            finish_reason: json["done_reason"].as_str().map(str::to_string),
            model: json["model"].as_str().map(str::to_string),
            confidence: None,
        }
    }
}

fn wire_message(msg: &Message) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut m = json!({ "role": role, "content": msg.content });
    if let Some(calls) = &msg.tool_calls {
        m["tool_calls"] = Value::Array(
            calls
                .iter()
                .map(|c| {
                    json!({
                        "function": {
                            "name": c.name,
                            "arguments": c.parsed_arguments(),
                        }
                    })
                })
                .collect(),
        );
    }
    m
}

/// Ollama tool calls carry no ids; assign `call_<n>` by position.
fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(calls) = message["tool_calls"].as_array() else {
        return vec![];
    };
    calls
        .iter()
        .enumerate()
        .map(|(i, call)| {
            let function = &call["function"];
            ToolCall {
                id: format!("call_{i}"),
                name: function["name"].as_str().unwrap_or_default().to_string(),
                arguments: serde_json::to_string(&function["arguments"])
                    .unwrap_or_else(|_| "{}".to_string()),
            }
        })
        .collect()
}

fn parse_usage(json: &Value) -> Option<Usage> {
    let prompt = json["prompt_eval_count"].as_u64()?;
    let completion = json["eval_count"].as_u64().unwrap_or(0);
    Some(Usage::new(prompt, completion))
}

/// Carry buffer for newline-delimited JSON frames.
#[derive(Default)]
struct NdjsonBuffer {
    pending: String,
}

impl NdjsonBuffer {
    fn push(&mut self, chunk: &str) -> Vec<Value> {
        self.pending.push_str(chunk);
        let mut frames = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => frames.push(value),
                Err(e) => warn!(provider = PROVIDER_NAME, "dropping malformed frame: {e}"),
            }
        }
        frames
    }
}

/// Convert one NDJSON frame into raw stream chunks. A frame with
/// `done = true` carries usage and the finish reason; tool-call frames
/// arrive whole, one delta per call.
fn convert_frame(frame: &Value, tool_call_count: &mut usize) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    let message = &frame["message"];

    if let Some(content) = message["content"].as_str()
        && !content.is_empty()
    {
        chunks.push(StreamChunk::Content(content.to_string()));
    }
    for call in parse_tool_calls(message) {
        let slot = *tool_call_count;
        *tool_call_count += 1;
        chunks.push(StreamChunk::ToolCallDelta {
            slot,
            id: Some(format!("call_{slot}")),
            name: Some(call.name),
            arguments: call.arguments,
        });
    }
    if frame["done"].as_bool() == Some(true) {
        if let Some(usage) = parse_usage(frame) {
            chunks.push(StreamChunk::Usage(usage));
        }
        let had_tool_calls = *tool_call_count > 0;
        chunks.push(StreamChunk::Finish(normalize_finish_reason(
            frame["done_reason"].as_str(),
            had_tool_calls,
        )));
    }
    chunks
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn is_available(&self) -> bool {
        let probe = self
            .client
            .get(self.tags_url())
            .timeout(self.probe_timeout)
            .send();
        match probe.await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(provider = PROVIDER_NAME, "probe failed: {e}");
                false
            }
        }
    }

    async fn request(&self, req: &Request) -> Result<Response, CrucibleError> {
        let started = Instant::now();
        let payload = self.build_payload(req, false);
        let response = self
            .client
            .post(self.chat_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| lower_transport_error(PROVIDER_NAME, &e))?;
        let json = check_response(PROVIDER_NAME, response).await?;
        let parts = Self::parse_reply(&json);
        Ok(assemble_response(req, PROVIDER_NAME, parts, started.elapsed()))
    }

    async fn stream(&self, req: &Request) -> Result<ChunkStream, CrucibleError> {
        let payload = self.build_payload(req, true);
        let response = self
            .client
            .post(self.chat_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| lower_transport_error(PROVIDER_NAME, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CrucibleError::ProviderProtocol {
                provider: PROVIDER_NAME.to_string(),
                message: format!("HTTP {} on stream open: {}", status.as_u16(), body),
            });
        }

        let stream = response
            .bytes_stream()
            .scan(
                (NdjsonBuffer::default(), 0usize),
                |(buffer, tool_calls), chunk| {
                    let out: Vec<Result<StreamChunk, CrucibleError>> = match chunk {
                        Ok(bytes) => buffer
                            .push(&String::from_utf8_lossy(&bytes))
                            .iter()
                            .flat_map(|frame| convert_frame(frame, tool_calls))
                            .map(Ok)
                            .collect(),
                        Err(e) => {
                            warn!(provider = PROVIDER_NAME, "stream read failed: {e}");
                            vec![Err(lower_transport_error(PROVIDER_NAME, &e))]
                        }
                    };
                    futures_util::future::ready(Some(out))
                },
            )
            .flat_map(futures_util::stream::iter);

        Ok(Box::pin(stream))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            strengths: vec!["reasoning".into(), "long-context".into()],
            optimal_for: vec!["complex analysis".into(), "larger models".into()],
            response_time_class: ResponseTimeClass::Medium,
            context_window: 131_072,
            supports_streaming: true,
            max_concurrent: 2,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, CrucibleError> {
        let response = self
            .client
            .get(self.tags_url())
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| lower_transport_error(PROVIDER_NAME, &e))?;
        let json = check_response(PROVIDER_NAME, response).await?;
        Ok(json["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}
