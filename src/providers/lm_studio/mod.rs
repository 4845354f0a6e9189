use crate::errors::CrucibleError;
use crate::providers::base::{
    ChunkStream, Message, ProviderAdapter, ProviderCapabilities, Request, Response,
    ResponseTimeClass, Role, StreamChunk, ToolCall, Usage,
};
use crate::providers::errors::{check_response, lower_transport_error};
use crate::providers::sse::{SseBuffer, SseEvent};
use crate::request::{ReplyParts, assemble_response};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PROVIDER_NAME: &str = "lm-studio";
const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 120;
const FALLBACK_MODEL: &str = "qwen2.5-coder";

/// Adapter for an OpenAI-compatible local server (LM Studio).
///
/// Wire dialect: `POST /v1/chat/completions` (JSON and SSE) and
/// `GET /v1/models` as the availability probe.
pub struct LmStudioAdapter {
    base_url: String,
    default_model: String,
    probe_timeout: Duration,
    client: Client,
}

impl LmStudioAdapter {
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

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url)
    }

    fn build_payload(&self, req: &Request, stream: bool) -> Value {
        let messages: Vec<Value> = req.conversation().iter().map(wire_message).collect();
        let mut payload = json!({
            "model": req.model.as_deref().unwrap_or(&self.default_model),
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "stream": stream,
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

    fn parse_reply(json: &Value) -> Result<ReplyParts, CrucibleError> {
        let choice = json["choices"]
            .as_array()
            .and_then(|arr| arr.first())
            .ok_or_else(|| CrucibleError::ProviderProtocol {
                provider: PROVIDER_NAME.to_string(),
                message: "no choices in completion response".to_string(),
            })?;

        let message = &choice["message"];
        let content = message["content"].as_str().map(str::to_string);

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let function = &call["function"];
                tool_calls.push(ToolCall {
                    id: call["id"].as_str().unwrap_or_default().to_string(),
                    name: function["name"].as_str().unwrap_or_default().to_string(),
                    arguments: function["arguments"].as_str().unwrap_or("{}").to_string(),
                });
            }
        }

        Ok(ReplyParts {
            content,
            tool_calls,
            usage: parse_usage(&json["usage"]),
            finish_reason: choice["finish_reason"].as_str().map(str::to_string),
            model: json["model"].as_str().map(str::to_string),
            confidence: None,
        })
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
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &msg.tool_call_id {
        m["tool_call_id"] = json!(id);
    }
    m
}

fn parse_usage(usage: &Value) -> Option<Usage> {
    let prompt = usage["prompt_tokens"].as_u64()?;
    let completion = usage["completion_tokens"].as_u64().unwrap_or(0);
    Some(Usage::new(prompt, completion))
}

/// Convert one SSE event into raw stream chunks.
fn convert_event(event: SseEvent) -> Vec<StreamChunk> {
    let Some(data) = event.data else {
        // [DONE] sentinel: the finish reason already arrived on the last
        // delta, so there is nothing left to emit.
        return vec![];
    };

    let mut chunks = Vec::new();
    if let Some(usage) = parse_usage(&data["usage"]) {
        chunks.push(StreamChunk::Usage(usage));
    }
    let Some(choice) = data["choices"].as_array().and_then(|arr| arr.first()) else {
        return chunks;
    };

    let delta = &choice["delta"];
    if let Some(content) = delta["content"].as_str()
        && !content.is_empty()
    {
        chunks.push(StreamChunk::Content(content.to_string()));
    }
    if let Some(calls) = delta["tool_calls"].as_array() {
        for call in calls {
            let function = &call["function"];
            chunks.push(StreamChunk::ToolCallDelta {
                slot: call["index"].as_u64().unwrap_or(0) as usize,
                id: call["id"].as_str().map(str::to_string),
                name: function["name"].as_str().map(str::to_string),
                arguments: function["arguments"].as_str().unwrap_or_default().to_string(),
            });
        }
    }
    if let Some(reason) = choice["finish_reason"].as_str() {
        let has_tool_calls = matches!(reason, "tool_calls" | "function_call");
        chunks.push(StreamChunk::Finish(
            crate::request::normalize_finish_reason(Some(reason), has_tool_calls),
        ));
    }
    chunks
}

#[async_trait]
impl ProviderAdapter for LmStudioAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn is_available(&self) -> bool {
        let probe = self
            .client
            .get(self.models_url())
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
            .post(self.completions_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| lower_transport_error(PROVIDER_NAME, &e))?;
        let json = check_response(PROVIDER_NAME, response).await?;
        let parts = Self::parse_reply(&json)?;
        Ok(assemble_response(req, PROVIDER_NAME, parts, started.elapsed()))
    }

    async fn stream(&self, req: &Request) -> Result<ChunkStream, CrucibleError> {
        let payload = self.build_payload(req, true);
        let response = self
            .client
            .post(self.completions_url())
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
            .scan(SseBuffer::new(), |buffer, chunk| {
                let out: Vec<Result<StreamChunk, CrucibleError>> = match chunk {
                    Ok(bytes) => buffer
                        .push(&String::from_utf8_lossy(&bytes))
                        .into_iter()
                        .flat_map(convert_event)
                        .map(Ok)
                        .collect(),
                    Err(e) => {
                        warn!(provider = PROVIDER_NAME, "stream read failed: {e}");
                        vec![Err(lower_transport_error(PROVIDER_NAME, &e))]
                    }
                };
                futures_util::future::ready(Some(out))
            })
            .flat_map(futures_util::stream::iter);

        Ok(Box::pin(stream))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            strengths: vec!["code".into(), "tool-calling".into(), "low-latency".into()],
            optimal_for: vec!["quick edits".into(), "tool-driven tasks".into()],
            response_time_class: ResponseTimeClass::Fast,
            context_window: 32_768,
            supports_streaming: true,
            max_concurrent: 4,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, CrucibleError> {
        let response = self
            .client
            .get(self.models_url())
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| lower_transport_error(PROVIDER_NAME, &e))?;
        let json = check_response(PROVIDER_NAME, response).await?;
        Ok(json["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests;
