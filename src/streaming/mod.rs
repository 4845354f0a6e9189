use crate::bus::{Event, EventBus};
use crate::errors::CrucibleError;
use crate::providers::base::{
    ChunkStream, FinishReason, StreamChunk, StreamToken, TokenMetadata, ToolCall, Usage,
};
use crate::utils::cancel::CancelSignal;
use chrono::Utc;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffers tool-call argument fragments per slot and emits whole calls.
///
/// Fragments for one logical call share a slot; `id` and `name` arrive on
/// the first fragment. Calls are emitted in slot order so the assembled
/// list is deterministic regardless of delta interleaving.
#[derive(Default)]
pub struct ToolCallAssembler {
    slots: BTreeMap<usize, PartialCall>,
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, slot: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        let partial = self.slots.entry(slot).or_default();
        if partial.id.is_none() {
            partial.id = id;
        }
        if partial.name.is_none() {
            partial.name = name;
        }
        partial.arguments.push_str(arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drain buffered fragments into whole calls. Fragments that never
    /// received a name are dropped: there is no call to attach them to.
    pub fn finish(self) -> Vec<ToolCall> {
        self.slots
            .into_iter()
            .filter_map(|(slot, partial)| {
                let name = partial.name?;
                Some(ToolCall {
                    id: partial.id.unwrap_or_else(|| format!("call_{slot}")),
                    name,
                    arguments: if partial.arguments.is_empty() {
                        "{}".to_string()
                    } else {
                        partial.arguments
                    },
                })
            })
            .collect()
    }
}

/// Everything a stream produced, materialized at terminal state.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Concatenation of all textual tokens, identical to the content a
    /// non-streaming call would have returned.
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub token_count: u64,
    pub cancelled: bool,
}

/// A running stream: the token channel plus a handle resolving to the
/// materialized outcome once the terminal token has been sent.
pub struct StreamSession {
    pub tokens: mpsc::Receiver<StreamToken>,
    pub outcome: JoinHandle<StreamOutcome>,
}

/// Converts an adapter's raw chunk stream into the canonical token stream.
///
/// Single writer per stream: one producer task reads the adapter, assigns
/// indices, buffers tool-call fragments, and forwards tokens over a bounded
/// channel. Consumers apply back-pressure by reading slowly.
pub struct StreamPipeline {
    channel_capacity: usize,
    bus: EventBus,
}

impl StreamPipeline {
    pub fn new(channel_capacity: usize, bus: EventBus) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
            bus,
        }
    }

    pub fn run(
        &self,
        request_id: String,
        provider: String,
        mut chunks: ChunkStream,
        mut cancel: CancelSignal,
    ) -> StreamSession {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let bus = self.bus.clone();
        bus.publish(Event::StreamStarted {
            request_id: request_id.clone(),
            provider,
        });

        let outcome = tokio::spawn(async move {
            let mut index: u64 = 0;
            let mut content = String::new();
            let mut assembler = ToolCallAssembler::new();
            let mut usage = Usage::default();
            let mut finish_reason: Option<FinishReason> = None;
            let mut error: Option<String> = None;
            let mut cancelled = false;

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    chunk = chunks.next() => chunk,
                };
                match chunk {
                    Some(Ok(StreamChunk::Content(text))) => {
                        content.push_str(&text);
                        let token = StreamToken {
                            content: text,
                            is_complete: false,
                            index,
                            timestamp: Utc::now(),
                            metadata: None,
                        };
                        bus.publish(Event::StreamToken {
                            request_id: request_id.clone(),
                            index,
                        });
                        index += 1;
                        let sent = tokio::select! {
                            _ = cancel.cancelled() => {
                                cancelled = true;
                                false
                            }
                            sent = tx.send(token) => sent.is_ok(),
                        };
                        if !sent {
                            if !cancelled {
                                debug!("stream consumer dropped, stopping producer");
                            }
                            break;
                        }
                    }
                    Some(Ok(StreamChunk::ToolCallDelta {
                        slot,
                        id,
                        name,
                        arguments,
                    })) => {
                        // Fragments are buffered, never interleaved into the
                        // textual stream; the assembled calls ride on the
                        // terminal token.
                        assembler.push(slot, id, name, &arguments);
                    }
                    Some(Ok(StreamChunk::Usage(u))) => usage = u,
                    Some(Ok(StreamChunk::Finish(reason))) => {
                        finish_reason = Some(reason);
                    }
                    Some(Err(e)) => {
                        warn!("stream failed mid-flight: {e}");
                        error = Some(e.to_string());
                        break;
                    }
                    None => break,
                }
            }

            // An interrupted stream discards partial tool-call fragments.
            let tool_calls = if cancelled || error.is_some() {
                if !assembler.is_empty() {
                    debug!("discarding partial tool-call fragments from interrupted stream");
                }
                vec![]
            } else {
                assembler.finish()
            };

            let finish_reason = match (&error, finish_reason) {
                (Some(_), _) => FinishReason::Error,
                (None, Some(reason)) => reason,
                (None, None) if !tool_calls.is_empty() => FinishReason::ToolCalls,
                (None, None) => FinishReason::Stop,
            };

            let final_token = StreamToken {
                content: String::new(),
                is_complete: true,
                index,
                timestamp: Utc::now(),
                metadata: Some(TokenMetadata {
                    cancelled,
                    error: error.clone(),
                    tool_calls: tool_calls.clone(),
                    finish_reason: Some(finish_reason),
                }),
            };
            let token_count = index + 1;
            let _ = tx.send(final_token).await;
            bus.publish(Event::StreamCompleted {
                request_id,
                token_count,
                cancelled,
            });

            StreamOutcome {
                content,
                tool_calls,
                usage,
                finish_reason,
                token_count,
                cancelled,
            }
        });

        StreamSession {
            tokens: rx,
            outcome,
        }
    }
}
