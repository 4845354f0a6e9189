//! Shared mocks for unit tests.

use crate::errors::CrucibleError;
use crate::providers::base::{
    ChunkStream, FinishReason, ProviderAdapter, ProviderCapabilities, Request, Response,
    ResponseTimeClass, StreamChunk, Usage,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ChatResult = Result<Response, CrucibleError>;

/// Scripted provider adapter: pops one result per `request` call, falling
/// back to a default text response when the script runs out.
pub struct MockAdapter {
    name: &'static str,
    class: ResponseTimeClass,
    available: bool,
    responses: Mutex<VecDeque<ChatResult>>,
    chunks: Mutex<Vec<Result<StreamChunk, CrucibleError>>>,
    pub calls: AtomicUsize,
}

impl MockAdapter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            class: ResponseTimeClass::Fast,
            available: true,
            responses: Mutex::new(VecDeque::new()),
            chunks: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_class(mut self, class: ResponseTimeClass) -> Self {
        self.class = class;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn push_response(&self, response: Response) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: CrucibleError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn set_chunks(&self, chunks: Vec<Result<StreamChunk, CrucibleError>>) {
        *self.chunks.lock().unwrap() = chunks;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn response(&self, content: &str) -> Response {
        text_response(self.name, content)
    }
}

pub fn text_response(provider: &str, content: &str) -> Response {
    Response {
        id: "resp".into(),
        content: content.into(),
        model: "mock-model".into(),
        provider: provider.into(),
        usage: Usage::new(10, 10),
        tool_calls: vec![],
        finish_reason: FinishReason::Stop,
        response_time: Duration::from_millis(50),
        confidence: None,
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        self.name
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn request(&self, _req: &Request) -> Result<Response, CrucibleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(text_response(self.name, "mock response")),
        }
    }

    async fn stream(&self, _req: &Request) -> Result<ChunkStream, CrucibleError> {
        let chunks: Vec<_> = std::mem::take(&mut *self.chunks.lock().unwrap());
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            strengths: vec![],
            optimal_for: vec![],
            response_time_class: self.class,
            context_window: 32_768,
            supports_streaming: true,
            max_concurrent: 4,
        }
    }
}

pub fn basic_request(prompt: &str) -> Request {
    use crate::providers::base::{Priority, RequestContext};
    Request {
        id: uuid::Uuid::new_v4().to_string(),
        prompt: prompt.into(),
        model: None,
        provider: None,
        temperature: 0.7,
        max_tokens: 1024,
        stream: false,
        tools: vec![],
        messages: vec![],
        context: RequestContext::default(),
        timeout: Duration::from_secs(30),
        priority: Priority::Medium,
    }
}

pub fn adapters_map(
    adapters: Vec<Arc<dyn ProviderAdapter>>,
) -> std::collections::HashMap<String, Arc<dyn ProviderAdapter>> {
    adapters
        .into_iter()
        .map(|a| (a.name().to_string(), a))
        .collect()
}
