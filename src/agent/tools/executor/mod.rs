use crate::agent::tools::base::{
    Tool, ToolCategory, ToolContext, ToolExecutionResult, classify_tool,
};
use crate::agent::tools::registry::ToolRegistry;
use crate::bus::{Event, EventBus};
use crate::errors::CrucibleError;
use futures_util::future::join_all;
use lru::LruCache;
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

const CACHE_MAX_ENTRIES: usize = 256;
/// Concurrency cap on the file category.
const FILE_CONCURRENCY: usize = 2;
/// Cache keys truncate canonical arguments to this many characters.
const CACHE_KEY_ARG_CHARS: usize = 100;

/// One requested tool invocation within a batch.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Value,
}

struct CachedResult {
    result: ToolExecutionResult,
    cached_at: Instant,
}

/// Produce a canonical JSON string with object keys sorted recursively, so
/// cache keys are stable regardless of key insertion order.
fn canonical_json(value: &Value) -> String {
    fn canonical_value(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, canonical_value(v))).collect();
                Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
            }
            Value::Array(arr) => Value::Array(arr.iter().map(canonical_value).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&canonical_value(value)).unwrap_or_default()
}

fn cache_key(name: &str, args: &Value) -> String {
    let canonical = canonical_json(args);
    let truncated: String = canonical.chars().take(CACHE_KEY_ARG_CHARS).collect();
    format!("{name}:{truncated}")
}

/// Executes tool batches with categorized scheduling: fast tools in
/// parallel, file tools capped at two, network tools in parallel, heavy
/// tools serialized. The category order is a contract; mixed batches
/// complete grouped by category.
pub struct AsyncToolExecutor {
    registry: Arc<ToolRegistry>,
    cache: Mutex<LruCache<String, CachedResult>>,
    cache_ttl: Duration,
    default_timeout: Duration,
    batch_semaphore: Arc<Semaphore>,
    file_semaphore: Arc<Semaphore>,
    heavy_lock: Mutex<()>,
    bus: EventBus,
}

impl AsyncToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache_ttl: Duration,
        default_timeout: Duration,
        max_concurrent_batch: usize,
        bus: EventBus,
    ) -> Self {
        Self {
            registry,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_MAX_ENTRIES).expect("cache size must be > 0"),
            )),
            cache_ttl,
            default_timeout,
            batch_semaphore: Arc::new(Semaphore::new(max_concurrent_batch.max(1))),
            file_semaphore: Arc::new(Semaphore::new(FILE_CONCURRENCY)),
            heavy_lock: Mutex::new(()),
            bus,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a mixed batch. Results come back in category order (fast,
    /// file, network, heavy); within fast/network categories completion
    /// order is unspecified, heavy tools run strictly one after another.
    pub async fn execute_batch(
        &self,
        invocations: Vec<ToolInvocation>,
        ctx: &ToolContext,
    ) -> Vec<ToolExecutionResult> {
        let mut by_category: BTreeMap<u8, Vec<ToolInvocation>> = BTreeMap::new();
        for invocation in invocations {
            let rank = match classify_tool(&invocation.name) {
                ToolCategory::Fast => 0,
                ToolCategory::File => 1,
                ToolCategory::Network => 2,
                ToolCategory::Heavy => 3,
            };
            by_category.entry(rank).or_default().push(invocation);
        }

        let mut results = Vec::new();
        for (rank, group) in by_category {
            match rank {
                // Parallel within the batch cap.
                0 | 2 => {
                    let futures = group
                        .into_iter()
                        .map(|inv| self.execute_bounded(inv, ctx, &self.batch_semaphore));
                    results.extend(join_all(futures).await);
                }
                // File I/O capped at two concurrent executions.
                1 => {
                    let futures = group
                        .into_iter()
                        .map(|inv| self.execute_bounded(inv, ctx, &self.file_semaphore));
                    results.extend(join_all(futures).await);
                }
                // Heavy tools are serialized.
                _ => {
                    for inv in group {
                        let _serial = self.heavy_lock.lock().await;
                        results.push(self.execute_one(inv, ctx).await);
                    }
                }
            }
        }
        results
    }

    async fn execute_bounded(
        &self,
        invocation: ToolInvocation,
        ctx: &ToolContext,
        semaphore: &Semaphore,
    ) -> ToolExecutionResult {
        let _permit = semaphore.acquire().await;
        self.execute_one(invocation, ctx).await
    }

    /// Validate, gate, execute with a timeout, and cache one invocation.
    pub async fn execute_one(
        &self,
        invocation: ToolInvocation,
        ctx: &ToolContext,
    ) -> ToolExecutionResult {
        let name = invocation.name.clone();
        let started = Instant::now();
        self.bus.publish(Event::ToolStarted {
            request_id: ctx.request_id.clone(),
            tool: name.clone(),
        });
        let result = self.run_guarded(invocation, ctx, started).await;
        // Every execution feeds the session's isolation budget; a breach
        // here poisons the session for subsequent operations.
        let memory_sample = crate::utils::current_rss_bytes().unwrap_or(0);
        self.registry
            .record_usage(
                &ctx.session_id,
                memory_sample,
                Duration::from_millis(result.execution_time_ms),
            )
            .await;
        self.bus.publish(Event::ToolCompleted {
            request_id: ctx.request_id.clone(),
            tool: name,
            success: result.success,
            execution_time_ms: result.execution_time_ms,
        });
        result
    }

    async fn run_guarded(
        &self,
        invocation: ToolInvocation,
        ctx: &ToolContext,
        started: Instant,
    ) -> ToolExecutionResult {
        let name = invocation.name.as_str();

        let args = match self.registry.validate(name, &invocation.args) {
            Ok(args) => args,
            Err(e) => return ToolExecutionResult::failure(name, e.to_string(), started.elapsed()),
        };
        if let Err(e) = self.registry.can_execute(name, ctx).await {
            return ToolExecutionResult::failure(name, e.to_string(), started.elapsed());
        }
        // can_execute already verified the tool exists.
        let Some(tool) = self.registry.get(name) else {
            return ToolExecutionResult::failure(name, "unknown tool".into(), started.elapsed());
        };

        let key = cache_key(name, &args);
        if tool.cacheable()
            && let Some(cached) = self.cache_lookup(&key).await
        {
            debug!(tool = name, "tool cache hit");
            return cached;
        }

        let timeout = tool.timeout().unwrap_or(self.default_timeout);
        let execution = {
            let tool = Arc::clone(&tool);
            let ctx = ctx.clone();
            let args = args.clone();
            // Spawned so a panicking tool fails its result instead of
            // unwinding the agent loop.
            tokio::spawn(async move { tool.execute(args, &ctx).await })
        };
        let abort = execution.abort_handle();

        let result = match tokio::time::timeout(timeout, execution).await {
            Ok(Ok(Ok(output))) => ToolExecutionResult::success(name, output, started.elapsed()),
            Ok(Ok(Err(e))) => {
                warn!(tool = name, "tool failed: {e}");
                ToolExecutionResult::failure(
                    name,
                    CrucibleError::ToolExecution {
                        tool: name.to_string(),
                        message: e.to_string(),
                        recoverable: true,
                    }
                    .to_string(),
                    started.elapsed(),
                )
            }
            Ok(Err(join_err)) => {
                let cause = if join_err.is_panic() {
                    "tool panicked"
                } else {
                    "tool was cancelled"
                };
                warn!(tool = name, cause, "tool crashed");
                ToolExecutionResult::failure(name, cause.to_string(), started.elapsed())
            }
            Err(_) => {
                abort.abort();
                warn!(tool = name, "tool timed out after {}s", timeout.as_secs());
                ToolExecutionResult::failure(
                    name,
                    format!("timed out after {}s", timeout.as_secs()),
                    started.elapsed(),
                )
            }
        };

        // Cache successes only; failures always re-execute.
        if result.success && tool.cacheable() {
            let mut cache = self.cache.lock().await;
            cache.put(
                key,
                CachedResult {
                    result: result.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        result
    }

    async fn cache_lookup(&self, key: &str) -> Option<ToolExecutionResult> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(key) {
            if cached.cached_at.elapsed() < self.cache_ttl {
                return Some(cached.result.clone());
            }
            cache.pop(key);
        }
        None
    }

    /// Drop every cached result.
    pub async fn clear_history(&self) {
        let mut cache = self.cache.lock().await;
        let dropped = cache.len();
        cache.clear();
        info!(dropped, "tool result cache cleared");
    }
}
