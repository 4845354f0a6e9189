use crate::config::SearchConfig;
use crate::errors::CrucibleError;
use crate::search::query::{SanitizedQuery, SearchQuery, sanitize};
use crate::search::strategy::{Strategy, build_pattern, is_regex_pattern, select_strategy};
use crate::utils::subprocess::scrubbed_command;
use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CACHE_MAX_ENTRIES: usize = 128;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);
const MAX_PATH_CHARS: usize = 512;
const MAX_CONTENT_CHARS: usize = 500;
/// Fallback strategies consumed per search, at most.
const MAX_FALLBACKS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchDocument {
    pub path: String,
    pub line: u64,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStats {
    pub matched: usize,
    pub deduplicated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMetadata {
    pub strategy: Strategy,
    pub confidence: f64,
    pub execution_time_ms: u64,
    pub cache_hit: bool,
    pub fallback_used: bool,
    pub warnings: Vec<String>,
    pub statistics: SearchStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub documents: Vec<SearchDocument>,
    pub metadata: SearchMetadata,
}

struct CachedSearch {
    response: SearchResponse,
    cached_at: Instant,
}

type ProcessSlot = std::sync::Arc<Mutex<Option<Child>>>;

/// Pluggable query engine over a subprocess line-oriented search backend
/// (`rg`), with sanitization, strategy fallback, caching, and bounded
/// resource use. Every spawned process is terminated before the operation
/// reports completion.
pub struct SearchEngine {
    workspace: PathBuf,
    timeout: Duration,
    max_output_bytes: u64,
    memory_cap_bytes: u64,
    backend: Option<PathBuf>,
    cache: Mutex<LruCache<String, CachedSearch>>,
    cache_ttl: Duration,
    active: Mutex<HashMap<Uuid, ProcessSlot>>,
}

impl SearchEngine {
    pub fn new(workspace: PathBuf, config: &SearchConfig) -> Self {
        let backend = which::which("rg").ok();
        if backend.is_none() {
            warn!("search backend 'rg' not found on PATH; searches will fail");
        }
        Self {
            workspace,
            timeout: Duration::from_millis(config.default_timeout_ms),
            max_output_bytes: config.max_output_bytes,
            memory_cap_bytes: config.memory_cap_bytes,
            backend,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_MAX_ENTRIES).expect("cache size must be > 0"),
            )),
            cache_ttl: DEFAULT_CACHE_TTL,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, CrucibleError> {
        let started = Instant::now();

        let key = query_hash(query);
        if let Some(mut hit) = self.cache_lookup(&key).await {
            hit.metadata.cache_hit = true;
            hit.metadata.execution_time_ms = started.elapsed().as_millis() as u64;
            debug!("search cache hit");
            return Ok(hit);
        }

        let sanitized = sanitize(query)?;
        let primary = select_strategy(&sanitized.query);

        let mut attempts = vec![primary];
        attempts.extend(
            primary
                .fallbacks()
                .iter()
                .copied()
                .take(MAX_FALLBACKS),
        );

        let mut last_error: Option<CrucibleError> = None;
        let mut first_empty: Option<Strategy> = None;
        let mut fallback_used = false;
        for (i, strategy) in attempts.into_iter().enumerate() {
            if i > 0 {
                fallback_used = true;
            }
            match self.execute_strategy(strategy, &sanitized).await {
                Ok((documents, deduplicated)) => {
                    // An empty result is itself low-confidence; a broader
                    // strategy may still find what this one missed.
                    if documents.is_empty() {
                        debug!(?strategy, "empty result, trying fallback strategy");
                        first_empty.get_or_insert(strategy);
                        continue;
                    }
                    let response = self.shape(
                        documents,
                        deduplicated,
                        strategy,
                        fallback_used,
                        sanitized.warnings.clone(),
                        started,
                    );
                    self.cache_store(key, &response).await;
                    return Ok(response);
                }
                Err(e) if e.is_recoverable() => {
                    warn!(?strategy, "search strategy failed: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // Every strategy came back empty (or failed after one came back
        // empty): report the primary strategy's empty result.
        if let Some(strategy) = first_empty {
            return Ok(self.shape(
                vec![],
                0,
                strategy,
                fallback_used,
                sanitized.warnings,
                started,
            ));
        }
        Err(last_error.unwrap_or_else(|| {
            CrucibleError::Internal(anyhow::anyhow!("no search strategy produced results"))
        }))
    }

    fn shape(
        &self,
        documents: Vec<SearchDocument>,
        deduplicated: usize,
        strategy: Strategy,
        fallback_used: bool,
        warnings: Vec<String>,
        started: Instant,
    ) -> SearchResponse {
        let confidence = if documents.is_empty() {
            0.3
        } else {
            strategy.expected_accuracy()
        };
        let matched = documents.len();
        SearchResponse {
            documents,
            metadata: SearchMetadata {
                strategy,
                confidence,
                execution_time_ms: started.elapsed().as_millis() as u64,
                cache_hit: false,
                fallback_used,
                warnings,
                statistics: SearchStats {
                    matched,
                    deduplicated,
                },
            },
        }
    }

    async fn execute_strategy(
        &self,
        strategy: Strategy,
        sanitized: &SanitizedQuery,
    ) -> Result<(Vec<SearchDocument>, usize), CrucibleError> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            CrucibleError::Configuration("search backend 'rg' is not installed".to_string())
        })?;
        let query = &sanitized.query;
        let pattern = build_pattern(strategy, query);

        let mut cmd = scrubbed_command(&backend.to_string_lossy());
        cmd.current_dir(&self.workspace)
            .arg("--json")
            .arg("--no-heading")
            .arg("--color")
            .arg("never");
        if !is_regex_pattern(strategy, query) {
            cmd.arg("--fixed-strings");
        }
        if !query.case_sensitive {
            cmd.arg("--ignore-case");
        }
        if query.whole_word {
            cmd.arg("--word-regexp");
        }
        if let Some(language) = query.context.language.as_deref()
            && let Some(rg_type) = language_type(language)
        {
            cmd.arg("--type").arg(rg_type);
        }
        for file_type in &query.context.file_types {
            cmd.arg("--glob").arg(format!("*.{file_type}"));
        }
        for exclude in &query.context.exclude_patterns {
            cmd.arg("--glob").arg(format!("!{exclude}"));
        }
        cmd.arg("--").arg(&pattern).arg(".");
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        cmd.kill_on_drop(true);
        limit_child_memory(&mut cmd, self.memory_cap_bytes);

        let execution_id = Uuid::new_v4();
        let mut child = cmd
            .spawn()
            .map_err(|e| CrucibleError::Internal(anyhow::anyhow!("failed to spawn rg: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CrucibleError::Internal(anyhow::anyhow!("rg stdout not captured")))?;

        let slot: ProcessSlot = std::sync::Arc::new(Mutex::new(Some(child)));
        self.active.lock().await.insert(execution_id, slot.clone());

        let read = self.read_capped(stdout);
        let output = tokio::time::timeout(self.timeout, read).await;

        // Whatever happened, the child must be gone before we return.
        self.reap(execution_id, &slot).await;

        let output = match output {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                return Err(CrucibleError::Internal(anyhow::anyhow!(
                    "failed to read search output: {e}"
                )));
            }
            Err(_) => {
                return Err(CrucibleError::SearchTimeout {
                    elapsed_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        Ok(parse_output(&output, query.max_results))
    }

    async fn read_capped(&self, mut stdout: tokio::process::ChildStdout) -> std::io::Result<String> {
        let cap = self.max_output_bytes as usize;
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let n = stdout.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            let take = n.min(cap - buf.len());
            buf.extend_from_slice(&chunk[..take]);
            if buf.len() >= cap {
                warn!(cap, "search output cap reached, truncating");
                break;
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn reap(&self, execution_id: Uuid, slot: &ProcessSlot) {
        {
            let mut guard = slot.lock().await;
            if let Some(mut child) = guard.take() {
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
        self.active.lock().await.remove(&execution_id);
    }

    /// Kill every in-flight search process.
    pub async fn cancel_all(&self) {
        let slots: Vec<(Uuid, ProcessSlot)> =
            self.active.lock().await.drain().collect();
        for (id, slot) in slots {
            info!(execution = %id, "cancelling search process");
            let mut guard = slot.lock().await;
            if let Some(mut child) = guard.take() {
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
    }

    pub async fn active_processes(&self) -> usize {
        self.active.lock().await.len()
    }

    async fn cache_lookup(&self, key: &str) -> Option<SearchResponse> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(key) {
            if cached.cached_at.elapsed() < self.cache_ttl {
                return Some(cached.response.clone());
            }
            cache.pop(key);
        }
        None
    }

    async fn cache_store(&self, key: String, response: &SearchResponse) {
        let mut cache = self.cache.lock().await;
        cache.put(
            key,
            CachedSearch {
                response: response.clone(),
                cached_at: Instant::now(),
            },
        );
    }
}

/// Cap the child's address space so a runaway search cannot exhaust host
/// memory; the process dies with an allocation failure instead.
#[cfg(unix)]
fn limit_child_memory(cmd: &mut tokio::process::Command, bytes: u64) {
    unsafe {
        cmd.pre_exec(move || {
            let limit = libc::rlimit {
                rlim_cur: bytes as libc::rlim_t,
                rlim_max: bytes as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn limit_child_memory(_cmd: &mut tokio::process::Command, _bytes: u64) {}

fn language_type(language: &str) -> Option<&'static str> {
    match language.to_lowercase().as_str() {
        "rust" => Some("rust"),
        "python" => Some("py"),
        "typescript" => Some("ts"),
        "javascript" => Some("js"),
        "go" => Some("go"),
        "java" => Some("java"),
        "c" | "cpp" | "c++" => Some("cpp"),
        _ => None,
    }
}

/// Canonical query hash for the cache key.
fn query_hash(query: &SearchQuery) -> String {
    let canonical = serde_json::to_string(query).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Parse `rg --json` output, falling back to plain `path:line:content`
/// lines. Deduplicates by `(path, content)` and caps field lengths.
/// Returns the documents plus the number of duplicates dropped.
fn parse_output(output: &str, max_results: usize) -> (Vec<SearchDocument>, usize) {
    let mut documents = Vec::new();
    let mut duplicates = 0;
    let mut seen: std::collections::HashSet<(String, String)> = std::collections::HashSet::new();

    for line in output.lines() {
        if documents.len() >= max_results {
            break;
        }
        let document = match serde_json::from_str::<Value>(line) {
            Ok(json) => parse_json_line(&json),
            Err(_) => parse_plain_line(line),
        };
        if let Some(doc) = document {
            if seen.insert((doc.path.clone(), doc.content.clone())) {
                documents.push(doc);
            } else {
                duplicates += 1;
            }
        }
    }
    (documents, duplicates)
}

fn parse_json_line(json: &Value) -> Option<SearchDocument> {
    if json["type"].as_str() != Some("match") {
        return None;
    }
    let data = &json["data"];
    let path = data["path"]["text"].as_str()?;
    let content = data["lines"]["text"].as_str()?;
    Some(make_document(
        path,
        data["line_number"].as_u64().unwrap_or(0),
        content,
    ))
}

fn parse_plain_line(line: &str) -> Option<SearchDocument> {
    let mut parts = line.splitn(3, ':');
    let path = parts.next()?;
    let line_number: u64 = parts.next()?.parse().ok()?;
    let content = parts.next()?;
    Some(make_document(path, line_number, content))
}

fn make_document(path: &str, line: u64, content: &str) -> SearchDocument {
    let mut path: String = path.chars().take(MAX_PATH_CHARS).collect();
    if let Some(stripped) = path.strip_prefix("./") {
        path = stripped.to_string();
    }
    let content: String = content.trim_end().chars().take(MAX_CONTENT_CHARS).collect();
    SearchDocument {
        path,
        line,
        content,
    }
}

#[cfg(test)]
mod tests;
