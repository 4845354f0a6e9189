use crate::agent::tools::base::{ParamDescriptor, ParamKind, Tool, ToolContext};
use crate::config::SecurityLevel;
use crate::isolation::Operation;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

const MAX_READ_BYTES: u64 = 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 50;

/// Resolve a tool-supplied path inside the workspace, rejecting traversal
/// and absolute paths that leave it.
fn resolve_in_workspace(workspace: &Path, raw: &str) -> anyhow::Result<PathBuf> {
    let candidate = Path::new(raw);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        anyhow::bail!("path '{raw}' contains a traversal component");
    }
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workspace.join(candidate)
    };
    if !resolved.starts_with(workspace) {
        anyhow::bail!("path '{raw}' is outside the workspace");
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// list_files
// ---------------------------------------------------------------------------

pub struct ListFilesTool;

static LIST_PARAMS: LazyLock<Vec<ParamDescriptor>> = LazyLock::new(|| {
    vec![
        ParamDescriptor::optional(
            "path",
            ParamKind::String,
            Some(Value::String(".".into())),
            "directory to list, relative to the workspace",
        ),
        ParamDescriptor::optional(
            "max_files",
            ParamKind::Integer,
            Some(Value::from(DEFAULT_MAX_FILES)),
            "maximum entries returned",
        ),
    ]
});

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List files and directories under a workspace path"
    }

    fn parameters(&self) -> &'static [ParamDescriptor] {
        &LIST_PARAMS
    }

    fn required_operations(&self) -> &'static [Operation] {
        &[Operation::Read]
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let raw = args["path"].as_str().unwrap_or(".");
        let max_files = args["max_files"].as_u64().unwrap_or(DEFAULT_MAX_FILES as u64) as usize;
        let dir = resolve_in_workspace(&ctx.workspace, raw)?;

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = if entry.file_type().await?.is_dir() { "/" } else { "" };
            entries.push(format!("{name}{suffix}"));
        }
        entries.sort();
        let total = entries.len();
        entries.truncate(max_files);
        let mut out = entries.join("\n");
        if total > max_files {
            out.push_str(&format!("\n… {} more entries", total - max_files));
        }
        debug!(path = raw, total, "listed directory");
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

pub struct ReadFileTool;

static READ_PARAMS: LazyLock<Vec<ParamDescriptor>> = LazyLock::new(|| {
    vec![ParamDescriptor::required(
        "path",
        ParamKind::String,
        "file to read, relative to the workspace",
    )]
});

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file's contents from the workspace"
    }

    fn parameters(&self) -> &'static [ParamDescriptor] {
        &READ_PARAMS
    }

    fn required_operations(&self) -> &'static [Operation] {
        &[Operation::Read]
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let raw = args["path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("path must be a string"))?;
        let path = resolve_in_workspace(&ctx.workspace, raw)?;
        let meta = tokio::fs::metadata(&path).await?;
        if meta.len() > MAX_READ_BYTES {
            anyhow::bail!(
                "file '{raw}' is {} bytes, limit is {MAX_READ_BYTES}",
                meta.len()
            );
        }
        Ok(tokio::fs::read_to_string(&path).await?)
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

pub struct WriteFileTool;

static WRITE_PARAMS: LazyLock<Vec<ParamDescriptor>> = LazyLock::new(|| {
    vec![
        ParamDescriptor::required(
            "path",
            ParamKind::String,
            "file to write, relative to the workspace",
        ),
        ParamDescriptor::required("content", ParamKind::String, "content to write"),
    ]
});

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file in the workspace, creating parent directories"
    }

    fn parameters(&self) -> &'static [ParamDescriptor] {
        &WRITE_PARAMS
    }

    fn required_operations(&self) -> &'static [Operation] {
        &[Operation::Write]
    }

    /// Writes are disabled at high/maximum security.
    fn max_security_level(&self) -> SecurityLevel {
        SecurityLevel::Medium
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let raw = args["path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("path must be a string"))?;
        let content = args["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("content must be a string"))?;
        let path = resolve_in_workspace(&ctx.workspace, raw)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(format!("wrote {} bytes to {raw}", content.len()))
    }
}
