//! File tools confined to the session workspace

use super::{parse_input, Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;

const DEFAULT_MAX_READ_BYTES: usize = 64 * 1024;

/// Resolve a model-supplied path inside the workspace root.
///
/// Only plain relative components are accepted, so the result can never
/// leave `root`.
fn resolve_path(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let requested_path = Path::new(requested);
    if requested.trim().is_empty() {
        return Err(ToolError::invalid_input("path is empty"));
    }

    let mut resolved = root.to_path_buf();
    for component in requested_path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::invalid_input(format!(
                    "path '{requested}' escapes the workspace"
                )));
            }
        }
    }
    Ok(resolved)
}

fn io_error(action: &str, path: &str, e: &std::io::Error) -> ToolError {
    ToolError::execution(format!("failed to {action} '{path}': {e}"))
}

/// Read a UTF-8 text file from the workspace
pub struct ReadFileTool;

#[derive(Debug, Deserialize)]
struct ReadFileInput {
    path: String,
    #[serde(default)]
    max_bytes: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> String {
        "Read a text file from the workspace. Paths are relative to the workspace root.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {"type": "string", "description": "Relative path of the file"},
                "max_bytes": {"type": "integer", "description": "Maximum bytes to return (default 65536)"}
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let input: ReadFileInput = parse_input(input)?;
        let path = resolve_path(&ctx.working_dir, &input.path)?;
        let max_bytes = input.max_bytes.unwrap_or(DEFAULT_MAX_READ_BYTES);

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| io_error("read", &input.path, &e))?;
        // One byte past the limit tells whether the file was cut
        let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
        let mut bytes = Vec::new();
        file.take(limit)
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| io_error("read", &input.path, &e))?;

        let truncated = bytes.len() > max_bytes;
        if truncated {
            bytes.truncate(max_bytes);
            // Drop a character split by the cut
            if let Err(e) = std::str::from_utf8(&bytes) {
                if e.error_len().is_none() {
                    bytes.truncate(e.valid_up_to());
                }
            }
        }
        let content = String::from_utf8_lossy(&bytes).into_owned();

        Ok(json!({
            "path": input.path,
            "content": content,
            "truncated": truncated,
        }))
    }
}

/// Write a text file into the workspace
pub struct WriteFileTool;

#[derive(Debug, Deserialize)]
struct WriteFileInput {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> String {
        "Write text to a file in the workspace, creating parent directories as needed. Set append to add to an existing file instead of replacing it.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": {"type": "string", "description": "Relative path of the file"},
                "content": {"type": "string", "description": "Text to write"},
                "append": {"type": "boolean", "description": "Append instead of overwrite"}
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        use tokio::io::AsyncWriteExt;

        let input: WriteFileInput = parse_input(input)?;
        let path = resolve_path(&ctx.working_dir, &input.path)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directories for", &input.path, &e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(input.append)
            .truncate(!input.append)
            .open(&path)
            .await
            .map_err(|e| io_error("open", &input.path, &e))?;
        file.write_all(input.content.as_bytes())
            .await
            .map_err(|e| io_error("write", &input.path, &e))?;
        file.flush()
            .await
            .map_err(|e| io_error("write", &input.path, &e))?;

        Ok(json!({
            "path": input.path,
            "bytes_written": input.content.len(),
            "appended": input.append,
        }))
    }
}
