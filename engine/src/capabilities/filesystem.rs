//! Filesystem capabilities
//!
//! `read_file`, `write_file` and `list_dir`, confined to the configured
//! workspace. Every path is canonicalized and checked against the workspace
//! root before any I/O.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{CapabilityInput, CapabilitySpec, InputError, Inputs, ParamSpec};
use sdk::Capability;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Keeps filesystem access inside one directory tree
#[derive(Debug)]
pub struct WorkspaceGuard {
    workspace: PathBuf,
}

impl WorkspaceGuard {
    pub fn new(workspace: &Path) -> Result<Self, EngineError> {
        // Canonicalize to handle symlinks (e.g. /var -> /private/var on macOS)
        let workspace = workspace.canonicalize().map_err(|e| {
            EngineError::PathCanonicalization(workspace.to_path_buf(), e.to_string())
        })?;
        Ok(Self { workspace })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn absolute(&self, path: &str) -> PathBuf {
        let target = Path::new(path);
        if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.workspace.join(target)
        }
    }

    /// Resolve an existing path inside the workspace.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, EngineError> {
        let abs = self.absolute(path);
        let canonical = abs
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(abs.clone(), e.to_string()))?;
        self.check_inside(canonical)
    }

    /// Resolve a path that may not exist yet by checking its nearest existing
    /// ancestor. Nothing is created.
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, EngineError> {
        let abs = normalize(&self.absolute(path));
        if abs.file_name().is_none() {
            return Err(EngineError::PathOutsideWorkspace(abs));
        }

        let mut existing = abs.as_path();
        let mut missing = Vec::new();
        while !existing.exists() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Err(EngineError::PathOutsideWorkspace(abs.clone())),
            }
        }

        let canonical = existing.canonicalize().map_err(|e| {
            EngineError::PathCanonicalization(existing.to_path_buf(), e.to_string())
        })?;
        let mut resolved = self.check_inside(canonical)?;
        resolved.extend(missing.iter().rev());
        Ok(resolved)
    }

    fn check_inside(&self, canonical: PathBuf) -> Result<PathBuf, EngineError> {
        if canonical.starts_with(&self.workspace) {
            Ok(canonical)
        } else {
            warn!("Path outside workspace rejected: {}", canonical.display());
            Err(EngineError::PathOutsideWorkspace(canonical))
        }
    }
}

/// Lexically fold `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn input_error(capability: &str, error: InputError) -> EngineError {
    EngineError::InvalidInput {
        capability: capability.to_string(),
        reason: error.to_string(),
    }
}

fn relative_display(guard: &WorkspaceGuard, path: &Path) -> String {
    path.strip_prefix(guard.workspace())
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Read a UTF-8 file from the workspace
pub struct ReadFile {
    guard: Arc<WorkspaceGuard>,
}

impl ReadFile {
    pub fn new(guard: Arc<WorkspaceGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Capability for ReadFile {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new("read_file", "Read the contents of a text file in the workspace")
            .with_input(
                ParamSpec::required("path", "string")
                    .with_description("path relative to the workspace root"),
            )
            .with_output("path")
            .with_output("content")
            .with_output("bytes")
    }

    async fn invoke(&self, inputs: Inputs) -> Result<Value, EngineError> {
        let input = CapabilityInput::new(inputs);
        let path = input
            .param_str("path")
            .map_err(|e| input_error("read_file", e))?;
        let resolved = self.guard.resolve(&path)?;
        info!("Reading file: {}", resolved.display());

        let content = fs::read_to_string(&resolved).await?;
        debug!("Read {} bytes from {}", content.len(), resolved.display());

        Ok(json!({
            "path": relative_display(&self.guard, &resolved),
            "bytes": content.len(),
            "content": content,
        }))
    }
}

/// Write a file in the workspace, creating parent directories
pub struct WriteFile {
    guard: Arc<WorkspaceGuard>,
}

impl WriteFile {
    pub fn new(guard: Arc<WorkspaceGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Capability for WriteFile {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            "write_file",
            "Write text to a file in the workspace, creating parent directories",
        )
        .with_input(ParamSpec::required("path", "string"))
        .with_input(ParamSpec::required("content", "string"))
        .with_output("path")
        .with_output("bytes_written")
    }

    async fn invoke(&self, inputs: Inputs) -> Result<Value, EngineError> {
        let input = CapabilityInput::new(inputs);
        let path = input
            .param_str("path")
            .map_err(|e| input_error("write_file", e))?;
        let content = input
            .param_str("content")
            .map_err(|e| input_error("write_file", e))?;

        let target = self.guard.resolve_for_write(&path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!("Writing {} bytes to: {}", content.len(), target.display());
        fs::write(&target, &content).await?;

        Ok(json!({
            "path": relative_display(&self.guard, &target),
            "bytes_written": content.len(),
        }))
    }
}

/// List a workspace directory
pub struct ListDir {
    guard: Arc<WorkspaceGuard>,
}

impl ListDir {
    pub fn new(guard: Arc<WorkspaceGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Capability for ListDir {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new("list_dir", "List the entries of a workspace directory")
            .with_input(
                ParamSpec::optional("path", "string")
                    .with_default(json!("."))
                    .with_description("directory relative to the workspace root"),
            )
            .with_output("path")
            .with_output("entries")
            .with_guidance("entries are sorted directories first, then files")
    }

    async fn invoke(&self, inputs: Inputs) -> Result<Value, EngineError> {
        let input = CapabilityInput::new(inputs);
        let path = input.param_str_opt("path").unwrap_or_else(|| ".".to_string());
        let resolved = self.guard.resolve(&path)?;
        info!("Listing directory: {}", resolved.display());

        let mut reader = fs::read_dir(&resolved).await?;
        let mut dirs = Vec::new();
        let mut files = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                dirs.push(json!({"name": name, "kind": "dir"}));
            } else {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                let kind = if file_type.is_symlink() { "link" } else { "file" };
                files.push(json!({"name": name, "kind": kind, "size": size}));
            }
        }

        let by_name = |a: &Value, b: &Value| {
            a["name"].as_str().unwrap_or_default().cmp(b["name"].as_str().unwrap_or_default())
        };
        dirs.sort_by(by_name);
        files.sort_by(by_name);
        dirs.extend(files);

        Ok(json!({
            "path": relative_display(&self.guard, &resolved),
            "count": dirs.len(),
            "entries": dirs,
        }))
    }
}
