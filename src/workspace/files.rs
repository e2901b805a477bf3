//! File operations on a session workspace.
//!
//! Every operation resolves its path through the [`WorkspaceGuard`] before
//! touching the disk.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::WorkspaceGuard;
use crate::error::TunnelError;
use crate::Result;

/// Maximum directory depth walked by [`list`].
const MAX_LIST_DEPTH: usize = 16;

/// Mode of directories in a workspace shared with a guest uid.
pub const SHARED_DIR_MODE: u32 = 0o777;
/// Mode of files in a workspace shared with a guest uid.
pub const SHARED_FILE_MODE: u32 = 0o666;

/// Kind of a workspace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// One node of the workspace tree.
#[derive(Debug, Clone, Serialize)]
pub struct FileNode {
    /// Entry name.
    pub name: String,
    /// Workspace-relative path with `/` separators.
    pub path: String,
    /// File or directory.
    #[serde(rename = "type")]
    pub kind: FileKind,
    /// Size in bytes (files only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Child entries (directories only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

/// List the workspace as a tree, directories first, then by name.
///
/// Symlinks are reported as files and never followed.
pub async fn list(guard: &WorkspaceGuard) -> Result<Vec<FileNode>> {
    let guard = guard.clone();
    tokio::task::spawn_blocking(move || walk(&guard, guard.root(), 0))
        .await
        .map_err(|e| TunnelError::Io(std::io::Error::other(e.to_string())))?
}

fn walk(guard: &WorkspaceGuard, dir: &Path, depth: usize) -> Result<Vec<FileNode>> {
    let mut nodes = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(nodes),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(rel) = guard.relative(&path) else {
            continue;
        };
        let file_type = entry.file_type()?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if file_type.is_dir() {
            let children = if depth + 1 < MAX_LIST_DEPTH {
                walk(guard, &path, depth + 1)?
            } else {
                Vec::new()
            };
            nodes.push(FileNode {
                name,
                path: rel,
                kind: FileKind::Directory,
                size: None,
                children: Some(children),
            });
        } else {
            let size = entry.metadata().map(|m| m.len()).ok();
            nodes.push(FileNode {
                name,
                path: rel,
                kind: FileKind::File,
                size,
                children: None,
            });
        }
    }

    nodes.sort_by(|a, b| {
        let rank = |n: &FileNode| (n.kind != FileKind::Directory) as u8;
        rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
    });
    Ok(nodes)
}

/// Read a text file from the workspace.
pub async fn read(guard: &WorkspaceGuard, client_path: &str) -> Result<String> {
    let path = guard.resolve(client_path).await?;
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| TunnelError::from_path_io(e, client_path))
}

/// Write a file, creating parent directories as needed.
pub async fn save(guard: &WorkspaceGuard, client_path: &str, content: &str) -> Result<()> {
    let path = guard.resolve(client_path).await?;
    if let Some(parent) = path.parent() {
        let created = missing_dirs(guard.root(), parent).await;
        tokio::fs::create_dir_all(parent).await?;
        if guard.is_shared() {
            for dir in created {
                open_permissions(&dir, SHARED_DIR_MODE).await;
            }
        }
    }
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| TunnelError::from_path_io(e, client_path))?;
    if guard.is_shared() {
        open_permissions(&path, SHARED_FILE_MODE).await;
    }
    debug!(path = %path.display(), bytes = content.len(), "file saved");
    Ok(())
}

/// Directories between `root` and `dir` (inclusive) that do not exist yet,
/// outermost first.
async fn missing_dirs(root: &Path, dir: &Path) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path == root || !path.starts_with(root) || tokio::fs::try_exists(path).await.unwrap_or(true) {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }
    missing.reverse();
    missing
}

/// Set `mode` on `path`; a failure is logged, not returned.
///
/// The guest may own the path already, in which case it also controls
/// the mode.
pub(crate) async fn open_permissions(path: &Path, mode: u32) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await {
            debug!(path = %path.display(), "cannot set mode {:o}: {}", mode, e);
        }
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
}

/// Delete a file, or a directory and everything below it.
pub async fn delete(guard: &WorkspaceGuard, client_path: &str) -> Result<()> {
    let path = guard.resolve(client_path).await?;
    let metadata = tokio::fs::symlink_metadata(&path)
        .await
        .map_err(|e| TunnelError::from_path_io(e, client_path))?;

    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(&path).await
    } else {
        tokio::fs::remove_file(&path).await
    };
    removed.map_err(|e| TunnelError::from_path_io(e, client_path))?;

    debug!(path = %path.display(), "file deleted");
    Ok(())
}

/// Check that a client path names an existing regular file.
pub async fn require_file(guard: &WorkspaceGuard, client_path: &str) -> Result<std::path::PathBuf> {
    let path = guard.resolve(client_path).await?;
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(path),
        Ok(_) => Err(TunnelError::NotFound(client_path.to_string())),
        Err(e) => Err(TunnelError::from_path_io(e, client_path)),
    }
}
