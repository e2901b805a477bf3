//! Path containment for client-supplied workspace paths.

use std::path::{Component, Path, PathBuf};

use crate::error::TunnelError;
use crate::Result;

/// Longest accepted client path, in bytes.
const MAX_PATH_LEN: usize = 4096;

/// Confines client-supplied paths to one workspace directory.
///
/// Every file operation resolves its path through [`WorkspaceGuard::resolve`]
/// first. Rejection happens on the lexical form alone, before any filesystem
/// call is made.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    root: PathBuf,
    shared: bool,
}

impl WorkspaceGuard {
    /// Create a guard for the given workspace root.
    ///
    /// A relative root is made absolute against the current directory and
    /// normalized, so that containment is always checked on absolute paths.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(root))
                .unwrap_or_else(|_| root.to_path_buf())
        };
        Self {
            root: normalize(&absolute).unwrap_or(absolute),
            shared: false,
        }
    }

    /// Mark the workspace as shared with a sandbox guest uid.
    ///
    /// Files and directories created through a shared guard stay writable
    /// by the guest.
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Check if the workspace is shared with a guest uid.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path to an absolute path strictly inside the root.
    ///
    /// Fails with `AccessDenied` when the normalized path escapes the root,
    /// names the root itself, contains a NUL byte, or traverses a symlink
    /// that points outside the workspace. The symlink check runs on the
    /// blocking pool.
    pub async fn resolve(&self, client_path: &str) -> Result<PathBuf> {
        let resolved = self.resolve_lexically(client_path)?;
        let guard = self.clone();
        let client_path = client_path.to_string();
        tokio::task::spawn_blocking(move || {
            guard.check_symlinks(&resolved, &client_path)?;
            Ok(resolved)
        })
        .await
        .map_err(|e| TunnelError::Io(std::io::Error::other(e.to_string())))?
    }

    /// Synchronous [`resolve`](Self::resolve), for callers already off the
    /// async workers.
    pub fn resolve_blocking(&self, client_path: &str) -> Result<PathBuf> {
        let resolved = self.resolve_lexically(client_path)?;
        self.check_symlinks(&resolved, client_path)?;
        Ok(resolved)
    }

    /// Lexical half of [`resolve`](Self::resolve); performs no I/O.
    pub fn resolve_lexically(&self, client_path: &str) -> Result<PathBuf> {
        if client_path.is_empty() || client_path.len() > MAX_PATH_LEN || client_path.contains('\0') {
            return Err(TunnelError::AccessDenied(display(client_path)));
        }

        let joined = self.root.join(client_path);
        let normalized =
            normalize(&joined).ok_or_else(|| TunnelError::AccessDenied(display(client_path)))?;

        if normalized == self.root || !normalized.starts_with(&self.root) {
            return Err(TunnelError::AccessDenied(display(client_path)));
        }
        Ok(normalized)
    }

    /// Express an absolute path inside the workspace relative to the root,
    /// with `/` separators, the way clients address files.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn check_symlinks(&self, resolved: &Path, client_path: &str) -> Result<()> {
        // The root itself may sit behind a symlink (e.g. /tmp on macOS).
        let Ok(canonical_root) = self.root.canonicalize() else {
            return Ok(());
        };

        let existing = resolved
            .ancestors()
            .find(|p| p.symlink_metadata().is_ok())
            .unwrap_or(&self.root);

        match existing.canonicalize() {
            Ok(canonical) if canonical.starts_with(&canonical_root) => Ok(()),
            Ok(_) => Err(TunnelError::AccessDenied(display(client_path))),
            // Dangling symlink: its target cannot be verified.
            Err(_) => Err(TunnelError::AccessDenied(display(client_path))),
        }
    }
}

/// Collapse `.` and `..` components without consulting the filesystem.
///
/// Returns `None` when `..` would climb above the filesystem root.
pub fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

fn display(client_path: &str) -> String {
    client_path.chars().filter(|c| !c.is_control()).take(256).collect()
}
