//! Session registry: the single owner of per-session resources.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tracing::{debug, info};

use super::SessionId;
use crate::error::TunnelError;
use crate::terminal::Terminal;
use crate::workspace::files::{open_permissions, SHARED_DIR_MODE};
use crate::workspace::WorkspaceGuard;
use crate::Result;

/// Mode of the workspace root when workspaces are shared with a guest uid:
/// guests may pass through it but not list the other sessions.
pub const SHARED_ROOT_MODE: u32 = 0o711;

/// Resources owned by one session.
#[derive(Debug)]
pub struct SessionEntry {
    /// Private workspace directory.
    pub workspace: PathBuf,
    /// Live interactive terminal, if any.
    terminal: Option<Arc<Terminal>>,
    /// In-flight execution processes, keyed by execution number.
    executions: HashMap<u64, u32>,
    /// Held while a terminal for this session is being started.
    starting: Arc<tokio::sync::Mutex<()>>,
    /// Time when the entry was created.
    pub created_at: Instant,
}

impl SessionEntry {
    fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            terminal: None,
            executions: HashMap::new(),
            starting: Arc::new(tokio::sync::Mutex::new(())),
            created_at: Instant::now(),
        }
    }

    /// Check if a terminal start is pending on this entry.
    fn is_starting(&self) -> bool {
        Arc::strong_count(&self.starting) > 1
    }
}

/// Thread-safe registry mapping session IDs to their resources.
///
/// Every mutation of the mapping goes through a method of this type; no
/// lock is ever held across an await point.
#[derive(Debug)]
pub struct SessionRegistry {
    root: PathBuf,
    shared: bool,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    next_execution: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry whose workspaces all live under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shared: false,
            sessions: RwLock::new(HashMap::new()),
            next_execution: AtomicU64::new(1),
        }
    }

    /// Make every workspace writable by a sandbox guest uid.
    ///
    /// Workspaces are created by the server's user but written by guests
    /// running under another uid, so they are opened up to everyone; the
    /// root is only traversable, which keeps session names unlisted.
    pub fn with_shared_workspaces(mut self) -> Self {
        self.shared = true;
        self
    }

    /// Check if workspaces are shared with a guest uid.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// File-operation guard for a workspace of this registry.
    pub fn guard(&self, workspace: &Path) -> WorkspaceGuard {
        WorkspaceGuard::new(workspace).shared(self.shared)
    }

    /// The fixed root every workspace descends from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the workspace path for a session without touching the disk.
    pub fn workspace_path(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<SessionId, SessionEntry>>> {
        self.sessions.read().map_err(|_| TunnelError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<SessionId, SessionEntry>>> {
        self.sessions.write().map_err(|_| TunnelError::LockPoisoned)
    }

    /// Return the session's workspace, creating the directory tree if absent.
    ///
    /// Idempotent: repeated calls return the same path and never remove
    /// existing contents.
    pub async fn get_or_create_workspace(&self, id: &SessionId) -> Result<PathBuf> {
        let path = self.workspace_path(id);
        tokio::fs::create_dir_all(&path).await?;

        if self.shared && !self.contains(id)? {
            open_permissions(&self.root, SHARED_ROOT_MODE).await;
            open_permissions(&path, SHARED_DIR_MODE).await;
        }

        let mut sessions = self.write()?;
        if !sessions.contains_key(id) {
            debug!(session = %id, workspace = %path.display(), "session registered");
            sessions.insert(id.clone(), SessionEntry::new(path.clone()));
        }
        Ok(path)
    }

    /// Validate a raw client-supplied id and return it with its workspace.
    pub async fn workspace_for(&self, raw: &str) -> Result<(SessionId, PathBuf)> {
        let id = SessionId::parse(raw)?;
        let path = self.get_or_create_workspace(&id).await?;
        Ok((id, path))
    }

    /// Check if a session is registered.
    pub fn contains(&self, id: &SessionId) -> Result<bool> {
        Ok(self.read()?.contains_key(id))
    }

    /// Get the session's current terminal handle.
    pub fn terminal(&self, id: &SessionId) -> Result<Option<Arc<Terminal>>> {
        Ok(self.read()?.get(id).and_then(|e| e.terminal.clone()))
    }

    /// Lock serializing terminal starts for one session.
    ///
    /// Holding it keeps the session entry registered. The registry lock
    /// itself is never held while a shell is spawned.
    pub fn start_lock(&self, id: &SessionId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let workspace = self.workspace_path(id);
        let mut sessions = self.write()?;
        let entry = sessions
            .entry(id.clone())
            .or_insert_with(|| SessionEntry::new(workspace));
        Ok(Arc::clone(&entry.starting))
    }

    /// Make `terminal` the session's current terminal.
    pub fn install_terminal(&self, id: &SessionId, terminal: Arc<Terminal>) -> Result<()> {
        let workspace = self.workspace_path(id);
        let mut sessions = self.write()?;
        sessions
            .entry(id.clone())
            .or_insert_with(|| SessionEntry::new(workspace))
            .terminal = Some(terminal);
        Ok(())
    }

    /// Drop the terminal handle of the given generation.
    ///
    /// A stale generation (the session already has a newer terminal) is
    /// ignored. The session entry itself is removed unless executions are
    /// still in flight or a new terminal is being started.
    pub fn release_terminal(&self, id: &SessionId, generation: u64) -> Result<bool> {
        let mut sessions = self.write()?;
        let Some(entry) = sessions.get_mut(id) else {
            return Ok(false);
        };

        match &entry.terminal {
            Some(t) if t.generation() == generation => {}
            _ => return Ok(false),
        }

        entry.terminal = None;
        if entry.executions.is_empty() && !entry.is_starting() {
            sessions.remove(id);
            info!(session = %id, "session released");
        }
        Ok(true)
    }

    /// Track an in-flight execution process.
    ///
    /// The process is untracked when the returned ticket is dropped.
    pub fn begin_execution(self: &Arc<Self>, id: &SessionId, pid: u32) -> Result<ExecutionTicket> {
        let execution = self.next_execution.fetch_add(1, Ordering::Relaxed);
        let workspace = self.workspace_path(id);

        let mut sessions = self.write()?;
        sessions
            .entry(id.clone())
            .or_insert_with(|| SessionEntry::new(workspace))
            .executions
            .insert(execution, pid);

        Ok(ExecutionTicket {
            registry: Arc::clone(self),
            session: id.clone(),
            execution,
        })
    }

    fn finish_execution(&self, id: &SessionId, execution: u64) {
        if let Ok(mut sessions) = self.sessions.write() {
            if let Some(entry) = sessions.get_mut(id) {
                entry.executions.remove(&execution);
            }
        }
    }

    /// Number of executions currently in flight for a session.
    pub fn in_flight(&self, id: &SessionId) -> usize {
        self.sessions
            .read()
            .ok()
            .and_then(|s| s.get(id).map(|e| e.executions.len()))
            .unwrap_or(0)
    }

    /// Get the number of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// List all registered session IDs.
    pub fn list_ids(&self) -> Result<Vec<SessionId>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Detach every terminal and collect every in-flight process id.
    ///
    /// Used on shutdown so the caller can reclaim the processes.
    pub fn drain(&self) -> Result<(Vec<Arc<Terminal>>, Vec<u32>)> {
        let mut sessions = self.write()?;
        let mut terminals = Vec::new();
        let mut pids = Vec::new();
        for entry in sessions.values_mut() {
            terminals.extend(entry.terminal.take());
            pids.extend(entry.executions.values().copied());
        }
        Ok((terminals, pids))
    }
}

/// Registration of one in-flight execution; untracks itself on drop.
#[derive(Debug)]
pub struct ExecutionTicket {
    registry: Arc<SessionRegistry>,
    session: SessionId,
    execution: u64,
}

impl ExecutionTicket {
    /// Process-unique execution number.
    pub fn id(&self) -> u64 {
        self.execution
    }
}

impl Drop for ExecutionTicket {
    fn drop(&mut self) {
        self.registry.finish_execution(&self.session, self.execution);
    }
}
