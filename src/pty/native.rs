//! Native PTY implementation using portable-pty.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize as NativePtySize};

use super::PtySize;
use crate::error::TunnelError;
use crate::Result;

/// Get the default shell for the current platform.
pub fn default_shell() -> String {
    #[cfg(unix)]
    {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
    #[cfg(windows)]
    {
        "powershell.exe".to_string()
    }
}

impl From<PtySize> for NativePtySize {
    fn from(size: PtySize) -> Self {
        NativePtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: native_pty_system(),
        }
    }

    /// Spawn an interactive shell in a new PTY.
    ///
    /// # Arguments
    ///
    /// * `shell` - The shell program to execute (e.g., "/bin/bash").
    /// * `working_dir` - Directory the shell starts in.
    /// * `size` - The initial size of the PTY.
    pub fn spawn_shell(&self, shell: &str, working_dir: &Path, size: PtySize) -> Result<SpawnedShell> {
        self.spawn_command(&[OsString::from(shell)], working_dir, size)
    }

    /// Spawn `argv` in a new PTY.
    ///
    /// The host environment is inherited; `TERM` is set so that full-screen
    /// programs render correctly in the browser terminal.
    pub fn spawn_command(&self, argv: &[OsString], working_dir: &Path, size: PtySize) -> Result<SpawnedShell> {
        if argv.is_empty() {
            return Err(TunnelError::Pty("empty command line".to_string()));
        }

        let pair = self
            .pty_system
            .openpty(size.into())
            .map_err(|e| TunnelError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::from_argv(argv.to_vec());
        cmd.cwd(working_dir);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TunnelError::Pty(e.to_string()))?;

        // The slave end must be closed here, otherwise the master never sees
        // EOF once the shell exits.
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);

        Ok(SpawnedShell {
            master: pair.master,
            child,
            pid,
        })
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}

/// A spawned shell process with PTY.
pub struct SpawnedShell {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    pid: u32,
}

impl SpawnedShell {
    /// Process ID of the shell (0 if the platform did not report one).
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the writer (can only be called once).
    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>> {
        self.master
            .take_writer()
            .map_err(|e| TunnelError::Pty(e.to_string()))
    }

    /// Clone a reader for the PTY output.
    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>> {
        self.master
            .try_clone_reader()
            .map_err(|e| TunnelError::Pty(e.to_string()))
    }

    /// Get a handle that can kill the shell from another thread.
    pub fn killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        self.child.clone_killer()
    }

    /// Split into the master (for resizing) and the child (for waiting).
    pub fn into_parts(self) -> (Box<dyn MasterPty + Send>, Box<dyn Child + Send + Sync>) {
        (self.master, self.child)
    }
}

/// Resize a PTY master.
pub fn resize(master: &(dyn MasterPty + Send), size: PtySize) -> Result<()> {
    master
        .resize(size.into())
        .map_err(|e| TunnelError::Pty(e.to_string()))
}
