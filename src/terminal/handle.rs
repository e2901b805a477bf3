//! Handle to one live interactive shell.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use portable_pty::{ChildKiller, MasterPty};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::TerminalEvent;
use crate::error::TunnelError;
use crate::pty::{self, PtySize};
use crate::session::{SessionId, TerminalState};
use crate::Result;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Channel a terminal pushes its events to.
pub type EventSink = mpsc::Sender<TerminalEvent>;

/// A session's interactive shell.
///
/// Owned by the [`SessionRegistry`](crate::session::SessionRegistry); the
/// pty I/O tasks hold their own clones of the `Arc`.
pub struct Terminal {
    session: SessionId,
    generation: u64,
    pid: u32,
    state: Mutex<TerminalState>,
    input: mpsc::Sender<Vec<u8>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    sink: Mutex<Option<EventSink>>,
}

impl Terminal {
    /// Handle for a freshly spawned shell whose events go to `sink`.
    pub(super) fn new(
        session: SessionId,
        pid: u32,
        input: mpsc::Sender<Vec<u8>>,
        master: Box<dyn MasterPty + Send>,
        killer: Box<dyn ChildKiller + Send + Sync>,
        sink: EventSink,
    ) -> Self {
        Self {
            session,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            pid,
            state: Mutex::new(TerminalState::Starting),
            input,
            master: Mutex::new(master),
            killer: Mutex::new(killer),
            sink: Mutex::new(Some(sink)),
        }
    }

    /// Terminal id as seen by clients (the owning session's id).
    pub fn id(&self) -> &str {
        self.session.as_str()
    }

    /// Owning session.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Process-unique generation of this handle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Shell process id (0 if unknown).
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TerminalState {
        self.state.lock().map(|s| *s).unwrap_or(TerminalState::Exited)
    }

    /// Check if the shell is alive and accepting input.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub(super) fn transition(&self, target: TerminalState) -> bool {
        match self.state.lock() {
            Ok(mut state) => state.transition_to(target),
            Err(_) => false,
        }
    }

    /// Make `sink` the destination of all further events.
    pub fn attach(&self, sink: EventSink) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
    }

    /// Stop delivering events to whatever channel is attached.
    pub fn detach(&self) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = None;
        }
    }

    fn detach_if(&self, sink: &EventSink) {
        if let Ok(mut slot) = self.sink.lock() {
            if slot.as_ref().is_some_and(|s| s.same_channel(sink)) {
                *slot = None;
            }
        }
    }

    /// Check if `sink` is the channel currently attached.
    ///
    /// Only that channel may type into the shell or resize it.
    pub fn is_attached_to(&self, sink: &EventSink) -> bool {
        self.sink
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|s| s.same_channel(sink)))
            .unwrap_or(false)
    }

    /// Check if a channel is currently attached.
    pub fn has_sink(&self) -> bool {
        self.sink.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Queue bytes for the shell's stdin.
    ///
    /// Returns `false` if the shell is gone.
    pub async fn send_input(&self, data: Vec<u8>) -> bool {
        if !self.is_running() {
            return false;
        }
        self.input.send(data).await.is_ok()
    }

    /// Resize the pty.
    pub fn resize(&self, size: PtySize) -> Result<()> {
        let master = self.master.lock().map_err(|_| TunnelError::LockPoisoned)?;
        pty::resize(master.as_ref(), size)
    }

    /// Kill the shell process. Exit handling happens in the exit watcher.
    pub fn kill(&self) {
        if let Ok(mut killer) = self.killer.lock() {
            if let Err(e) = killer.kill() {
                debug!(term = %self.session, "kill failed: {}", e);
            }
        }
    }

    /// Push an event to the attached channel, if any.
    ///
    /// A closed channel is detached; the shell keeps running.
    pub(super) async fn deliver(&self, event: TerminalEvent) {
        let sink = match self.sink.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let Some(sink) = sink else {
            trace!(term = %self.session, "no channel attached, event dropped");
            return;
        };

        if sink.send(event).await.is_err() {
            let err = TunnelError::TransportError("session channel closed".to_string());
            warn!(term = %self.session, "{}", err);
            self.detach_if(&sink);
        }
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("session", &self.session)
            .field("generation", &self.generation)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
