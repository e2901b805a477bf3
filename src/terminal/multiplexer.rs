//! One interactive shell per session, relayed over the session channel.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use portable_pty::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{EventSink, Terminal, TerminalEvent, Utf8Decoder};
use crate::error::TunnelError;
use crate::execution::{process_group, Isolation};
use crate::pty::{default_shell, AsyncPtyReader, AsyncPtyWriter, NativePty, PtySize};
use crate::sandbox::{Supervision, DEFAULT_GUEST_WATCHDOG};
use crate::session::{SessionId, SessionRegistry, TerminalState};
use crate::Result;

/// Capacity of the per-terminal input queue.
const INPUT_QUEUE: usize = 256;
/// Capacity of the raw output queue between the pty reader and the pump.
const OUTPUT_QUEUE: usize = 64;
/// How long to wait for trailing output once the shell has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How new shells are started.
#[derive(Debug, Clone)]
pub struct TerminalSettings {
    /// Shell program. An in-image path when shells are sandboxed.
    pub shell: String,
    /// Initial pty size.
    pub size: PtySize,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            size: PtySize::default(),
        }
    }
}

/// Spawns, drives and reclaims the interactive shells of all sessions.
#[derive(Debug)]
pub struct TerminalMultiplexer {
    registry: Arc<SessionRegistry>,
    settings: TerminalSettings,
    isolation: Isolation,
}

/// A shell whose I/O threads run but whose output is not relayed yet.
struct Started {
    terminal: Arc<Terminal>,
    output: mpsc::Receiver<Vec<u8>>,
    exited: oneshot::Receiver<io::Result<u32>>,
}

impl TerminalMultiplexer {
    /// Create a multiplexer backed by `registry`.
    ///
    /// Shells are started the same way as one-shot runs: directly, or
    /// through the sandbox helper.
    pub fn new(registry: Arc<SessionRegistry>, settings: TerminalSettings, isolation: Isolation) -> Self {
        Self {
            registry,
            settings,
            isolation,
        }
    }

    /// The registry this multiplexer installs terminals into.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Command line that starts a shell in `workspace`.
    pub fn shell_argv(&self, workspace: &Path) -> Result<Vec<OsString>> {
        match &self.isolation {
            Isolation::Host => Ok(vec![OsString::from(&self.settings.shell)]),
            Isolation::Sandbox(launcher) => launcher.argv(
                workspace,
                Path::new(&self.settings.shell),
                &[],
                &Supervision::for_server(None, DEFAULT_GUEST_WATCHDOG),
            ),
        }
    }

    /// Return the session's running shell, spawning one if there is none.
    ///
    /// Either way a [`TerminalEvent::Created`] acknowledgment is pushed to
    /// `sink`, which then becomes the destination of the shell's output. The
    /// boolean is `true` when a new shell was spawned.
    pub async fn create(&self, session: &SessionId, sink: EventSink) -> Result<(Arc<Terminal>, bool)> {
        let workspace = self.registry.get_or_create_workspace(session).await?;
        let starting = self.registry.start_lock(session)?;
        let _starting = starting.lock().await;

        if let Some(existing) = self.registry.terminal(session)? {
            if existing.is_running() {
                send_ack(&sink, existing.id()).await?;
                existing.attach(sink);
                debug!(term = %session, "channel reattached to running terminal");
                return Ok((existing, false));
            }
            // A dead handle still waiting for its exit watcher must not
            // report into the channel that is about to own the replacement.
            existing.detach();
        }

        let started = self.start(session, workspace, sink.clone()).await?;
        let terminal = Arc::clone(&started.terminal);
        self.registry.install_terminal(session, Arc::clone(&terminal))?;

        // The ack goes out before the pump can deliver any output.
        let acked = send_ack(&sink, terminal.id()).await;
        let pump = tokio::spawn(pump_output(Arc::clone(&terminal), started.output));
        tokio::spawn(watch_exit(
            Arc::clone(&self.registry),
            Arc::clone(&terminal),
            started.exited,
            pump,
        ));
        acked?;

        info!(term = %session, pid = terminal.pid(), "terminal started");
        Ok((terminal, true))
    }

    async fn start(&self, session: &SessionId, workspace: PathBuf, sink: EventSink) -> Result<Started> {
        let argv = self.shell_argv(&workspace)?;
        let size = self.settings.size;
        let session = session.clone();
        tokio::task::spawn_blocking(move || start_shell(session, &argv, &workspace, size, sink))
            .await
            .map_err(|e| TunnelError::Io(io::Error::other(e.to_string())))?
    }

    /// The session's running terminal, if `from` is the channel attached
    /// to it.
    fn lookup(&self, term_id: &str, from: &EventSink) -> Option<Arc<Terminal>> {
        let id = SessionId::parse(term_id).ok()?;
        self.registry
            .terminal(&id)
            .ok()
            .flatten()
            .filter(|t| t.is_running() && t.is_attached_to(from))
    }

    /// Forward bytes to a shell's stdin.
    ///
    /// Input is dropped unless `from` is the channel currently attached to
    /// the terminal.
    pub async fn input(&self, term_id: &str, from: &EventSink, data: Vec<u8>) {
        match self.lookup(term_id, from) {
            Some(terminal) => {
                if !terminal.send_input(data).await {
                    debug!(term = term_id, "input dropped, shell gone");
                }
            }
            None => debug!(term = term_id, "input for unknown or foreign terminal dropped"),
        }
    }

    /// Resize a shell's pty. Unknown and foreign terminals are ignored.
    pub fn resize(&self, term_id: &str, from: &EventSink, cols: u16, rows: u16) {
        let Some(terminal) = self.lookup(term_id, from) else {
            debug!(term = term_id, "resize for unknown or foreign terminal ignored");
            return;
        };
        if let Err(e) = terminal.resize(PtySize::clamped(rows, cols)) {
            warn!(term = term_id, "resize failed: {}", e);
        }
    }

    /// Kill every live shell and every in-flight execution.
    pub fn shutdown(&self) {
        let (terminals, pids) = match self.registry.drain() {
            Ok(drained) => drained,
            Err(e) => {
                error!("cannot drain sessions: {}", e);
                return;
            }
        };

        info!(
            terminals = terminals.len(),
            executions = pids.len(),
            "reclaiming session processes"
        );
        for terminal in terminals {
            terminal.kill();
        }
        for pid in pids {
            process_group::kill_group(pid);
        }
    }
}

async fn send_ack(sink: &EventSink, term_id: &str) -> Result<()> {
    let ack = TerminalEvent::Created {
        term_id: term_id.to_string(),
    };
    sink.send(ack).await.map_err(|_| {
        TunnelError::TransportError("session channel closed before terminal was attached".to_string())
    })
}

/// Spawn `argv` on a pty and start its I/O threads.
///
/// Runs off the async workers: openpty and fork block.
fn start_shell(
    session: SessionId,
    argv: &[OsString],
    workspace: &Path,
    size: PtySize,
    sink: EventSink,
) -> Result<Started> {
    let shell = NativePty::new().spawn_command(argv, workspace, size)?;
    let mut killer = shell.killer();

    let io = shell
        .take_reader()
        .and_then(|reader| Ok((reader, shell.take_writer()?)));
    let (reader, writer) = match io {
        Ok(io) => io,
        Err(e) => {
            let _ = killer.kill();
            return Err(e);
        }
    };

    let pid = shell.pid();
    let (master, child) = shell.into_parts();
    let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
    let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE);
    let (exit_tx, exit_rx) = oneshot::channel();

    let threads = AsyncPtyWriter::new(writer, input_rx)
        .spawn()
        .and_then(|_| AsyncPtyReader::new(reader, output_tx).spawn())
        .and_then(|_| spawn_exit_waiter(child, exit_tx));
    if let Err(e) = threads {
        let _ = killer.kill();
        return Err(e.into());
    }

    let terminal = Arc::new(Terminal::new(session, pid, input_tx, master, killer, sink));
    terminal.transition(TerminalState::Running);
    Ok(Started {
        terminal,
        output: output_rx,
        exited: exit_rx,
    })
}

fn spawn_exit_waiter(
    mut child: Box<dyn Child + Send + Sync>,
    tx: oneshot::Sender<io::Result<u32>>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("pty-wait".to_string()).spawn(move || {
        let status = child.wait().map(|s| s.exit_code());
        let _ = tx.send(status);
    })
}

async fn pump_output(terminal: Arc<Terminal>, mut rx: mpsc::Receiver<Vec<u8>>) {
    let mut decoder = Utf8Decoder::new();
    while let Some(chunk) = rx.recv().await {
        let data = decoder.decode(&chunk);
        if data.is_empty() {
            continue;
        }
        terminal
            .deliver(TerminalEvent::Output {
                term_id: terminal.id().to_string(),
                data,
            })
            .await;
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        terminal
            .deliver(TerminalEvent::Output {
                term_id: terminal.id().to_string(),
                data: tail,
            })
            .await;
    }
}

async fn watch_exit(
    registry: Arc<SessionRegistry>,
    terminal: Arc<Terminal>,
    exited: oneshot::Receiver<io::Result<u32>>,
    pump: JoinHandle<()>,
) {
    let exit_code = match exited.await {
        Ok(Ok(code)) => Some(code),
        Ok(Err(e)) => {
            warn!(term = %terminal.session(), "wait failed: {}", e);
            None
        }
        Err(_) => {
            error!(term = %terminal.session(), "exit waiter vanished");
            None
        }
    };
    terminal.transition(TerminalState::Exited);

    let abort = pump.abort_handle();
    if tokio::time::timeout(DRAIN_GRACE, pump).await.is_err() {
        debug!(term = %terminal.session(), "pty still open after exit, closing relay");
        abort.abort();
    }

    if let Err(e) = registry.release_terminal(terminal.session(), terminal.generation()) {
        error!(term = %terminal.session(), "cannot release terminal: {}", e);
    }

    info!(term = %terminal.session(), exit_code = ?exit_code, "terminal exited");
    terminal
        .deliver(TerminalEvent::Exited {
            term_id: terminal.id().to_string(),
            exit_code,
        })
        .await;
}
