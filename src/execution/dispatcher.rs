//! One-shot guest runs against a session workspace.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::language::LanguageTable;
use super::outcome::{CompileOutcome, ExecutionOutcome};
use super::process_group;
use crate::error::TunnelError;
use crate::sandbox::{GuestArg, SandboxLauncher, Supervision, HELPER_FAILURE_STATUS, HELPER_TIMEOUT_STATUS};
use crate::session::{SessionId, SessionRegistry};
use crate::workspace::files;
use crate::Result;

/// Default hard time limit for one run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default delay before the watchdog re-kills a timed-out group.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_millis(1000);
/// Default cap on captured bytes per stream.
pub const DEFAULT_MAX_OUTPUT: usize = 10 * 1024 * 1024;

const READ_CHUNK: usize = 8192;

/// Limits and language tables for guest runs.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Hard time limit.
    pub timeout: Duration,
    /// Margin after the limit at which the group is killed again.
    pub watchdog: Duration,
    /// Captured bytes per stream before truncation.
    pub max_output_bytes: usize,
    /// Interpreters by language.
    pub languages: LanguageTable,
    /// Compilers by language.
    pub compilers: LanguageTable,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            watchdog: DEFAULT_WATCHDOG,
            max_output_bytes: DEFAULT_MAX_OUTPUT,
            languages: LanguageTable::interpreters(),
            compilers: LanguageTable::compilers(),
        }
    }
}

/// Where guests run.
#[derive(Debug, Clone)]
pub enum Isolation {
    /// Directly on the host, as the server's own user.
    Host,
    /// Through the `sandbox-exec` helper, confined to a root image.
    Sandbox(SandboxLauncher),
}

/// Request to run source code or a workspace file.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub session_id: String,
    pub language: String,
    pub code: Option<String>,
    pub filepath: Option<String>,
}

/// Request to compile a workspace file.
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
    pub session_id: String,
    pub filepath: String,
    pub language: String,
}

/// Runs interpreters and compilers for sessions, with hard timeouts.
#[derive(Debug)]
pub struct ExecutionDispatcher {
    registry: Arc<SessionRegistry>,
    settings: ExecutionSettings,
    isolation: Isolation,
    last_script: AtomicU64,
}

impl ExecutionDispatcher {
    /// Create a dispatcher.
    pub fn new(registry: Arc<SessionRegistry>, settings: ExecutionSettings, isolation: Isolation) -> Self {
        Self {
            registry,
            settings,
            isolation,
            last_script: AtomicU64::new(0),
        }
    }

    /// Active limits.
    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    fn image_root(&self) -> Option<&Path> {
        match &self.isolation {
            Isolation::Host => None,
            Isolation::Sandbox(launcher) => Some(launcher.root()),
        }
    }

    /// Unique temp script name: `script_<n>.<ext>`, `n` strictly increasing.
    fn next_script_name(&self, extension: &str) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let previous = self
            .last_script
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(0);
        let n = now.max(previous + 1);
        format!("script_{}.{}", n, extension)
    }

    /// Run source code or a workspace file with the language's interpreter.
    ///
    /// `filepath` wins over `code`. The interpreter is resolved before any
    /// file is written.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        let (session, workspace) = self.registry.workspace_for(&request.session_id).await?;
        let guard = self.registry.guard(&workspace);
        let interpreter = self
            .settings
            .languages
            .resolve(&request.language, self.image_root())?;

        let filepath = request.filepath.as_deref().filter(|p| !p.is_empty());
        let code = request.code.filter(|c| !c.is_empty());

        let (source, script) = match (filepath, code) {
            (Some(path), _) => (files::require_file(&guard, path).await?, None),
            (None, Some(code)) => {
                let path = workspace.join(self.next_script_name(&interpreter.extension));
                let script = TempScript::write(path, &code).await?;
                (script.path.clone(), Some(script))
            }
            (None, None) => {
                return Err(TunnelError::BadRequest(
                    "either code or filepath is required".to_string(),
                ))
            }
        };

        info!(
            session = %session,
            language = %request.language,
            program = %interpreter.program.display(),
            "execution started"
        );
        let outcome = self
            .run(&session, &workspace, &interpreter.program, &[GuestArg::Path(source)])
            .await;
        if let Some(script) = script {
            script.remove().await;
        }
        outcome
    }

    /// Compile a workspace file; the binary lands next to the source.
    pub async fn compile(&self, request: CompileRequest) -> Result<CompileOutcome> {
        let (session, workspace) = self.registry.workspace_for(&request.session_id).await?;
        let guard = self.registry.guard(&workspace);
        let compiler = self
            .settings
            .compilers
            .resolve(&request.language, self.image_root())?;

        let source = files::require_file(&guard, &request.filepath).await?;
        let output = guard.resolve(&compile_output_path(&request.filepath)).await?;
        let output_path = guard
            .relative(&output)
            .unwrap_or_else(|| compile_output_path(&request.filepath));

        info!(session = %session, source = %request.filepath, "compile started");
        let args = [
            GuestArg::Path(source),
            GuestArg::literal("-o"),
            GuestArg::Path(output),
        ];
        let outcome = self.run(&session, &workspace, &compiler.program, &args).await?;

        if outcome.success() {
            Ok(CompileOutcome::Built { output_path })
        } else {
            Ok(CompileOutcome::Failed(outcome))
        }
    }

    fn command(&self, workspace: &Path, program: &Path, args: &[GuestArg]) -> Result<Command> {
        match &self.isolation {
            Isolation::Host => {
                let mut cmd = Command::new(program);
                cmd.args(args.iter().map(GuestArg::to_host)).current_dir(workspace);
                Ok(cmd)
            }
            Isolation::Sandbox(launcher) => {
                let supervision = Supervision::for_server(Some(self.settings.timeout), self.settings.watchdog);
                launcher.command(workspace, program, args, &supervision)
            }
        }
    }

    /// First reclamation step once the time limit has passed.
    ///
    /// A host guest is killed outright. A sandboxed guest runs under a uid
    /// this process cannot signal, so the helper is asked to reclaim it; the
    /// watchdog's `SIGKILL` follows if the helper does not exit in time.
    fn reclaim(&self, pid: u32, child: &mut tokio::process::Child) {
        match &self.isolation {
            Isolation::Host => {
                process_group::kill_group(pid);
                if let Err(e) = child.start_kill() {
                    debug!(pid, "start_kill failed: {}", e);
                }
            }
            Isolation::Sandbox(_) => {
                process_group::terminate_group(pid);
            }
        }
    }

    async fn run(
        &self,
        session: &SessionId,
        workspace: &Path,
        program: &Path,
        args: &[GuestArg],
    ) -> Result<ExecutionOutcome> {
        let mut cmd = self.command(workspace, program, args)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process_group::configure(&mut cmd);

        let start = Instant::now();
        let mut child = cmd.spawn()?;
        let pid = child.id().unwrap_or(0);
        let _ticket = self.registry.begin_execution(session, pid)?;

        let limit = self.settings.max_output_bytes;
        let stdout = Captured::new();
        let stderr = Captured::new();
        let readers: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|s| spawn_capture(s, Arc::clone(&stdout), limit)),
            child.stderr.take().map(|s| spawn_capture(s, Arc::clone(&stderr), limit)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = tokio::time::sleep(self.settings.timeout) => None,
        };
        let mut timed_out = status.is_none();
        let watchdog = self.settings.watchdog;

        // Both the exit wait and output collection end at `deadline`.
        let (status, deadline) = match status {
            Some(status) => {
                // Stray background jobs of the guest go with it.
                process_group::kill_group(pid);
                (Some(status), tokio::time::Instant::now() + watchdog)
            }
            None => {
                warn!(
                    session = %session,
                    pid,
                    "{}",
                    TunnelError::ExecutionTimeout(self.settings.timeout)
                );
                let deadline = tokio::time::Instant::now() + watchdog;
                self.reclaim(pid, &mut child);

                tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    if process_group::kill_group(pid) {
                        warn!(pid, "watchdog killed surviving guest processes");
                    }
                });

                let status = tokio::time::timeout_at(deadline, child.wait())
                    .await
                    .ok()
                    .and_then(|r| r.ok());
                (status, deadline)
            }
        };

        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout_at(deadline, reader).await.is_err() {
                debug!(pid, "output still open, abandoning capture");
                abort.abort();
            }
        }

        let mut exit_code = if timed_out {
            None
        } else {
            status.and_then(|s| s.code())
        };
        if matches!(self.isolation, Isolation::Sandbox(_)) {
            match exit_code {
                Some(HELPER_TIMEOUT_STATUS) => {
                    warn!(
                        session = %session,
                        "{}",
                        TunnelError::ExecutionTimeout(self.settings.timeout)
                    );
                    timed_out = true;
                    exit_code = None;
                }
                Some(HELPER_FAILURE_STATUS) => {
                    warn!(session = %session, "sandbox helper refused to start the guest");
                }
                _ => {}
            }
        }

        let (stdout, stdout_cut) = Captured::drain(&stdout);
        let (stderr, stderr_cut) = Captured::drain(&stderr);
        let outcome = ExecutionOutcome {
            stdout,
            stderr,
            exit_code,
            timed_out,
            truncated: stdout_cut || stderr_cut,
            duration: start.elapsed(),
        };
        info!(
            session = %session,
            exit_code = ?outcome.exit_code,
            timed_out,
            elapsed_ms = outcome.duration.as_millis() as u64,
            "execution finished"
        );
        Ok(outcome)
    }
}

/// Binary path for a compiled source: extension stripped, or `.out` added.
pub fn compile_output_path(source: &str) -> String {
    let path = Path::new(source);
    let output: PathBuf = if path.extension().is_some() {
        path.with_extension("")
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".out");
        PathBuf::from(name)
    };
    output.to_string_lossy().into_owned()
}

/// Temporary source file; removed once the run is over.
struct TempScript {
    path: PathBuf,
    removed: bool,
}

impl TempScript {
    async fn write(path: PathBuf, content: &str) -> Result<Self> {
        let script = Self { path, removed: false };
        tokio::fs::write(&script.path, content).await?;
        Ok(script)
    }

    async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            log_removal_failure(&self.path, &e);
        }
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // The run was abandoned early (error or dropped request).
        let path = std::mem::take(&mut self.path);
        let remove = move || {
            if let Err(e) = std::fs::remove_file(&path) {
                log_removal_failure(&path, &e);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

fn log_removal_failure(path: &Path, err: &std::io::Error) {
    if err.kind() != std::io::ErrorKind::NotFound {
        warn!(path = %path.display(), "cannot remove temp script: {}", err);
    }
}

/// Bytes captured from one stream, shared with its reader task.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Decoded text and whether it was cut.
    fn drain(shared: &Mutex<Self>) -> (String, bool) {
        match shared.lock() {
            Ok(mut captured) => {
                let bytes = std::mem::take(&mut captured.bytes);
                (String::from_utf8_lossy(&bytes).into_owned(), captured.truncated)
            }
            Err(_) => (String::new(), false),
        }
    }
}

fn spawn_capture<R>(mut stream: R, sink: Arc<Mutex<Captured>>, limit: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("capture read failed: {}", e);
                    break;
                }
            };
            let Ok(mut captured) = sink.lock() else {
                break;
            };
            let room = limit.saturating_sub(captured.bytes.len());
            if n > room {
                captured.truncated = true;
            }
            // Keep draining past the cap so the guest never blocks on a full pipe.
            let keep = n.min(room);
            captured.bytes.extend_from_slice(&buf[..keep]);
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dispatcher_with(settings: ExecutionSettings) -> (TempDir, Arc<SessionRegistry>, ExecutionDispatcher) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::new(dir.path().join("workspaces")));
        let dispatcher = ExecutionDispatcher::new(Arc::clone(&registry), settings, Isolation::Host);
        (dir, registry, dispatcher)
    }

    fn dispatcher() -> (TempDir, Arc<SessionRegistry>, ExecutionDispatcher) {
        dispatcher_with(ExecutionSettings::default())
    }

    fn sh(session: &str, code: &str) -> ExecutionRequest {
        ExecutionRequest {
            session_id: session.to_string(),
            language: "sh".to_string(),
            code: Some(code.to_string()),
            filepath: None,
        }
    }

    fn workspace_entries(registry: &SessionRegistry, session: &str) -> Vec<String> {
        let path = registry.workspace_path(&SessionId::parse(session).unwrap());
        let mut names: Vec<_> = std::fs::read_dir(path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_execute_captures_streams_and_exit_code() {
        let (_dir, registry, dispatcher) = dispatcher();
        let outcome = dispatcher
            .execute(sh("alice", "echo out; echo err >&2; exit 3"))
            .await
            .unwrap();

        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.timed_out);
        assert!(workspace_entries(&registry, "alice").is_empty());
        assert_eq!(registry.in_flight(&SessionId::parse("alice").unwrap()), 0);
    }

    #[tokio::test]
    async fn test_execute_runs_in_workspace() {
        let (_dir, registry, dispatcher) = dispatcher();
        let outcome = dispatcher.execute(sh("bob", "pwd")).await.unwrap();
        let expected = registry.workspace_path(&SessionId::parse("bob").unwrap());
        let expected = std::fs::canonicalize(expected).unwrap();
        assert_eq!(
            std::fs::canonicalize(outcome.stdout.trim()).unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_execute_file_is_kept() {
        let (_dir, registry, dispatcher) = dispatcher();
        let id = SessionId::parse("carol").unwrap();
        let workspace = registry.get_or_create_workspace(&id).await.unwrap();
        std::fs::write(workspace.join("run.sh"), "echo from-file").unwrap();

        let outcome = dispatcher
            .execute(ExecutionRequest {
                session_id: "carol".to_string(),
                language: "sh".to_string(),
                code: Some("echo from-code".to_string()),
                filepath: Some("run.sh".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(outcome.stdout, "from-file\n");
        assert!(workspace.join("run.sh").is_file());
        assert_eq!(workspace_entries(&registry, "carol"), vec!["run.sh"]);
    }

    #[tokio::test]
    async fn test_execute_missing_file() {
        let (_dir, _registry, dispatcher) = dispatcher();
        let err = dispatcher
            .execute(ExecutionRequest {
                session_id: "dave".to_string(),
                language: "sh".to_string(),
                code: None,
                filepath: Some("missing.sh".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_escaping_file_denied() {
        let (_dir, _registry, dispatcher) = dispatcher();
        let err = dispatcher
            .execute(ExecutionRequest {
                session_id: "dave".to_string(),
                language: "sh".to_string(),
                code: None,
                filepath: Some("../../etc/passwd".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_execute_requires_code_or_file() {
        let (_dir, _registry, dispatcher) = dispatcher();
        let err = dispatcher
            .execute(ExecutionRequest {
                session_id: "erin".to_string(),
                language: "sh".to_string(),
                code: Some(String::new()),
                filepath: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unsupported_language_spawns_nothing() {
        let (_dir, registry, dispatcher) = dispatcher();
        let mut request = sh("frank", "echo never");
        request.language = "cobol".to_string();

        let err = dispatcher.execute(request).await.unwrap_err();
        assert!(matches!(err, TunnelError::UnsupportedLanguage(_)));
        assert!(workspace_entries(&registry, "frank").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_session() {
        let (_dir, _registry, dispatcher) = dispatcher();
        let err = dispatcher.execute(sh("", "echo hi")).await.unwrap_err();
        assert!(matches!(err, TunnelError::InvalidSession(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_group_within_margin() {
        let (_dir, registry, dispatcher) = dispatcher_with(ExecutionSettings {
            timeout: Duration::from_secs(1),
            watchdog: Duration::from_millis(200),
            ..ExecutionSettings::default()
        });

        let start = Instant::now();
        let outcome = dispatcher
            .execute(sh("gina", "echo started; sleep 30 & sleep 30"))
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(outcome.timed_out);
        assert!(outcome.exit_code.is_none());
        assert_eq!(outcome.stdout, "started\n");
        assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
        assert!(workspace_entries(&registry, "gina").is_empty());
    }

    /// Sandboxed dispatcher whose helper is the shell script `helper`.
    fn sandboxed_with(
        helper: &str,
        settings: ExecutionSettings,
    ) -> (TempDir, Arc<SessionRegistry>, ExecutionDispatcher) {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let image = dir.path().join("rootfs");
        std::fs::create_dir_all(image.join("bin")).unwrap();
        std::fs::write(image.join("bin/sh"), "").unwrap();

        let helper_path = dir.path().join("sandbox-exec");
        std::fs::write(&helper_path, format!("#!/bin/sh\n{}\n", helper)).unwrap();
        std::fs::set_permissions(&helper_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let registry = Arc::new(SessionRegistry::new(image.join("workspaces")));
        let launcher = SandboxLauncher::new(&image, 1001, &helper_path, false);
        let dispatcher = ExecutionDispatcher::new(Arc::clone(&registry), settings, Isolation::Sandbox(launcher));
        (dir, registry, dispatcher)
    }

    #[tokio::test]
    async fn test_sandbox_timeout_bounded_by_watchdog() {
        // A helper that ignores the termination request and keeps running.
        let (_dir, registry, dispatcher) = sandboxed_with(
            "trap '' TERM; echo started; while :; do sleep 0.1; done",
            ExecutionSettings {
                timeout: Duration::from_secs(1),
                watchdog: Duration::from_secs(1),
                ..ExecutionSettings::default()
            },
        );

        let start = Instant::now();
        let outcome = dispatcher.execute(sh("kim", "sleep 30")).await.unwrap();
        let elapsed = start.elapsed();

        assert!(outcome.timed_out);
        assert!(outcome.exit_code.is_none());
        assert_eq!(outcome.stdout, "started\n");
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(2700), "took {:?}", elapsed);
        assert!(workspace_entries(&registry, "kim").is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_helper_timeout_status() {
        let (dir, _registry, dispatcher) = sandboxed_with(
            "printf '%s\\n' \"$@\" > \"$(dirname \"$0\")/helper-args\"; exit 124",
            ExecutionSettings {
                timeout: Duration::from_secs(5),
                watchdog: Duration::from_millis(300),
                ..ExecutionSettings::default()
            },
        );

        let outcome = dispatcher.execute(sh("lee", "echo hi")).await.unwrap();
        assert!(outcome.timed_out);
        assert!(outcome.exit_code.is_none());

        let args = std::fs::read_to_string(dir.path().join("helper-args")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(&args[..4], &["--timeout-ms", "5000", "--watchdog-ms", "300"]);
        assert_eq!(args[4], "--watch-pid");
        assert_eq!(args[5], std::process::id().to_string());
        assert_eq!(args[7], "1001");
        assert_eq!(args[8], "/workspaces/lee");
        assert_eq!(args[9], "/bin/sh");
        assert!(args[10].starts_with("/workspaces/lee/script_"));
    }

    #[tokio::test]
    async fn test_output_cap_truncates() {
        let (_dir, _registry, dispatcher) = dispatcher_with(ExecutionSettings {
            max_output_bytes: 16,
            ..ExecutionSettings::default()
        });

        let outcome = dispatcher
            .execute(sh("hank", "i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done"))
            .await
            .unwrap();
        assert_eq!(outcome.stdout.len(), 16);
        assert!(outcome.truncated);
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_concurrent_sessions_do_not_share_output() {
        let (_dir, _registry, dispatcher) = dispatcher();
        let dispatcher = Arc::new(dispatcher);

        let mut handles = Vec::new();
        for i in 0..8 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                let session = format!("s{}", i);
                let outcome = dispatcher
                    .execute(sh(&session, &format!("sleep 0.1; echo {}", session)))
                    .await
                    .unwrap();
                (session, outcome.stdout)
            }));
        }

        for handle in handles {
            let (session, stdout) = handle.await.unwrap();
            assert_eq!(stdout, format!("{}\n", session));
        }
    }

    #[tokio::test]
    async fn test_script_names_are_unique() {
        let (_dir, _registry, dispatcher) = dispatcher();
        let names: std::collections::HashSet<_> =
            (0..1000).map(|_| dispatcher.next_script_name("py")).collect();
        assert_eq!(names.len(), 1000);
        assert!(names.iter().all(|n| n.starts_with("script_") && n.ends_with(".py")));
    }

    #[test]
    fn test_compile_output_path() {
        assert_eq!(compile_output_path("main.c"), "main");
        assert_eq!(compile_output_path("src/app.cpp"), "src/app");
        assert_eq!(compile_output_path("prog"), "prog.out");
    }

    #[tokio::test]
    async fn test_compile_with_toy_compiler() {
        // `sh <source> -o <output>`: the "source" writes its own binary.
        let mut compilers = std::collections::BTreeMap::new();
        compilers.insert(
            "toy".to_string(),
            crate::execution::LanguageSpec {
                extension: "toy".to_string(),
                candidates: vec![PathBuf::from("/bin/sh")],
            },
        );
        let (_dir, registry, dispatcher) = dispatcher_with(ExecutionSettings {
            compilers: LanguageTable::new(compilers),
            ..ExecutionSettings::default()
        });

        let id = SessionId::parse("ivy").unwrap();
        let workspace = registry.get_or_create_workspace(&id).await.unwrap();
        std::fs::create_dir(workspace.join("src")).unwrap();
        std::fs::write(workspace.join("src/ok.toy"), "printf built > \"$2\"").unwrap();
        std::fs::write(workspace.join("src/bad.toy"), "echo 'syntax error' >&2; exit 1").unwrap();

        let built = dispatcher
            .compile(CompileRequest {
                session_id: "ivy".to_string(),
                filepath: "src/ok.toy".to_string(),
                language: "toy".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            built,
            CompileOutcome::Built {
                output_path: "src/ok".to_string()
            }
        );
        assert_eq!(std::fs::read_to_string(workspace.join("src/ok")).unwrap(), "built");

        let failed = dispatcher
            .compile(CompileRequest {
                session_id: "ivy".to_string(),
                filepath: "src/bad.toy".to_string(),
                language: "toy".to_string(),
            })
            .await
            .unwrap();
        match failed {
            CompileOutcome::Failed(outcome) => {
                assert_eq!(outcome.exit_code, Some(1));
                assert_eq!(outcome.stderr, "syntax error\n");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_compile_unknown_language() {
        let (_dir, _registry, dispatcher) = dispatcher();
        let err = dispatcher
            .compile(CompileRequest {
                session_id: "jack".to_string(),
                filepath: "main.rs".to_string(),
                language: "rust".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::UnsupportedLanguage(_)));
    }
}
