//! Configuration management for sandbox-tunnel.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::ServerConfig;
use crate::cli::Args;
use crate::execution::{ExecutionSettings, Isolation, LanguageTable};
use crate::pty::{default_shell, PtySize};
use crate::sandbox::SandboxLauncher;
use crate::terminal::TerminalSettings;
use crate::workspace::normalize;

/// Name of the helper binary looked up next to the server executable.
pub const HELPER_BINARY: &str = "sandbox-exec";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Workspace storage.
    pub workspace: WorkspaceSection,
    /// Interactive terminals.
    pub terminal: TerminalSection,
    /// One-shot execution limits and languages.
    pub execution: ExecutionSection,
    /// Guest isolation.
    pub sandbox: SandboxSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            graceful_shutdown: true,
        }
    }
}

/// Workspace configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSection {
    /// Directory holding one subdirectory per session. Defaults to
    /// `<sandbox root>/workspaces` when sandboxed, `./workspaces` otherwise.
    pub root: Option<PathBuf>,
}

/// Terminal configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSection {
    /// Shell program; `$SHELL` or `/bin/sh` when unset.
    pub shell: Option<String>,
    /// Initial columns.
    pub cols: u16,
    /// Initial rows.
    pub rows: u16,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            shell: None,
            cols: 80,
            rows: 24,
        }
    }
}

/// Execution configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    /// Hard time limit per run, in seconds.
    pub timeout_secs: u64,
    /// Watchdog margin after the limit, in milliseconds.
    pub watchdog_ms: u64,
    /// Captured bytes per stream.
    pub max_output_bytes: usize,
    /// Interpreters by language.
    pub languages: LanguageTable,
    /// Compilers by language.
    pub compilers: LanguageTable,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        let defaults = ExecutionSettings::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            watchdog_ms: defaults.watchdog.as_millis() as u64,
            max_output_bytes: defaults.max_output_bytes,
            languages: defaults.languages,
            compilers: defaults.compilers,
        }
    }
}

/// Sandbox configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Run guests through the isolation helper.
    pub enabled: bool,
    /// Root image guests are confined to.
    pub root: PathBuf,
    /// Unprivileged uid guests run as.
    pub uid: u32,
    /// Helper binary; defaults to `sandbox-exec` next to the server binary.
    pub helper: Option<PathBuf>,
    /// Invoke the helper through `sudo -n` (otherwise it must be setuid root).
    pub use_sudo: bool,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            enabled: false,
            root: PathBuf::from("sandbox/rootfs"),
            uid: 1001,
            helper: None,
            use_sudo: true,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("SANDBOX_TUNNEL_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("SANDBOX_TUNNEL_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(root) = var("SANDBOX_TUNNEL_WORKSPACE").filter(|v| !v.is_empty()) {
            self.workspace.root = Some(PathBuf::from(root));
        }

        if let Some(root) = var("SANDBOX_TUNNEL_SANDBOX_ROOT").filter(|v| !v.is_empty()) {
            self.sandbox.root = PathBuf::from(root);
            self.sandbox.enabled = true;
        }

        if let Some(uid) = var("SANDBOX_UID") {
            if let Ok(uid) = uid.parse() {
                self.sandbox.uid = uid;
            }
        }

        if let Some(level) = var("SANDBOX_TUNNEL_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref root) = args.workspace {
            self.workspace.root = Some(root.clone());
        }

        if let Some(ref root) = args.sandbox_root {
            self.sandbox.root = root.clone();
            self.sandbox.enabled = true;
        }
        if let Some(uid) = args.sandbox_uid {
            self.sandbox.uid = uid;
        }
        if args.no_sandbox {
            self.sandbox.enabled = false;
        }

        if let Some(secs) = args.timeout {
            self.execution.timeout_secs = secs;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Check everything that must hold before the server starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .host
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        if self.execution.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("execution.timeout_secs", "0".to_string()));
        }
        if self.terminal.cols == 0 || self.terminal.rows == 0 {
            return Err(ConfigError::InvalidValue(
                "terminal size",
                format!("{}x{}", self.terminal.cols, self.terminal.rows),
            ));
        }

        if self.sandbox.enabled {
            let root = self.sandbox_root()?;
            if !root.is_dir() {
                return Err(ConfigError::SandboxUnavailable(format!(
                    "root image {} does not exist",
                    root.display()
                )));
            }
            if self.sandbox.uid == 0 {
                return Err(ConfigError::SandboxUnavailable(
                    "sandbox uid must not be 0".to_string(),
                ));
            }
            let helper = self.helper_path()?;
            if !helper.is_file() {
                return Err(ConfigError::SandboxUnavailable(format!(
                    "helper {} not found",
                    helper.display()
                )));
            }
            let workspaces = self.workspace_root()?;
            if !workspaces.starts_with(&root) {
                return Err(ConfigError::SandboxUnavailable(format!(
                    "workspace root {} is not inside the root image",
                    workspaces.display()
                )));
            }
        }
        Ok(())
    }

    /// Absolute sandbox root image path.
    pub fn sandbox_root(&self) -> Result<PathBuf, ConfigError> {
        absolute(&self.sandbox.root)
    }

    /// Absolute helper path.
    pub fn helper_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.sandbox.helper {
            Some(helper) => absolute(helper),
            None => {
                let exe = std::env::current_exe().map_err(ConfigError::Io)?;
                Ok(exe.with_file_name(HELPER_BINARY))
            }
        }
    }

    /// Absolute directory holding the session workspaces.
    pub fn workspace_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.workspace.root {
            Some(root) => absolute(root),
            None if self.sandbox.enabled => Ok(self.sandbox_root()?.join("workspaces")),
            None => absolute(Path::new("workspaces")),
        }
    }

    /// Settings for new interactive shells.
    pub fn terminal_settings(&self) -> TerminalSettings {
        TerminalSettings {
            shell: self.terminal.shell.clone().unwrap_or_else(default_shell),
            size: PtySize::new(self.terminal.rows, self.terminal.cols),
        }
    }

    /// Limits and languages for guest runs.
    pub fn execution_settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            timeout: Duration::from_secs(self.execution.timeout_secs),
            watchdog: Duration::from_millis(self.execution.watchdog_ms),
            max_output_bytes: self.execution.max_output_bytes,
            languages: self.execution.languages.clone(),
            compilers: self.execution.compilers.clone(),
        }
    }

    /// Where guests run.
    pub fn isolation(&self) -> Result<Isolation, ConfigError> {
        if !self.sandbox.enabled {
            return Ok(Isolation::Host);
        }
        Ok(Isolation::Sandbox(SandboxLauncher::new(
            self.sandbox_root()?,
            self.sandbox.uid,
            self.helper_path()?,
            self.sandbox.use_sudo,
        )))
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port);
        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }
        Ok(server_config)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Absolute, lexically normalized form of a configured path.
fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_err(ConfigError::Io)?.join(path)
    };
    normalize(&joined).ok_or_else(|| ConfigError::InvalidValue("path", path.display().to_string()))
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// Out-of-range setting.
    InvalidValue(&'static str, String),
    /// Sandbox is enabled but cannot work.
    SandboxUnavailable(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::InvalidValue(name, value) => write!(f, "invalid value for {}: '{}'", name, value),
            Self::SandboxUnavailable(reason) => write!(f, "sandbox unavailable: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}
