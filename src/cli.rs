//! Command-line interface for sandbox-tunnel.
//!
//! Uses lexopt to keep argument parsing small.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

/// Command-line arguments.
///
/// Options left unset fall through to the environment, then the config file.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Directory holding session workspaces.
    pub workspace: Option<PathBuf>,
    /// Sandbox root image; enables the sandbox.
    pub sandbox_root: Option<PathBuf>,
    /// Uid guests run as.
    pub sandbox_uid: Option<u32>,
    /// Run guests directly on the host.
    pub no_sandbox: bool,
    /// Execution time limit in seconds.
    pub timeout: Option<u64>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("host", value))?,
                );
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('w') | Long("workspace") => {
                result.workspace = Some(parser.value()?.parse()?);
            }
            Long("sandbox-root") => {
                result.sandbox_root = Some(parser.value()?.parse()?);
            }
            Long("sandbox-uid") => {
                let value: String = parser.value()?.parse()?;
                let uid: u32 = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("sandbox-uid", value.clone()))?;
                if uid == 0 {
                    return Err(ArgsError::InvalidValue("sandbox-uid", value));
                }
                result.sandbox_uid = Some(uid);
            }
            Long("no-sandbox") => {
                result.no_sandbox = true;
            }
            Short('t') | Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                let secs: u64 = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("timeout", value.clone()))?;
                if secs == 0 {
                    return Err(ArgsError::InvalidValue("timeout", value));
                }
                result.timeout = Some(secs);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"sandbox-tunnel {version}
Workspaces, terminals and sandboxed code execution for a browser editor

USAGE:
    sandbox-tunnel [OPTIONS]

OPTIONS:
    -H, --host <ADDR>         Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>         Port to listen on [default: 3000]
    -c, --config <FILE>       Path to configuration file (JSON)
    -w, --workspace <DIR>     Directory holding session workspaces
        --sandbox-root <DIR>  Root image for guests (enables the sandbox)
        --sandbox-uid <UID>   Uid guests run as [default: 1001]
        --no-sandbox          Run guests directly on the host
    -t, --timeout <SECS>      Execution time limit [default: 30]
    -l, --log-level <LVL>     Log level (error, warn, info, debug, trace)
    -h, --help                Print help
    -V, --version             Print version

ENVIRONMENT VARIABLES:
    SANDBOX_TUNNEL_HOST          Host address (overrides config)
    SANDBOX_TUNNEL_PORT          Port number (overrides config)
    SANDBOX_TUNNEL_WORKSPACE     Workspace directory (overrides config)
    SANDBOX_TUNNEL_SANDBOX_ROOT  Sandbox root image (enables the sandbox)
    SANDBOX_UID                  Uid guests run as
    SANDBOX_TUNNEL_LOG_LEVEL     Log level (overrides config)
    RUST_LOG                     Alternative log level setting

EXAMPLES:
    # Development: guests run as the current user, workspaces in ./workspaces
    sandbox-tunnel

    # Sandboxed guests confined to a root image
    sandbox-tunnel --sandbox-root /srv/rootfs --sandbox-uid 1001

    # Start with config file
    sandbox-tunnel -c /etc/sandbox-tunnel/config.json
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("sandbox-tunnel {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
