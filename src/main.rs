//! sandbox-tunnel binary entry point.

use std::process::ExitCode;

use sandbox_tunnel::api::{serve, AppState};
use sandbox_tunnel::cli::{self, parse_args};
use sandbox_tunnel::config::Config;
use sandbox_tunnel::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run 'sandbox-tunnel --help' for usage.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args).and_then(|config| config.validate().map(|_| config)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_with_filter(config.log_filter());
    info!("sandbox-tunnel v{}", env!("CARGO_PKG_VERSION"));

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = config.to_server_config()?;
    let workspaces = config.workspace_root()?;
    let isolation = config.isolation()?;

    tokio::fs::create_dir_all(&workspaces).await?;
    match &isolation {
        sandbox_tunnel::execution::Isolation::Host => {
            info!(workspaces = %workspaces.display(), "guests run on the host")
        }
        sandbox_tunnel::execution::Isolation::Sandbox(launcher) => info!(
            workspaces = %workspaces.display(),
            root = %launcher.root().display(),
            uid = launcher.uid(),
            "guests run sandboxed"
        ),
    }

    let state = AppState::new(
        workspaces,
        config.terminal_settings(),
        config.execution_settings(),
        isolation,
    );
    serve(server, state).await?;
    Ok(())
}
