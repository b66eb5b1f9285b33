use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

mod cli;
mod daemon;
mod lsp;

use cli::args::{Cli, Commands, DaemonCommands};
use cli::output::OutputFormatter;
use daemon::client::SpawnOptions;
use daemon::info::{default_info_path, default_socket_path, DaemonInfo};
use daemon::server::DaemonConfig;
use lsp::server::ServerCommand;

const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LANGUAGE_ID: &str = "plaintext";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("diagd=debug").init();
    }

    let socket_path = match &cli.socket {
        Some(path) => path.clone(),
        None => default_socket_path()?,
    };
    let info_path = match &cli.info_file {
        Some(path) => path.clone(),
        None => default_info_path()?,
    };
    let workspace_root = workspace_root(cli.workspace.as_deref())?;
    let formatter = OutputFormatter::new(cli.format);

    match cli.command {
        Commands::Check { file, server, stdin } => {
            handle_check(
                &file,
                &server,
                stdin,
                &workspace_root,
                cli.socket.clone(),
                &info_path,
                &formatter,
            )
            .await
        }
        Commands::Ping => handle_status(&info_path).await,
        Commands::Daemon { command } => match command {
            DaemonCommands::Start { foreground, server, language_id, check_timeout_ms } => {
                handle_daemon_start(DaemonStartArgs {
                    foreground,
                    server,
                    language_id,
                    check_timeout_ms,
                    socket_path,
                    socket_override: cli.socket,
                    info_path,
                    workspace_root,
                })
                .await
            }
            DaemonCommands::Stop => {
                daemon::client::stop(&info_path).await?;
                println!("Daemon stopped");
                Ok(ExitCode::SUCCESS)
            }
            DaemonCommands::Status => handle_status(&info_path).await,
        },
    }
}

fn workspace_root(workspace: Option<&std::path::Path>) -> Result<PathBuf> {
    let root = match workspace {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    root.canonicalize().with_context(|| format!("Invalid workspace root {}", root.display()))
}

async fn handle_check(
    file: &std::path::Path,
    server: &str,
    stdin: bool,
    workspace_root: &std::path::Path,
    socket_override: Option<PathBuf>,
    info_path: &std::path::Path,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let content = if stdin {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer).context("Failed to read stdin")?;
        buffer
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };

    let options = SpawnOptions {
        server_command: server.to_string(),
        workspace_root: workspace_root.to_path_buf(),
        socket_path: socket_override,
        info_path: info_path.to_path_buf(),
        language_id: None,
        check_timeout_ms: None,
    };
    let info = daemon::client::ensure_running(&options).await?;

    let file_path = file
        .canonicalize()
        .unwrap_or_else(|_| workspace_root.join(file))
        .to_string_lossy()
        .into_owned();
    let diagnostics = daemon::client::check(&info.socket_path, &file_path, &content).await?;

    println!("{}", formatter.format_diagnostics(file, &diagnostics));
    Ok(exit_code(cli::output::exit_code_for(&diagnostics)))
}

async fn handle_status(info_path: &std::path::Path) -> Result<ExitCode> {
    let Ok(info) = DaemonInfo::load(info_path) else {
        println!("Daemon is not running");
        return Ok(ExitCode::FAILURE);
    };

    match daemon::client::ping(&info.socket_path).await {
        Ok(true) => {
            println!("Daemon is running (pid {}, socket {})", info.pid, info.socket_path.display());
            Ok(ExitCode::SUCCESS)
        }
        Ok(false) | Err(_) => {
            println!("Daemon info found but the daemon is not responding");
            Ok(ExitCode::FAILURE)
        }
    }
}

struct DaemonStartArgs {
    foreground: bool,
    server: String,
    language_id: Option<String>,
    check_timeout_ms: Option<u64>,
    socket_path: PathBuf,
    socket_override: Option<PathBuf>,
    info_path: PathBuf,
    workspace_root: PathBuf,
}

async fn handle_daemon_start(args: DaemonStartArgs) -> Result<ExitCode> {
    if let Some(ms) = args.check_timeout_ms {
        // Also enforced by the daemon itself; checking here gives the
        // background-spawn path a direct error instead of a readiness
        // timeout.
        anyhow::ensure!(
            Duration::from_millis(ms) <= daemon::server::MAX_CHECK_TIMEOUT,
            "--check-timeout-ms {ms} exceeds the maximum of {}ms",
            daemon::server::MAX_CHECK_TIMEOUT.as_millis(),
        );
    }

    if args.foreground {
        let config = DaemonConfig {
            socket_path: args.socket_path,
            info_path: args.info_path,
            server_command: ServerCommand::parse(&args.server)?,
            workspace_root: args.workspace_root.to_string_lossy().into_owned(),
            default_language: args
                .language_id
                .unwrap_or_else(|| DEFAULT_LANGUAGE_ID.to_string()),
            check_timeout: args
                .check_timeout_ms
                .map_or(DEFAULT_CHECK_TIMEOUT, Duration::from_millis),
        };
        daemon::server::run(config).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let options = SpawnOptions {
        server_command: args.server,
        workspace_root: args.workspace_root,
        socket_path: args.socket_override,
        info_path: args.info_path,
        language_id: args.language_id,
        check_timeout_ms: args.check_timeout_ms,
    };
    let info = daemon::client::ensure_running(&options).await?;
    println!("Daemon running (pid {}, socket {})", info.pid, info.socket_path.display());
    Ok(ExitCode::SUCCESS)
}

fn exit_code(code: i32) -> ExitCode {
    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
