use clap::builder::styling::{AnsiColor, Styles};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().bold())
    .literal(AnsiColor::Cyan.on_default().bold())
    .placeholder(AnsiColor::Cyan.on_default())
    .error(AnsiColor::Red.on_default().bold());

const AFTER_HELP: &str = "\x1b[1;32mQuick Reference:\x1b[0m
  \x1b[1;36mCheck a file\x1b[0m (auto-starts the daemon on first use):
    diagd check src/app.ts --server \"typescript-language-server --stdio\"
    cat src/app.ts | diagd check src/app.ts --stdin --server \"...\"

  \x1b[1;36mManage the daemon:\x1b[0m
    diagd daemon start --server \"pyright-langserver --stdio\"
    diagd daemon status                  Ping the running daemon
    diagd daemon stop                    Graceful shutdown";

#[derive(Parser)]
#[command(name = "diagd")]
#[command(about = "Run language-server diagnostics on files via a persistent background daemon")]
#[command(version)]
#[command(styles = STYLES)]
#[command(after_help = AFTER_HELP)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root handed to the language server (defaults to cwd)
    #[arg(long, value_name = "DIR", global = true)]
    pub workspace: Option<PathBuf>,

    /// Control socket path (defaults to /tmp/diagd-{uid}.sock)
    #[arg(long, value_name = "PATH", global = true)]
    pub socket: Option<PathBuf>,

    /// Discovery file path (defaults to /tmp/diagd-{uid}.json)
    #[arg(long, value_name = "PATH", global = true)]
    pub info_file: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check one file and print its diagnostics
    #[command(
        long_about = "Send a file to the language server and print the diagnostics it reports. \
        Starts the daemon automatically if none is running.\n\n\
        Examples:\n  \
        diagd check app.py --server \"pyright-langserver --stdio\"\n  \
        diagd --format json check app.py --server \"...\"   # JSON for scripting\n  \
        cat app.py | diagd check app.py --stdin --server \"...\""
    )]
    Check {
        file: PathBuf,

        /// Language server command, e.g. "typescript-language-server --stdio"
        #[arg(long, value_name = "CMD")]
        server: String,

        /// Read the file content from stdin instead of disk
        #[arg(long)]
        stdin: bool,
    },

    /// Ping the running daemon and print its status
    Ping,

    /// Manage the background daemon (auto-starts on first check)
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Run in the foreground (used internally by the spawned process)
        #[arg(long)]
        foreground: bool,

        /// Language server command, e.g. "typescript-language-server --stdio"
        #[arg(long, value_name = "CMD")]
        server: String,

        /// Fallback languageId for files with an unknown extension
        #[arg(long, value_name = "ID")]
        language_id: Option<String>,

        /// Per-check deadline for fresh diagnostics, in milliseconds
        #[arg(long, value_name = "MS")]
        check_timeout_ms: Option<u64>,
    },
    /// Stop the daemon gracefully
    Stop,
    /// Show the daemon's running status
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}
