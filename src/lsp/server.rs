//! Spawning and terminating the language-server subprocess.

use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// The command line used to launch the language server, e.g.
/// `["typescript-language-server", "--stdio"]` or `["ty", "server"]`.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ServerCommand {
    /// Parse a whitespace-separated command string.
    pub fn parse(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next().context("Empty language-server command")?.to_string();
        Ok(Self { program, args: parts.map(str::to_string).collect() })
    }

    pub fn label(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// A running language-server subprocess with piped stdio.
///
/// stderr is inherited so server-side panics land in the daemon log;
/// it is never part of the protocol.
pub struct LanguageServerProcess {
    process: Child,
    command_label: String,
}

impl LanguageServerProcess {
    pub async fn spawn(command: &ServerCommand, workspace_root: &str) -> Result<Self> {
        tracing::debug!("Spawning language server '{}' in {workspace_root}", command.label());

        let process = Command::new(&command.program)
            .args(&command.args)
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| {
                format!("Failed to spawn '{}' in workspace '{workspace_root}'", command.label())
            })?;

        tracing::debug!("Language server started (pid: {:?})", process.id());

        Ok(Self { process, command_label: command.label() })
    }

    pub fn take_stdin(&mut self) -> Result<ChildStdin> {
        self.process
            .stdin
            .take()
            .with_context(|| format!("stdin of '{}' already taken", self.command_label))
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.process
            .stdout
            .take()
            .with_context(|| format!("stdout of '{}' already taken", self.command_label))
    }

    /// Wait for voluntary exit within the grace period, then kill.
    pub async fn wait_or_kill(&mut self, grace: Duration) -> Result<()> {
        match tokio::time::timeout(grace, self.process.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to wait for language server")?;
                tracing::debug!("Language server exited with {status}");
            }
            Err(_) => {
                tracing::warn!(
                    "Language server did not exit within {grace:?}, killing '{}'",
                    self.command_label
                );
                self.process.kill().await.context("Failed to kill language server")?;
            }
        }
        Ok(())
    }
}

impl Drop for LanguageServerProcess {
    fn drop(&mut self) {
        let _ = self.process.start_kill();
    }
}
