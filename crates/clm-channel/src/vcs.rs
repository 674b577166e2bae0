use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ChannelError;

/// Seam around the `git` executable so tests can substitute a fake that
/// returns canned `show-ref`/`clone`/`checkout` output instead of shelling
/// out. The production realization is [`SystemGit`].
#[async_trait]
pub trait VcsRunner: Send + Sync {
    /// Run a git subcommand, capturing combined stdout+stderr.
    ///
    /// `cwd` is the working directory for the child process (used for
    /// `-C <dir>`-style operations where the caller prefers `current_dir`
    /// over passing `-C` explicitly). `env` are additional environment
    /// variables layered over the inherited environment (used to set
    /// `GIT_SSH_COMMAND`).
    async fn run(
        &self,
        args: &[&str],
        cwd: Option<&Path>,
        env: &[(String, String)],
    ) -> Result<String, ChannelError>;
}

/// Runs real `git` subprocesses via `tokio::process::Command`.
///
/// Mirrors the teacher's `TerraformBackend::run_tf`: stdout and stderr are
/// read concurrently into a single combined log, each line mirrored to
/// `tracing`, under a hard timeout so a wedged subprocess can't hang the
/// caller forever.
pub struct SystemGit {
    pub timeout: Duration,
}

impl Default for SystemGit {
    fn default() -> Self {
        SystemGit { timeout: Duration::from_secs(300) }
    }
}

#[async_trait]
impl VcsRunner for SystemGit {
    async fn run(
        &self,
        args: &[&str],
        cwd: Option<&Path>,
        env: &[(String, String)],
    ) -> Result<String, ChannelError> {
        debug!(?args, cwd = ?cwd, "running git command");

        let mut cmd = Command::new("git");
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in env {
            cmd.env(k, v);
        }

        let command_label = format!("git {}", args.join(" "));

        let mut child = cmd.spawn().map_err(|e| ChannelError::Repository {
            command: command_label.clone(),
            output: format!("spawn failed: {}", e),
        })?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let mut log = String::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        let tx1 = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx1.send(line);
            }
        });

        let tx2 = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx2.send(line);
            }
        });

        drop(tx);

        let collect = async {
            while let Some(line) = rx.recv().await {
                debug!(target: "clm::git", "{}", line);
                log.push_str(&line);
                log.push('\n');
            }
        };
        let timed_out = tokio::time::timeout(self.timeout, collect).await.is_err();

        stdout_task.await.ok();
        stderr_task.await.ok();

        if timed_out {
            let _ = child.kill().await;
            return Err(ChannelError::Repository {
                command: command_label,
                output: format!("timed out after {:?}", self.timeout),
            });
        }

        let status = child.wait().await.map_err(|e| ChannelError::Repository {
            command: command_label.clone(),
            output: format!("wait failed: {}", e),
        })?;

        if !status.success() {
            warn!(command = %command_label, code = ?status.code(), "git command exited non-zero");
            return Err(ChannelError::Repository { command: command_label, output: log });
        }

        Ok(log)
    }
}
