//! Deploy command execution

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::DeployError;

/// Runs deploy commands through a shell (`<shell> -c <command>`).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Runs `command` in `dir` and returns its combined stdout and stderr.
    ///
    /// The shell leads its own process group. If the command outlives
    /// `timeout` the whole group is killed, so nothing it started keeps
    /// touching the working directory after the job is recorded.
    pub async fn run(
        &self,
        command: &str,
        dir: &Path,
        env: &[(String, String)],
        timeout: Duration,
    ) -> Result<String, DeployError> {
        info!("Running (cwd = '{}'): {}", dir.display(), command);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(DeployError::Spawn)?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = tokio::time::timeout(timeout, async {
            tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(result) => result.map_err(DeployError::Spawn)?,
            Err(_) => {
                kill_group(&mut child, pid);
                if let Err(e) = child.wait().await {
                    warn!("Failed to reap timed out deploy command: {}", e);
                }
                return Err(DeployError::Timeout(timeout));
            }
        };

        let mut combined = String::from_utf8_lossy(&stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&stderr));
        debug!("Deploy output:\n{}", combined);

        if status.success() {
            Ok(combined)
        } else {
            Err(DeployError::NonZeroExit {
                code: status.code(),
                output: combined,
            })
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// SIGKILLs the process group led by the shell
#[cfg(unix)]
fn kill_group(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match pid.and_then(|pid| i32::try_from(pid).ok()) {
        Some(pid) => {
            if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                debug!("killpg({}) failed: {}", pid, e);
            }
        }
        None => {
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill deploy command: {}", e);
            }
        }
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child, _pid: Option<u32>) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to kill deploy command: {}", e);
    }
}
