use chrono::{DateTime, Local};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

/// Owns one spawned tunnel client. Output is inherited from the supervisor so
/// the operator sees the client's own diagnostics on the console.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    program: String,
    started_at: DateTime<Local>,
    started: Instant,
}

impl ProcessHandle {
    pub fn start(program: &str, args: &[String]) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            program: program.to_string(),
            source,
        })?;
        let pid = child.id();

        Ok(Self {
            child,
            pid,
            program: program.to_string(),
            started_at: Local::now(),
            started: Instant::now(),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking: true until an exit has been observed through this handle.
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                tracing::error!(pid = ?self.pid, error = %e, "failed to query process state");
                false
            }
        }
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL. Always reaps the child.
    pub async fn stop(mut self, timeout: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }

        if let Err(e) = self.terminate() {
            tracing::error!(pid = ?self.pid, error = %e, "failed to send SIGTERM, killing");
            return self.kill_and_reap().await;
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::error!(pid = ?self.pid, error = %e, "error waiting for process");
                self.kill_and_reap().await
            }
            Err(_) => {
                tracing::warn!(
                    pid = ?self.pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "process ignored SIGTERM, killing"
                );
                self.kill_and_reap().await
            }
        }
    }

    fn terminate(&self) -> Result<(), nix::errno::Errno> {
        let Some(raw) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return Err(nix::errno::Errno::ESRCH);
        };
        signal::kill(Pid::from_raw(raw), Signal::SIGTERM)
    }

    async fn kill_and_reap(&mut self) -> Option<ExitStatus> {
        if let Err(e) = self.child.start_kill() {
            tracing::error!(pid = ?self.pid, error = %e, "failed to kill process");
        }
        match self.child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::error!(pid = ?self.pid, error = %e, "error waiting for process");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
