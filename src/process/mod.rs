//! Subprocess coordination.
//!
//! Foreground commands go through [`run`]; listeners that must outlive a
//! block of work go through [`with_background`], which always finishes the
//! background process according to its [`ExitPolicy`] before returning.
//! A [`BackgroundProcess`] that is dropped without being finished kills its
//! whole process group.

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::command::CommandSpec;
use crate::error::{HarnessError, Result};
use crate::host::Host;
use crate::port;

/// Output of a finished process.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process had to be killed before it reported.
    pub status: Option<ExitStatus>,
}

impl CapturedOutput {
    /// Stdout with surrounding whitespace removed.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }
}

/// How a background process is brought down once the work block is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Signal it; its exit status is irrelevant.
    Terminate,
    /// It is expected to exit on its own, successfully.
    AwaitExit,
}

/// Bounds on how long a background process is given to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTimeouts {
    /// [`ExitPolicy::AwaitExit`]: wait for natural exit.
    pub exit_wait: Duration,
    /// [`ExitPolicy::Terminate`]: grace period before SIGTERM.
    pub terminate_settle: Duration,
    /// After SIGTERM, before SIGKILL. Also bounds output collection.
    pub terminate_reap: Duration,
}

impl Default for ProcessTimeouts {
    fn default() -> Self {
        Self {
            exit_wait: Duration::from_secs(5),
            terminate_settle: Duration::from_millis(250),
            terminate_reap: Duration::from_secs(2),
        }
    }
}

/// What the work block gets to see of the background process.
#[derive(Debug, Clone)]
pub struct BackgroundHandle {
    pub pid: Option<u32>,
    pub command: String,
}

type PipeTask = JoinHandle<io::Result<Vec<u8>>>;

/// A spawned child whose output is drained in the background.
pub struct BackgroundProcess {
    child: Child,
    pid: Option<u32>,
    command: String,
    policy: ExitPolicy,
    stdout: PipeTask,
    stderr: PipeTask,
}

impl BackgroundProcess {
    /// Spawn `spec` on `host` in its own process group.
    ///
    /// Stdin receives the spec's payload and is then closed, or is null.
    pub fn spawn(host: &dyn Host, spec: &CommandSpec, policy: ExitPolicy) -> Result<Self> {
        let command = spec.to_string();
        let mut cmd = host.command(spec)?;
        cmd.stdin(if spec.get_stdin().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| {
            error!(command = %command, host = %host.name(), error = %source, "Failed to spawn process");
            HarnessError::Spawn {
                command: command.clone(),
                source,
            }
        })?;
        let pid = child.id();
        debug!(command = %command, host = %host.name(), pid = ?pid, ?policy, "Process spawned");

        if let (Some(payload), Some(mut stdin)) = (spec.get_stdin(), child.stdin.take()) {
            let payload = payload.to_vec();
            let command = command.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(command = %command, error = %e, "Stdin closed early");
                }
            });
        }

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        Ok(Self {
            child,
            pid,
            command,
            policy,
            stdout,
            stderr,
        })
    }

    pub fn handle(&self) -> BackgroundHandle {
        BackgroundHandle {
            pid: self.pid,
            command: self.command.clone(),
        }
    }

    /// Bring the process down according to its policy and collect output.
    pub async fn finish(mut self, timeouts: &ProcessTimeouts) -> Result<CapturedOutput> {
        let status = match self.policy {
            ExitPolicy::Terminate => {
                match timeout(timeouts.terminate_settle, self.child.wait()).await {
                    Ok(status) => Some(status?),
                    Err(_) => self.terminate(timeouts.terminate_reap).await,
                }
            }
            ExitPolicy::AwaitExit => match timeout(timeouts.exit_wait, self.child.wait()).await {
                Ok(status) => Some(status?),
                Err(_) => {
                    warn!(command = %self.command, timeout = ?timeouts.exit_wait, "Process did not exit, killing");
                    self.kill().await;
                    return Err(HarnessError::ExitTimeout {
                        command: self.command.clone(),
                        timeout: timeouts.exit_wait,
                    });
                }
            },
        };

        let output = self.collect(status, timeouts.terminate_reap).await;
        if self.policy == ExitPolicy::AwaitExit && !output.success() {
            return Err(self.failed(&output));
        }
        Ok(output)
    }

    /// Terminate regardless of policy. Used when the work block failed.
    pub async fn abort(mut self, timeouts: &ProcessTimeouts) {
        if let Ok(None) = self.child.try_wait() {
            self.terminate(timeouts.terminate_reap).await;
        }
    }

    async fn terminate(&mut self, reap: Duration) -> Option<ExitStatus> {
        info!(command = %self.command, pid = ?self.pid, "Terminating process");
        self.signal_group(GroupSignal::Term);

        match timeout(reap, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(command = %self.command, status = ?status, "Process exited");
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(command = %self.command, error = %e, "Error waiting for process");
                None
            }
            Err(_) => {
                warn!(command = %self.command, "Process did not exit after SIGTERM, sending SIGKILL");
                self.kill().await;
                None
            }
        }
    }

    async fn kill(&mut self) {
        self.signal_group(GroupSignal::Kill);
        if let Err(e) = self.child.kill().await {
            warn!(command = %self.command, error = %e, "Failed to kill process");
        }
    }

    fn signal_group(&self, signal: GroupSignal) {
        let Some(pid) = self.pid else { return };

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let sig = match signal {
                GroupSignal::Term => Signal::SIGTERM,
                GroupSignal::Kill => Signal::SIGKILL,
            };
            if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
                if e != nix::errno::Errno::ESRCH {
                    warn!(command = %self.command, error = %e, "Failed to signal process group");
                }
            }
        }

        #[cfg(not(unix))]
        let _ = (pid, signal);
    }

    async fn collect(&mut self, status: Option<ExitStatus>, limit: Duration) -> CapturedOutput {
        let stdout = join_pipe(&mut self.stdout, limit, &self.command).await;
        let stderr = join_pipe(&mut self.stderr, limit, &self.command).await;
        CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            status,
        }
    }

    fn failed(&self, output: &CapturedOutput) -> HarnessError {
        match output.status {
            Some(status) => HarnessError::CommandFailed {
                command: self.command.clone(),
                status,
                stderr: output.stderr.trim().to_string(),
            },
            None => HarnessError::Io(io::Error::other(format!(
                "`{}` ended without an exit status",
                self.command
            ))),
        }
    }
}

impl Drop for BackgroundProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(command = %self.command, pid = ?self.pid, "Killing orphaned process on drop");
            self.signal_group(GroupSignal::Kill);
            let _ = self.child.start_kill();
        }
        self.stdout.abort();
        self.stderr.abort();
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Term,
    Kill,
}

fn drain<R>(pipe: Option<R>) -> PipeTask
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn join_pipe(task: &mut PipeTask, limit: Duration, command: &str) -> Vec<u8> {
    match timeout(limit, task).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(e))) => {
            warn!(command = %command, error = %e, "Failed to read process output");
            Vec::new()
        }
        Ok(Err(e)) => {
            warn!(command = %command, error = %e, "Output reader task failed");
            Vec::new()
        }
        Err(_) => {
            warn!(command = %command, "Output still open after process exit, giving up on it");
            Vec::new()
        }
    }
}

/// Run `body` while `spec` runs in the background on `host`.
///
/// The background process is finished on every path. If `body` fails its
/// error is returned and the process is terminated; otherwise the process is
/// finished by `policy` and its output returned alongside the body's value.
pub async fn with_background<T, F, Fut>(
    host: &dyn Host,
    spec: &CommandSpec,
    policy: ExitPolicy,
    timeouts: &ProcessTimeouts,
    body: F,
) -> Result<(T, CapturedOutput)>
where
    F: FnOnce(BackgroundHandle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let process = BackgroundProcess::spawn(host, spec, policy)?;
    match body(process.handle()).await {
        Ok(value) => {
            let output = process.finish(timeouts).await?;
            Ok((value, output))
        }
        Err(e) => {
            debug!(command = %spec, error = %e, "Work block failed, terminating background process");
            process.abort(timeouts).await;
            Err(e)
        }
    }
}

/// Run `spec` to completion; a non-zero exit is an error.
pub async fn run(host: &dyn Host, spec: &CommandSpec, limit: Duration) -> Result<CapturedOutput> {
    let process = BackgroundProcess::spawn(host, spec, ExitPolicy::AwaitExit)?;
    let output = wait_bounded(process, limit).await?;
    match output.status {
        Some(status) if !status.success() => Err(HarnessError::CommandFailed {
            command: spec.to_string(),
            status,
            stderr: output.stderr.trim().to_string(),
        }),
        _ => Ok(output),
    }
}

/// Run `spec` to completion and return its output whatever the exit status.
pub async fn run_unchecked(
    host: &dyn Host,
    spec: &CommandSpec,
    limit: Duration,
) -> Result<CapturedOutput> {
    let process = BackgroundProcess::spawn(host, spec, ExitPolicy::AwaitExit)?;
    wait_bounded(process, limit).await
}

async fn wait_bounded(mut process: BackgroundProcess, limit: Duration) -> Result<CapturedOutput> {
    match timeout(limit, process.child.wait()).await {
        Ok(status) => {
            let status = status?;
            Ok(process.collect(Some(status), limit).await)
        }
        // Dropping the process kills it.
        Err(_) => Err(HarnessError::CommandTimeout {
            command: process.command.clone(),
            timeout: limit,
        }),
    }
}

/// Poll until something on `host` listens on TCP `port`.
pub async fn wait_port_listen(
    host: &dyn Host,
    port: u16,
    limit: Duration,
    interval: Duration,
) -> Result<()> {
    let start = Instant::now();

    loop {
        match port::is_listening(host, port).await {
            Ok(true) => {
                debug!(port, host = %host.name(), elapsed = ?start.elapsed(), "Port is listening");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => debug!(port, host = %host.name(), error = %e, "Socket table read failed"),
        }
        if start.elapsed() >= limit {
            error!(port, host = %host.name(), timeout = ?limit, "Timeout waiting for port");
            return Err(HarnessError::PortTimeout {
                port,
                timeout: limit,
            });
        }
        sleep(interval).await;
    }
}
