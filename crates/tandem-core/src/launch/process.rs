use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::spec::LaunchSpec;
use crate::error::{HarnessError, HarnessResult};

/// How a supervised process ended.
///
/// A process whose exit has not been observed yet is simply one whose
/// [`ManagedProcess::wait`] future has not resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessExit {
    /// The process exited with this code.
    Code(i32),
    /// The process was terminated by this signal (Unix only).
    Signal(i32),
}

impl ProcessExit {
    /// Only a zero exit code counts as success.
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessExit::Code(0))
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ProcessExit::Code(code),
            None => ProcessExit::Signal(terminating_signal(status)),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Code(code) => write!(f, "exit code {code}"),
            ProcessExit::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

#[cfg(unix)]
fn terminating_signal(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or_default()
}

#[cfg(not(unix))]
fn terminating_signal(_status: ExitStatus) -> i32 {
    0
}

/// The captured output pipes of a [`ManagedProcess`].
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// A running subprocess owned by the harness.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    pid: u32,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    started: Instant,
}

/// Start the process described by `spec`.
///
/// The child gets a closed stdin and piped stdout/stderr. On Unix it leads a
/// fresh process group, so [`ManagedProcess::terminate`] also reaches any
/// processes it forks. Environment overrides in `spec` apply to the child
/// only.
///
/// Must be called from within a Tokio runtime.
pub fn launch(spec: &LaunchSpec) -> HarnessResult<ManagedProcess> {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| HarnessError::launch(&spec.name, &spec.command_line(), e))?;

    let pid = child.id().ok_or_else(|| {
        HarnessError::launch(
            &spec.name,
            &spec.command_line(),
            io::Error::other("child process has no pid"),
        )
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    info!(name = %spec.name, pid, command = %spec.command_line(), "launched process");

    Ok(ManagedProcess {
        name: spec.name.clone(),
        pid,
        child,
        stdout,
        stderr,
        started: Instant::now(),
    })
}

impl ManagedProcess {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Time since the process was launched.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Take the output pipes. Returns `None` once they have been taken.
    pub fn take_output(&mut self) -> Option<ProcessOutput> {
        match (self.stdout.take(), self.stderr.take()) {
            (Some(stdout), Some(stderr)) => Some(ProcessOutput { stdout, stderr }),
            _ => None,
        }
    }

    /// Wait for the process to exit on its own.
    ///
    /// Cancel safe: dropping the future leaves the process running.
    pub async fn wait(&mut self) -> HarnessResult<ProcessExit> {
        let status = self.child.wait().await?;
        Ok(status.into())
    }

    /// Stop the process: SIGTERM to its process group, wait up to `grace`,
    /// then SIGKILL.
    ///
    /// Returns immediately with the recorded exit if the process has already
    /// exited.
    pub async fn terminate(&mut self, grace: Duration) -> HarnessResult<ProcessExit> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status.into());
        }

        #[cfg(unix)]
        {
            if !signal_group(self.pid, libc::SIGTERM) {
                warn!(name = %self.name, pid = self.pid, "SIGTERM failed, proceeding to SIGKILL");
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(name = %self.name, pid = self.pid, "process exited after SIGTERM");
                Ok(status.into())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                debug!(
                    name = %self.name,
                    pid = self.pid,
                    "process did not exit after SIGTERM, sending SIGKILL"
                );
                #[cfg(unix)]
                signal_group(self.pid, libc::SIGKILL);
                self.child.kill().await?;
                let status = self.child.wait().await?;
                Ok(status.into())
            }
        }
    }

    /// Wait for the process to exit, or [`terminate`](Self::terminate) it
    /// once `shutdown` is cancelled. The flag is `true` when the process was
    /// stopped rather than exiting on its own.
    pub async fn wait_or_terminate(
        &mut self,
        shutdown: &CancellationToken,
        grace: Duration,
    ) -> HarnessResult<(ProcessExit, bool)> {
        let exited = tokio::select! {
            biased;
            result = self.wait() => Some(result),
            () = shutdown.cancelled() => None,
        };

        match exited {
            Some(result) => Ok((result?, false)),
            None => Ok((self.terminate(grace).await?, true)),
        }
    }
}

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: `kill` has no memory-safety preconditions. `pgid` is the pid of
    // a child spawned with `process_group(0)`, so it names that child's group.
    let ret = unsafe { libc::kill(-pgid, signal) };
    ret == 0
}

/// Process groups of the processes a harness currently owns.
///
/// Cloning shares the same registry. [`ProcessGroups::kill_all`] is
/// synchronous so it can run on a path that is about to call
/// `std::process::exit`, where no async cleanup gets a chance to run.
#[derive(Debug, Clone, Default)]
pub struct ProcessGroups {
    pgids: Arc<Mutex<BTreeSet<u32>>>,
}

impl ProcessGroups {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u32>> {
        // The set stays consistent even if a holder panicked.
        self.pgids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track the group led by `pid`.
    pub fn insert(&self, pid: u32) {
        self.lock().insert(pid);
    }

    /// Stop tracking the group led by `pid` once its leader has been reaped.
    pub fn remove(&self, pid: u32) {
        self.lock().remove(&pid);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// SIGKILL every tracked group. Returns how many groups were signalled.
    pub fn kill_all(&self) -> usize {
        let pgids = std::mem::take(&mut *self.lock());
        let mut killed = 0;
        for pgid in pgids {
            #[cfg(unix)]
            {
                if signal_group(pgid, libc::SIGKILL) {
                    killed += 1;
                } else {
                    warn!(pgid, "failed to SIGKILL process group");
                }
            }
            #[cfg(not(unix))]
            let _ = pgid;
        }
        killed
    }
}
