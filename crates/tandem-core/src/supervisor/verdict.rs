use std::fmt;

use serde::Serialize;

use crate::launch::ProcessExit;
use crate::marker::MarkerHit;

/// What happened to one supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub name: String,
    pub pid: u32,
    pub exit: ProcessExit,
    /// The harness stopped the process (fail-fast, timeout, run duration or
    /// cancellation) rather than it exiting on its own.
    pub stopped_by_harness: bool,
    /// Number of output lines captured from the process.
    pub lines: usize,
    /// Wall-clock time from launch to exit.
    pub duration_ms: u64,
}

/// A reason the run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// A process exited with a non-zero code or was killed by a signal it
    /// did not receive from the harness.
    AbnormalExit { name: String, exit: ProcessExit },
    /// A process printed a line matching a failure marker.
    MarkerDetected(MarkerHit),
    /// The run exceeded its timeout and was stopped.
    TimedOut { after_ms: u64 },
    /// The run was cancelled from outside (e.g. Ctrl+C).
    Interrupted,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::AbnormalExit { name, exit } => write!(f, "{name} exited abnormally ({exit})"),
            Failure::MarkerDetected(hit) => write!(
                f,
                "{} printed failure marker {:?}: {}",
                hit.source, hit.pattern, hit.line
            ),
            Failure::TimedOut { after_ms } => write!(f, "run timed out after {after_ms}ms"),
            Failure::Interrupted => write!(f, "run was interrupted"),
        }
    }
}

/// The aggregated outcome of a supervised run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Verdict {
    /// One report per process, in launch order.
    pub processes: Vec<ProcessReport>,
    /// Every failure, in the order it was observed.
    pub failures: Vec<Failure>,
}

impl Verdict {
    /// The run passed when nothing failed.
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn interrupted(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| matches!(failure, Failure::Interrupted))
    }

    /// Process exit code for the harness itself: 0 on success, 130 when
    /// interrupted, 1 for any other failure.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else if self.interrupted() {
            130
        } else {
            1
        }
    }

    pub fn process(&self, name: &str) -> Option<&ProcessReport> {
        self.processes.iter().find(|report| report.name == name)
    }

    pub fn marker_hits(&self) -> impl Iterator<Item = &MarkerHit> {
        self.failures.iter().filter_map(|failure| match failure {
            Failure::MarkerDetected(hit) => Some(hit),
            _ => None,
        })
    }
}
