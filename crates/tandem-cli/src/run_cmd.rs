//! `tandem run` and `tandem exec`: supervise processes until they finish.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tandem_core::{
    HarnessPlan, LaunchSpec, LineFormat, MarkerSet, Supervisor, SupervisorConfig, Verdict,
    WriterSink,
};

use crate::config;

/// Flags that override harness file settings.
#[derive(Debug, Clone, Default, Args)]
pub struct RunOverrides {
    /// Stop every process on the first failure
    #[arg(long)]
    pub fail_fast: bool,
    /// Fail the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
    /// Stop every process after this many seconds without failing
    #[arg(long, value_name = "SECS")]
    pub run_for: Option<u64>,
    /// Prefix output lines with the local time
    #[arg(long)]
    pub timestamps: bool,
    /// Extra literal failure marker (repeatable)
    #[arg(long = "marker", value_name = "TEXT")]
    pub markers: Vec<String>,
    /// Extra regex failure marker (repeatable)
    #[arg(long = "marker-regex", value_name = "REGEX")]
    pub marker_regex: Vec<String>,
}

impl RunOverrides {
    /// Apply the flags on top of a plan's settings.
    pub fn apply(&self, plan: &mut HarnessPlan) -> Result<()> {
        let extra = MarkerSet::from_patterns(&self.markers, &self.marker_regex)
            .context("invalid --marker/--marker-regex")?;
        plan.supervisor.markers = plan.supervisor.markers.combined(&extra);

        if self.fail_fast {
            plan.supervisor.fail_fast = true;
        }
        if let Some(secs) = self.timeout {
            plan.supervisor.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.run_for {
            plan.supervisor.run_for = Some(Duration::from_secs(secs));
        }
        if self.timestamps {
            plan.format.timestamps = true;
        }
        Ok(())
    }
}

/// Run the harness file resolved from `file`.
pub async fn run_harness(
    file: Option<PathBuf>,
    overrides: &RunOverrides,
    report: Option<&Path>,
) -> Result<i32> {
    let (mut plan, path) = config::load_plan(file.as_deref())?;
    overrides.apply(&mut plan)?;

    info!(file = %path.display(), processes = plan.specs.len(), "running harness file");
    supervise(plan, report).await
}

/// Supervise a single command given on the command line.
pub async fn run_exec(
    name: &str,
    command: Vec<String>,
    overrides: &RunOverrides,
    report: Option<&Path>,
) -> Result<i32> {
    let mut parts = command.into_iter();
    let program = parts.next().context("no command given")?;
    let spec = LaunchSpec::new(name, program).args(parts);

    let mut plan = HarnessPlan {
        supervisor: SupervisorConfig::default(),
        format: LineFormat::aligned([name], false),
        specs: vec![spec],
    };
    overrides.apply(&mut plan)?;

    supervise(plan, report).await
}

/// Signals that stop a run: Ctrl+C, plus SIGTERM and SIGHUP on Unix.
struct StopSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl StopSignals {
    /// Install the handlers. Must run before any process is launched.
    #[cfg(unix)]
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// The name of the next stop signal, or `None` once none can arrive.
    #[cfg(unix)]
    async fn next(&mut self) -> Option<&'static str> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some("SIGINT"),
            Some(()) = self.terminate.recv() => Some("SIGTERM"),
            Some(()) = self.hangup.recv() => Some("SIGHUP"),
            else => None,
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|()| "Ctrl+C")
    }
}

/// Run a plan with stdout as the sink and stop signals wired to
/// cancellation.
async fn supervise(plan: HarnessPlan, report: Option<&Path>) -> Result<i32> {
    let supervisor = Supervisor::new(plan.supervisor);

    // First signal cancels, second kills every process group and exits.
    let mut signals = StopSignals::install().context("failed to install signal handlers")?;
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let groups = supervisor.process_groups();
    let signal_task = tokio::spawn(async move {
        let mut stopping = false;
        while let Some(signal) = signals.next().await {
            if stopping {
                let killed = groups.kill_all();
                eprintln!("\nForce exit ({signal}), killed {killed} process groups.");
                std::process::exit(130);
            }
            stopping = true;
            warn!(signal, "stop requested");
            eprintln!("\nStopping processes ({signal} again to force)...");
            cancel_clone.cancel();
        }
    });

    let mut sink = WriterSink::new(tokio::io::stdout(), plan.format.clone());
    let result = supervisor.run(&plan.specs, &mut sink, cancel).await;
    signal_task.abort();
    let verdict = result?;

    print_summary(&verdict);
    if let Some(path) = report {
        write_report(&verdict, path)?;
    }

    Ok(verdict.exit_code())
}

/// Print the outcome of a run to stderr.
fn print_summary(verdict: &Verdict) {
    eprint!("{}", summary(verdict));
}

fn summary(verdict: &Verdict) -> String {
    let width = verdict
        .processes
        .iter()
        .map(|report| report.name.chars().count())
        .max()
        .unwrap_or(0);

    let mut out = String::from("\n");
    for report in &verdict.processes {
        let stopped = if report.stopped_by_harness {
            " (stopped)"
        } else {
            ""
        };
        out.push_str(&format!(
            "  {:<width$}  {}{stopped}, {} lines, {:.1}s\n",
            report.name,
            report.exit,
            report.lines,
            report.duration_ms as f64 / 1000.0,
        ));
    }

    if verdict.passed() {
        out.push_str(&format!("\nPassed: {} processes.\n", verdict.processes.len()));
    } else {
        out.push_str("\nFailed:\n");
        for failure in &verdict.failures {
            out.push_str(&format!("  - {failure}\n"));
        }
    }
    out
}

/// Write the verdict as pretty-printed JSON.
fn write_report(verdict: &Verdict, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(verdict).context("failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "wrote run report");
    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
