//! The supervisor: launches a set of processes, streams their merged output
//! to a sink, watches for failure markers and exit statuses, and folds
//! everything into a [`Verdict`].

mod verdict;

use std::collections::{HashMap, HashSet};
use std::io;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::launch::{LaunchSpec, ManagedProcess, ProcessGroups, launch};
use crate::marker::{MarkerHit, MarkerSet};
use crate::stream::{LineSink, LogLine, MERGE_BUFFER, merge, tag_stream};

pub use verdict::{Failure, ProcessReport, Verdict};

/// Default time a process gets between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Stand-in deadline for timers that are not configured.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Shortest quiet period allowed for output to drain after the last process
/// has exited.
const DRAIN_IDLE_FLOOR: Duration = Duration::from_millis(500);

/// Longest output keeps draining after the last process has exited, even if
/// something keeps writing to it.
const DRAIN_LIMIT: Duration = Duration::from_secs(30);

/// Longest a single write to the sink may block before output is dropped.
const SINK_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Run-wide supervision policy.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Markers checked against every process's output.
    pub markers: MarkerSet,
    /// Stop all remaining processes as soon as anything fails.
    pub fail_fast: bool,
    /// Stop everything and fail the run once this much time has passed.
    pub timeout: Option<Duration>,
    /// Stop everything once this much time has passed, without failing the
    /// run. Used to soak long-running processes.
    pub run_for: Option<Duration>,
    /// Time between SIGTERM and SIGKILL when stopping a process. Also the
    /// quiet period (at least half a second) after which output still open
    /// once the last process has exited is closed.
    pub grace_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            markers: MarkerSet::default(),
            fail_fast: false,
            timeout: None,
            run_for: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Launches and supervises a set of processes.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    config: SupervisorConfig,
    groups: ProcessGroups,
}

/// Check that a set of specs can be run together.
pub(crate) fn validate_specs(specs: &[LaunchSpec]) -> HarnessResult<()> {
    if specs.is_empty() {
        return Err(HarnessError::NoProcesses);
    }
    let mut seen = HashSet::new();
    for spec in specs {
        if spec.name.trim().is_empty() {
            return Err(HarnessError::EmptyName);
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(HarnessError::DuplicateName(spec.name.clone()));
        }
    }
    Ok(())
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            groups: ProcessGroups::new(),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// The process groups of every process this supervisor is running.
    ///
    /// Lets a caller that must exit immediately kill them with
    /// [`ProcessGroups::kill_all`] instead of leaving them orphaned.
    pub fn process_groups(&self) -> ProcessGroups {
        self.groups.clone()
    }

    /// Run every spec to completion.
    ///
    /// 1. Launches all processes. If any launch fails, the processes already
    ///    started are stopped and awaited, and the launch error is returned.
    /// 2. Forwards merged output to `sink`, checking each line against the
    ///    global markers plus the line's own process markers.
    /// 3. Collects every exit status, stopping the remaining processes early
    ///    on fail-fast, timeout, run duration, or cancellation of `cancel`.
    /// 4. Returns the [`Verdict`] once every process has exited and output
    ///    has drained.
    ///
    /// A sink that stops accepting lines (e.g. a closed stdout) or blocks on
    /// a single line for too long does not end the run; supervision continues
    /// without output.
    pub async fn run(
        &self,
        specs: &[LaunchSpec],
        sink: &mut dyn LineSink,
        cancel: CancellationToken,
    ) -> HarnessResult<Verdict> {
        validate_specs(specs)?;

        let processes = self.launch_all(specs).await?;
        let started = Instant::now();
        let grace = self.config.grace_period;

        let markers: HashMap<String, MarkerSet> = specs
            .iter()
            .map(|spec| (spec.name.clone(), self.config.markers.combined(&spec.markers)))
            .collect();

        // Stopping the run cancels this token; cancelling the caller's token
        // cancels it too.
        let shutdown = cancel.child_token();

        let mut sources = Vec::with_capacity(processes.len());
        let mut watchers = JoinSet::new();
        for mut process in processes {
            if let Some(output) = process.take_output() {
                sources.push(tag_stream(output, process.name()));
            }
            watchers.spawn(watch(process, self.groups.clone(), shutdown.clone(), grace));
        }
        let mut lines = merge(sources);

        let timeout = tokio::time::sleep(self.config.timeout.unwrap_or(FAR_FUTURE));
        let run_for = tokio::time::sleep(self.config.run_for.unwrap_or(FAR_FUTURE));
        let drain = tokio::time::sleep(FAR_FUTURE);
        tokio::pin!(timeout, run_for, drain);

        let drain_idle = grace.max(DRAIN_IDLE_FLOOR);
        // Set once every process has exited but output is still open.
        let mut drain_limit: Option<Instant> = None;

        let mut state = RunState::default();
        let mut lines_open = true;
        let mut timer_fired = false;

        while lines_open || !watchers.is_empty() {
            tokio::select! {
                line = lines.next(), if lines_open => match line {
                    Some(line) => {
                        if state.record_line(&line, &markers, sink).await && self.config.fail_fast {
                            stop(&shutdown, "fail-fast: failure marker detected");
                        }
                        if let Some(limit) = drain_limit {
                            drain.as_mut().reset((Instant::now() + drain_idle).min(limit));
                        }
                    }
                    None => lines_open = false,
                },
                joined = watchers.join_next(), if !watchers.is_empty() => {
                    match joined {
                        Some(Ok(Ok(report))) => {
                            if state.record_exit(report) && self.config.fail_fast {
                                stop(&shutdown, "fail-fast: process exited abnormally");
                            }
                        }
                        Some(Ok(Err(e))) => {
                            error!(error = %e, "lost track of a process");
                            state.record_error(e);
                            stop(&shutdown, "supervision error");
                        }
                        Some(Err(join_err)) => {
                            error!(error = %join_err, "process watcher failed");
                            state.record_error(HarnessError::Io(io::Error::other(join_err)));
                            stop(&shutdown, "supervision error");
                        }
                        None => {}
                    }
                    if watchers.is_empty() && lines_open && drain_limit.is_none() {
                        let now = Instant::now();
                        drain_limit = Some(now + drain_idle.max(DRAIN_LIMIT));
                        drain.as_mut().reset(now + drain_idle);
                    }
                },
                () = &mut timeout, if !timer_fired && self.config.timeout.is_some() => {
                    timer_fired = true;
                    let after_ms = millis(started.elapsed());
                    warn!(after_ms, "run timed out");
                    state.fail(Failure::TimedOut { after_ms });
                    stop(&shutdown, "timeout");
                },
                () = &mut run_for, if !timer_fired && self.config.run_for.is_some() => {
                    timer_fired = true;
                    info!("run duration elapsed");
                    stop(&shutdown, "run duration elapsed");
                },
                () = cancel.cancelled(), if !state.interrupted => {
                    state.interrupted = true;
                    state.fail(Failure::Interrupted);
                    info!("run cancelled, stopping processes");
                },
                () = &mut drain, if drain_limit.is_some() => {
                    // Lines already merged are kept even though the window closed.
                    for _ in 0..MERGE_BUFFER {
                        let Some(Some(line)) = lines.next().now_or_never() else {
                            break;
                        };
                        state.record_line(&line, &markers, sink).await;
                    }
                    debug!("output still open after every process exited, closing it");
                    lines_open = false;
                },
            }
        }

        if !state.sink_closed {
            match tokio::time::timeout(SINK_STALL_TIMEOUT, sink.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "failed to flush output"),
                Err(_) => warn!("output sink stalled while flushing"),
            }
        }

        state.into_verdict(specs)
    }

    async fn launch_all(&self, specs: &[LaunchSpec]) -> HarnessResult<Vec<ManagedProcess>> {
        let mut launched = Vec::with_capacity(specs.len());

        for spec in specs {
            match launch(spec) {
                Ok(process) => {
                    self.groups.insert(process.pid());
                    launched.push(process);
                }
                Err(err) => {
                    error!(name = %spec.name, error = %err, "launch failed, stopping started processes");
                    let grace = self.config.grace_period;
                    let stops = launched.iter_mut().map(|process| process.terminate(grace));
                    for result in futures::future::join_all(stops).await {
                        if let Err(e) = result {
                            warn!(error = %e, "failed to stop process after launch failure");
                        }
                    }
                    for process in &launched {
                        self.groups.remove(process.pid());
                    }
                    return Err(err);
                }
            }
        }

        Ok(launched)
    }
}

fn stop(shutdown: &CancellationToken, reason: &str) {
    if !shutdown.is_cancelled() {
        info!(reason, "stopping remaining processes");
        shutdown.cancel();
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Wait for `process` to exit, or stop it once `shutdown` is cancelled.
async fn watch(
    mut process: ManagedProcess,
    groups: ProcessGroups,
    shutdown: CancellationToken,
    grace: Duration,
) -> HarnessResult<ProcessReport> {
    let result = process.wait_or_terminate(&shutdown, grace).await;
    groups.remove(process.pid());
    let (exit, stopped_by_harness) = result?;

    Ok(ProcessReport {
        name: process.name().to_owned(),
        pid: process.pid(),
        exit,
        stopped_by_harness,
        lines: 0,
        duration_ms: millis(process.elapsed()),
    })
}

/// Everything observed during a run.
#[derive(Default)]
struct RunState {
    reports: Vec<ProcessReport>,
    failures: Vec<Failure>,
    line_counts: HashMap<String, usize>,
    sink_closed: bool,
    interrupted: bool,
    error: Option<HarnessError>,
}

impl RunState {
    fn fail(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    /// Keep the first supervision error.
    fn record_error(&mut self, error: HarnessError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Forward a line to the sink and check it against its markers.
    /// Returns `true` if the line hit a marker.
    async fn record_line(
        &mut self,
        line: &LogLine,
        markers: &HashMap<String, MarkerSet>,
        sink: &mut dyn LineSink,
    ) -> bool {
        *self.line_counts.entry(line.source.clone()).or_default() += 1;

        if !self.sink_closed {
            match tokio::time::timeout(SINK_STALL_TIMEOUT, sink.emit(line)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "output sink closed, continuing without output");
                    self.sink_closed = true;
                }
                Err(_) => {
                    warn!(
                        stalled_ms = millis(SINK_STALL_TIMEOUT),
                        "output sink stopped accepting lines, continuing without output"
                    );
                    self.sink_closed = true;
                }
            }
        }

        let Some(hit) = Self::find_marker(line, markers) else {
            return false;
        };
        warn!(source = %hit.source, pattern = %hit.pattern, "failure marker detected");
        self.fail(Failure::MarkerDetected(hit));
        true
    }

    fn find_marker(line: &LogLine, markers: &HashMap<String, MarkerSet>) -> Option<MarkerHit> {
        let pattern = markers.get(&line.source)?.find(&line.text)?;
        Some(MarkerHit::new(line, pattern))
    }

    /// Record an exit. Returns `true` if it counts as a failure.
    fn record_exit(&mut self, report: ProcessReport) -> bool {
        let abnormal = !report.exit.is_success() && !report.stopped_by_harness;
        if abnormal {
            warn!(name = %report.name, pid = report.pid, exit = %report.exit, "process exited abnormally");
            self.fail(Failure::AbnormalExit {
                name: report.name.clone(),
                exit: report.exit,
            });
        } else {
            info!(
                name = %report.name,
                pid = report.pid,
                exit = %report.exit,
                stopped = report.stopped_by_harness,
                "process exited"
            );
        }
        self.reports.push(report);
        abnormal
    }

    fn into_verdict(mut self, specs: &[LaunchSpec]) -> HarnessResult<Verdict> {
        if let Some(e) = self.error {
            return Err(e);
        }

        for report in &mut self.reports {
            report.lines = self.line_counts.get(&report.name).copied().unwrap_or(0);
        }
        self.reports.sort_by_key(|report| {
            specs
                .iter()
                .position(|spec| spec.name == report.name)
                .unwrap_or(usize::MAX)
        });

        Ok(Verdict {
            processes: self.reports,
            failures: self.failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::launch::ProcessExit;
    use crate::marker::MarkerPattern;
    use crate::stream::MemorySink;

    fn sh(name: &str, script: &str) -> LaunchSpec {
        LaunchSpec::new(name, "sh").args(["-c", script])
    }

    fn quick_config() -> SupervisorConfig {
        SupervisorConfig {
            grace_period: Duration::from_secs(2),
            ..SupervisorConfig::default()
        }
    }

    async fn run(config: SupervisorConfig, specs: &[LaunchSpec]) -> (Verdict, MemorySink) {
        let mut sink = MemorySink::new();
        let verdict = Supervisor::new(config)
            .run(specs, &mut sink, CancellationToken::new())
            .await
            .expect("run should reach a verdict");
        (verdict, sink)
    }

    #[test]
    fn validate_rejects_bad_spec_sets() {
        assert!(matches!(validate_specs(&[]), Err(HarnessError::NoProcesses)));
        assert!(matches!(
            validate_specs(&[sh(" ", "true")]),
            Err(HarnessError::EmptyName)
        ));
        assert!(matches!(
            validate_specs(&[sh("a", "true"), sh("a", "true")]),
            Err(HarnessError::DuplicateName(name)) if name == "a"
        ));
        assert!(validate_specs(&[sh("a", "true"), sh("b", "true")]).is_ok());
    }

    #[tokio::test]
    async fn counts_lines_per_process() {
        let specs = [sh("a", "echo 1; echo 2; echo 3"), sh("b", "echo x >&2")];
        let (verdict, sink) = run(quick_config(), &specs).await;

        assert!(verdict.passed(), "failures: {:?}", verdict.failures);
        assert_eq!(verdict.process("a").unwrap().lines, 3);
        assert_eq!(verdict.process("b").unwrap().lines, 1);
        assert_eq!(sink.lines.len(), 4);
        let names: Vec<_> = verdict.processes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn per_process_markers_only_apply_to_that_process() {
        let specs = [
            sh("lint", "echo 'ERROR is just a word here'"),
            sh("coverage", "echo 'ERROR: 2 tests failed'")
                .markers(MarkerSet::new(vec![MarkerPattern::contains("ERROR")])),
        ];
        let (verdict, _) = run(quick_config(), &specs).await;

        let hits: Vec<_> = verdict.marker_hits().collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "coverage");
    }

    #[tokio::test]
    async fn fail_fast_stops_siblings() {
        let config = SupervisorConfig {
            fail_fast: true,
            ..quick_config()
        };
        let specs = [sh("crash", "sleep 0.2; exit 3"), sh("server", "exec sleep 60")];

        let started = std::time::Instant::now();
        let (verdict, _) = run(config, &specs).await;

        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(
            verdict.failures,
            vec![Failure::AbnormalExit {
                name: "crash".to_owned(),
                exit: ProcessExit::Code(3),
            }]
        );
        let server = verdict.process("server").unwrap();
        assert!(server.stopped_by_harness);
    }

    #[tokio::test]
    async fn fail_fast_on_marker() {
        let config = SupervisorConfig {
            fail_fast: true,
            markers: MarkerSet::new(vec![MarkerPattern::contains("CRIT")]),
            ..quick_config()
        };
        let specs = [sh("vc", "echo 'CRIT lost connection'; exec sleep 60")];

        let (verdict, _) = run(config, &specs).await;

        assert_eq!(verdict.marker_hits().count(), 1);
        assert!(verdict.process("vc").unwrap().stopped_by_harness);
        assert_eq!(verdict.exit_code(), 1);
    }

    #[tokio::test]
    async fn run_for_stops_without_failing() {
        let config = SupervisorConfig {
            run_for: Some(Duration::from_millis(300)),
            ..quick_config()
        };
        let specs = [sh("bn", "echo up; exec sleep 60"), sh("vc", "exec sleep 60")];

        let (verdict, sink) = run(config, &specs).await;

        assert!(verdict.passed(), "failures: {:?}", verdict.failures);
        assert!(verdict.processes.iter().all(|r| r.stopped_by_harness));
        assert_eq!(sink.texts_from("bn"), vec!["up"]);
    }

    #[tokio::test]
    async fn timeout_stops_and_fails() {
        let config = SupervisorConfig {
            timeout: Some(Duration::from_millis(300)),
            ..quick_config()
        };
        let (verdict, _) = run(config, &[sh("hang", "exec sleep 60")]).await;

        assert!(matches!(verdict.failures.as_slice(), [Failure::TimedOut { .. }]));
        assert!(verdict.process("hang").unwrap().stopped_by_harness);
    }

    #[tokio::test]
    async fn cancellation_interrupts_run() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let mut sink = MemorySink::new();
        let verdict = Supervisor::new(quick_config())
            .run(&[sh("bn", "exec sleep 60")], &mut sink, cancel)
            .await
            .unwrap();

        assert!(verdict.interrupted());
        assert_eq!(verdict.exit_code(), 130);
        assert!(verdict.process("bn").unwrap().stopped_by_harness);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_failure_stops_started_processes() {
        use tandem_test_utils::{read_pid, wait_until_gone};

        let dir = tempfile::tempdir().unwrap();
        let leader_file = dir.path().join("leader.pid");
        let helper_file = dir.path().join("helper.pid");
        // The backgrounded sleep shares the shell's process group, so only a
        // group-wide stop reaches it.
        let script = format!(
            "sleep 60 & echo $! > {}; echo $$ > {}; wait",
            helper_file.display(),
            leader_file.display()
        );
        let specs = [
            sh("first", &script),
            sh("second", "exec sleep 60"),
            LaunchSpec::new("missing", "this_command_does_not_exist_tandem_test"),
        ];
        let supervisor = Supervisor::new(quick_config());
        let mut sink = MemorySink::new();

        let started = std::time::Instant::now();
        let err = supervisor
            .run(&specs, &mut sink, CancellationToken::new())
            .await
            .expect_err("launch failure is fatal");

        assert!(err.is_launch());
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(supervisor.process_groups().is_empty());

        // A shell stopped before it wrote a pid never started that process.
        tokio::time::sleep(Duration::from_millis(200)).await;
        for file in [&leader_file, &helper_file] {
            if let Some(pid) = read_pid(file) {
                assert!(
                    wait_until_gone(pid, Duration::from_secs(5)),
                    "pid {pid} from {} outlived the failed launch",
                    file.display()
                );
            }
        }
    }

    #[tokio::test]
    async fn marker_at_end_of_burst_survives_zero_grace() {
        let config = SupervisorConfig {
            grace_period: Duration::ZERO,
            markers: MarkerSet::new(vec![MarkerPattern::contains("ERROR")]),
            ..SupervisorConfig::default()
        };
        let script = "i=0; while [ $i -lt 3000 ]; do echo line$i; i=$((i+1)); done; \
                      echo 'ERROR boom'; exit 0";

        for attempt in 0..5 {
            let (verdict, sink) = run(config.clone(), &[sh("burst", script)]).await;

            assert_eq!(verdict.marker_hits().count(), 1, "attempt {attempt}");
            assert_eq!(verdict.exit_code(), 1, "attempt {attempt}");
            assert_eq!(verdict.process("burst").unwrap().lines, 3001, "attempt {attempt}");
            assert_eq!(sink.lines.len(), 3001, "attempt {attempt}");
            assert_eq!(sink.texts_from("burst").last(), Some(&"ERROR boom"));
        }
    }

    /// Accepts the first line, then never completes another write.
    #[derive(Default)]
    struct StalledSink {
        accepted: usize,
    }

    #[async_trait]
    impl LineSink for StalledSink {
        async fn emit(&mut self, _line: &LogLine) -> io::Result<()> {
            if self.accepted > 0 {
                futures::future::pending::<()>().await;
            }
            self.accepted += 1;
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_sink_does_not_block_supervision() {
        let config = SupervisorConfig {
            timeout: Some(Duration::from_millis(500)),
            markers: MarkerSet::new(vec![MarkerPattern::contains("FATAL")]),
            ..quick_config()
        };
        let specs = [sh("chatty", "echo one; echo two; echo 'FATAL three'; exec sleep 60")];
        let mut sink = StalledSink::default();

        let verdict = tokio::time::timeout(
            Duration::from_secs(20),
            Supervisor::new(config).run(&specs, &mut sink, CancellationToken::new()),
        )
        .await
        .expect("supervision finished despite the stalled sink")
        .unwrap();

        assert_eq!(sink.accepted, 1);
        assert_eq!(verdict.process("chatty").unwrap().lines, 3);
        assert_eq!(verdict.marker_hits().count(), 1);
        assert!(
            verdict
                .failures
                .iter()
                .any(|failure| matches!(failure, Failure::TimedOut { .. }))
        );
        assert!(verdict.process("chatty").unwrap().stopped_by_harness);
    }

    #[tokio::test]
    async fn finished_processes_leave_no_tracked_groups() {
        let supervisor = Supervisor::new(quick_config());
        let groups = supervisor.process_groups();
        let mut sink = MemorySink::new();

        supervisor
            .run(&[sh("a", "echo hi"), sh("b", "exit 2")], &mut sink, CancellationToken::new())
            .await
            .unwrap();

        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn background_child_holding_output_does_not_hang_run() {
        let config = SupervisorConfig {
            grace_period: Duration::from_millis(300),
            ..SupervisorConfig::default()
        };
        // The shell exits at once but leaves a sleeper holding stdout open.
        let specs = [sh("parent", "echo bye; sleep 60 &")];

        let started = std::time::Instant::now();
        let (verdict, sink) = run(config, &specs).await;

        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(verdict.passed());
        assert_eq!(sink.texts_from("parent"), vec!["bye"]);
    }
}
