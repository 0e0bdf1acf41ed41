//! Shared test utilities for tandem integration tests.
//!
//! Builds shell-backed launch specs, writes scratch harness files and
//! scripts, and groups captured lines by source so tests can assert on
//! per-process order without depending on interleaving.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use tandem_core::{LaunchSpec, LogLine};

/// A spec that runs `script` with `sh -c`.
pub fn sh(name: &str, script: &str) -> LaunchSpec {
    LaunchSpec::new(name, "sh").args(["-c", script])
}

/// A spec that prints `count` numbered lines (`<prefix>0`, `<prefix>1`, ...)
/// and exits with `code`.
pub fn counter(name: &str, prefix: &str, count: usize, code: i32) -> LaunchSpec {
    sh(
        name,
        &format!("i=0; while [ $i -lt {count} ]; do echo {prefix}$i; i=$((i+1)); done; exit {code}"),
    )
}

/// The lines `counter` prints, in order.
pub fn counter_lines(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i}")).collect()
}

/// Group line texts by source, keeping each source's order.
pub fn lines_by_source(lines: &[LogLine]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in lines {
        grouped
            .entry(line.source.clone())
            .or_default()
            .push(line.text.clone());
    }
    grouped
}

/// Write an executable shell script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("failed to make script executable");
    }
    path
}

/// A scratch directory holding a `tandem.toml` with the given contents.
///
/// Returns the directory (delete on drop) and the file path.
pub fn harness_dir(toml: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("tandem.toml");
    fs::write(&path, toml).expect("failed to write harness file");
    (dir, path)
}

/// Read a pid a script wrote with `echo $$ > file`. `None` if the file is
/// missing or only partly written.
pub fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether `pid` names a live process. Zombies count as gone.
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks that the pid exists.
    if unsafe { libc::kill(pid, 0) } != 0 {
        return false;
    }
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state follows the parenthesised command name.
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
            .unwrap_or(true),
        Err(_) => true,
    }
}

/// Poll until `pid` is gone. Returns `false` if it is still alive after
/// `timeout`.
#[cfg(unix)]
pub fn wait_until_gone(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    true
}

/// Send `signal` to a single process.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: i32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: `kill` has no memory-safety preconditions.
    unsafe { libc::kill(pid, signal) == 0 }
}
