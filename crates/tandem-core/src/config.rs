//! TOML format types for harness files.
//!
//! A harness file has one optional `[harness]` table with run-wide settings
//! and one `[[processes]]` entry per process to launch. These types map
//! directly to that on-disk format; [`HarnessFile::into_plan`] turns them into
//! the validated values the supervisor runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::launch::LaunchSpec;
use crate::marker::MarkerSet;
use crate::stream::LineFormat;
use crate::supervisor::{DEFAULT_GRACE_PERIOD, SupervisorConfig, validate_specs};

/// Top-level structure of a harness file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HarnessFile {
    /// Run-wide settings in `[harness]`.
    #[serde(default)]
    pub harness: HarnessSection,
    /// Processes to run, in launch order.
    #[serde(default)]
    pub processes: Vec<ProcessToml>,
}

/// Run-wide settings in `[harness]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HarnessSection {
    /// Stop every process on the first failure.
    #[serde(default)]
    pub fail_fast: bool,
    /// Fail the run if it lasts longer than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Stop every process after this long and judge the run (soak mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_for_secs: Option<u64>,
    /// Seconds between SIGTERM and SIGKILL.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Prefix output lines with the local time.
    #[serde(default)]
    pub timestamps: bool,
    /// Literal failure markers checked against every process.
    #[serde(default)]
    pub markers: Vec<String>,
    /// Regex failure markers checked against every process.
    #[serde(default)]
    pub marker_regex: Vec<String>,
}

impl Default for HarnessSection {
    fn default() -> Self {
        Self {
            fail_fast: false,
            timeout_secs: None,
            run_for_secs: None,
            grace_secs: default_grace_secs(),
            timestamps: false,
            markers: Vec::new(),
            marker_regex: Vec::new(),
        }
    }
}

/// A single `[[processes]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProcessToml {
    /// Unique name, used to tag the process's output.
    pub name: String,
    /// Executable to run, looked up on `PATH` if not a path.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory, relative to the harness file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Environment overrides for this process only.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Literal failure markers checked against this process only.
    #[serde(default)]
    pub markers: Vec<String>,
    /// Regex failure markers checked against this process only.
    #[serde(default)]
    pub marker_regex: Vec<String>,
}

fn default_grace_secs() -> u64 {
    DEFAULT_GRACE_PERIOD.as_secs()
}

/// A validated harness file, ready to run.
#[derive(Debug, Clone)]
pub struct HarnessPlan {
    pub supervisor: SupervisorConfig,
    pub specs: Vec<LaunchSpec>,
    pub format: LineFormat,
}

/// Parse a harness file from TOML text.
pub fn parse_harness_toml(text: &str) -> Result<HarnessFile> {
    toml::from_str(text).context("failed to parse harness file")
}

/// Read and parse the harness file at `path`.
pub fn load_harness_file(path: &Path) -> Result<HarnessFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read harness file {}", path.display()))?;
    parse_harness_toml(&text).with_context(|| format!("in {}", path.display()))
}

impl HarnessFile {
    /// Validate the file and build the plan it describes.
    ///
    /// Relative working directories are resolved against `base_dir`
    /// (normally the directory holding the harness file).
    pub fn into_plan(self, base_dir: &Path) -> Result<HarnessPlan> {
        let HarnessFile { harness, processes } = self;

        let markers = MarkerSet::from_patterns(&harness.markers, &harness.marker_regex)
            .context("invalid marker in [harness]")?;

        let specs = processes
            .into_iter()
            .map(|process| process.into_spec(base_dir))
            .collect::<Result<Vec<_>>>()?;
        validate_specs(&specs).context("invalid process list")?;

        let format = LineFormat::aligned(specs.iter().map(|spec| spec.name.as_str()), harness.timestamps);

        Ok(HarnessPlan {
            supervisor: SupervisorConfig {
                markers,
                fail_fast: harness.fail_fast,
                timeout: harness.timeout_secs.map(Duration::from_secs),
                run_for: harness.run_for_secs.map(Duration::from_secs),
                grace_period: Duration::from_secs(harness.grace_secs),
            },
            specs,
            format,
        })
    }
}

impl ProcessToml {
    fn into_spec(self, base_dir: &Path) -> Result<LaunchSpec> {
        let markers = MarkerSet::from_patterns(&self.markers, &self.marker_regex)
            .with_context(|| format!("invalid marker for process {:?}", self.name))?;

        let mut spec = LaunchSpec::new(self.name, self.command)
            .args(self.args)
            .markers(markers);
        for (key, value) in self.env {
            spec = spec.env(key, value);
        }
        if let Some(dir) = self.working_dir {
            spec = spec.working_dir(base_dir.join(dir));
        }
        Ok(spec)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
