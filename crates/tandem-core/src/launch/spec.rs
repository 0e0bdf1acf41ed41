use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::marker::MarkerSet;

/// Everything needed to start one named subprocess.
///
/// Use [`LaunchSpec::new`] for the required fields, then chain the optional
/// setters (builder-style) before handing it to [`launch`](super::launch) or
/// a [`Supervisor`](crate::Supervisor).
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Unique name used to tag every output line (e.g. `beacon`).
    pub name: String,
    /// The executable to run (looked up on `$PATH` if not a path).
    pub command: String,
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// Environment overrides for this process only. The harness never
    /// mutates its own environment.
    pub env: BTreeMap<String, String>,
    /// Working directory; inherits the harness's when `None`.
    pub working_dir: Option<PathBuf>,
    /// Markers checked against this process's output only, on top of the
    /// supervisor-wide set.
    pub markers: MarkerSet,
}

impl LaunchSpec {
    /// Create a spec with the required fields.
    ///
    /// Optional fields are set to their defaults:
    /// - `args`: empty
    /// - `env`: empty (the child inherits the harness environment)
    /// - `working_dir`: `None`
    /// - `markers`: empty
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            markers: MarkerSet::default(),
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable override.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run the process in a specific directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the per-process marker set.
    pub fn markers(mut self, markers: MarkerSet) -> Self {
        self.markers = markers;
        self
    }

    /// The command and its arguments joined for display.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}
