//! `tandem check`: validate a harness file without running it.

use std::fmt::{self, Write as _};
use std::path::Path;

use anyhow::Result;

use tandem_core::{HarnessPlan, MarkerSet};

use crate::config;

pub fn run_check(file: Option<&Path>) -> Result<()> {
    let (plan, path) = config::load_plan(file)?;
    print!("{}", describe_plan(&plan, &path)?);
    Ok(())
}

fn describe_markers(markers: &MarkerSet) -> String {
    if markers.is_empty() {
        return "none".to_owned();
    }
    markers
        .iter()
        .map(|marker| format!("{:?}", marker.pattern()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_plan(plan: &HarnessPlan, path: &Path) -> Result<String, fmt::Error> {
    let supervisor = &plan.supervisor;
    let mut out = String::new();

    writeln!(out, "{} is valid.", path.display())?;
    writeln!(out, "  fail fast:  {}", supervisor.fail_fast)?;
    if let Some(timeout) = supervisor.timeout {
        writeln!(out, "  timeout:    {}s", timeout.as_secs())?;
    }
    if let Some(run_for) = supervisor.run_for {
        writeln!(out, "  run for:    {}s", run_for.as_secs())?;
    }
    writeln!(out, "  grace:      {}s", supervisor.grace_period.as_secs())?;
    writeln!(out, "  timestamps: {}", plan.format.timestamps)?;
    writeln!(out, "  markers:    {}", describe_markers(&supervisor.markers))?;

    writeln!(out, "Processes ({}):", plan.specs.len())?;
    for spec in &plan.specs {
        writeln!(out, "  {}: {}", spec.name, spec.command_line())?;
        if let Some(dir) = &spec.working_dir {
            writeln!(out, "    working dir: {}", dir.display())?;
        }
        if !spec.env.is_empty() {
            let keys: Vec<&str> = spec.env.keys().map(String::as_str).collect();
            writeln!(out, "    env:         {}", keys.join(", "))?;
        }
        if !spec.markers.is_empty() {
            writeln!(out, "    markers:     {}", describe_markers(&spec.markers))?;
        }
    }
    Ok(out)
}
