//! Harness file discovery.
//!
//! Resolution chain: CLI argument > `TANDEM_CONFIG` env var > `./tandem.toml`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use tandem_core::{HarnessPlan, load_harness_file};

/// Env var naming the harness file when none is given on the command line.
pub const CONFIG_ENV: &str = "TANDEM_CONFIG";

/// Harness file looked for in the current directory.
pub const DEFAULT_HARNESS_FILE: &str = "tandem.toml";

/// Pick the harness file to use.
pub fn resolve_harness_path(cli_path: Option<&Path>, env_path: Option<String>) -> PathBuf {
    if let Some(path) = cli_path {
        path.to_path_buf()
    } else if let Some(path) = env_path.filter(|p| !p.is_empty()) {
        PathBuf::from(path)
    } else {
        PathBuf::from(DEFAULT_HARNESS_FILE)
    }
}

/// Resolve, read and validate the harness file.
///
/// Returns the plan and the path it was loaded from.
pub fn load_plan(cli_path: Option<&Path>) -> Result<(HarnessPlan, PathBuf)> {
    let path = resolve_harness_path(cli_path, std::env::var(CONFIG_ENV).ok());
    let file = load_harness_file(&path)?;

    let base_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let plan = file
        .into_plan(&base_dir)
        .with_context(|| format!("invalid harness file {}", path.display()))?;

    Ok((plan, path))
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
