//! Built-in harness files.
//!
//! The presets are plain harness files embedded in the binary at compile
//! time, so `tandem init --preset <name>` can write them out for editing.

/// A named, embedded harness file.
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    /// One-line summary shown in listings.
    pub description: &'static str,
    /// The harness file text.
    pub toml: &'static str,
}

static PRESETS: &[Preset] = &[
    Preset {
        name: "interop",
        description: "beacon node alongside a Lighthouse beacon node and validator client",
        toml: include_str!("interop.toml"),
    },
    Preset {
        name: "ci",
        description: "clippy and tarpaulin coverage, failing on ERROR in coverage output",
        toml: include_str!("ci.toml"),
    },
];

/// Preset used when none is named.
pub const DEFAULT_PRESET: &str = "interop";

/// The harness file text of the preset called `name`.
pub fn preset(name: &str) -> Option<&'static str> {
    PRESETS
        .iter()
        .find(|preset| preset.name == name)
        .map(|preset| preset.toml)
}

/// Every embedded preset, in a stable order.
pub fn available_presets() -> &'static [Preset] {
    PRESETS
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::config::parse_harness_toml;

    #[test]
    fn every_preset_builds_a_valid_plan() {
        for preset in available_presets() {
            let plan = parse_harness_toml(preset.toml)
                .and_then(|file| file.into_plan(Path::new(".")))
                .unwrap_or_else(|e| panic!("preset {} is invalid: {e:#}", preset.name));
            assert!(!plan.specs.is_empty(), "preset {} has no processes", preset.name);
        }
    }

    #[test]
    fn default_preset_exists() {
        assert!(preset(DEFAULT_PRESET).is_some());
    }

    #[test]
    fn unknown_preset_is_none() {
        assert!(preset("nonexistent").is_none());
    }

    #[test]
    fn interop_soaks_three_processes() {
        let plan = parse_harness_toml(preset("interop").unwrap())
            .unwrap()
            .into_plan(Path::new("."))
            .unwrap();
        let names: Vec<&str> = plan.specs.iter().map(|spec| spec.name.as_str()).collect();
        assert_eq!(names, vec!["beacon", "lighthouse-bn", "lighthouse-vc"]);
        assert_eq!(plan.supervisor.run_for, Some(Duration::from_secs(300)));
        assert!(plan.format.timestamps);
        assert!(plan.supervisor.markers.find("CRIT Beacon node unreachable").is_some());
        assert!(plan.supervisor.markers.find("INFO Synced").is_none());
    }

    #[test]
    fn ci_marks_coverage_output_only() {
        let plan = parse_harness_toml(preset("ci").unwrap())
            .unwrap()
            .into_plan(Path::new("."))
            .unwrap();
        assert!(plan.supervisor.markers.is_empty());
        let coverage = plan.specs.iter().find(|spec| spec.name == "coverage").unwrap();
        assert!(coverage.markers.find("ERROR: test failed").is_some());
        let clippy = plan.specs.iter().find(|spec| spec.name == "clippy").unwrap();
        assert!(clippy.markers.is_empty());
    }
}
