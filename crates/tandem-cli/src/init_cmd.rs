//! `tandem init`: write a harness file from a preset.

use std::path::Path;

use anyhow::{Context, Result, bail};

use tandem_core::presets::{available_presets, preset};

pub fn run_init(name: &str, output: &Path, force: bool) -> Result<()> {
    let Some(text) = preset(name) else {
        let names: Vec<&str> = available_presets().iter().map(|p| p.name).collect();
        bail!("unknown preset {name:?}; available: {}", names.join(", "));
    };

    if output.exists() && !force {
        bail!(
            "{} already exists\nUse --force to overwrite.",
            output.display()
        );
    }

    std::fs::write(output, text)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("Wrote {} from preset {name:?}.", output.display());
    println!("Next: edit it, then run `tandem check` and `tandem run`.");
    Ok(())
}

pub fn list_presets() {
    for preset in available_presets() {
        println!("{:<10} {}", preset.name, preset.description);
    }
}
