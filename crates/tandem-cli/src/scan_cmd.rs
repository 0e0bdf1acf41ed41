//! `tandem scan`: check an existing log for failure markers.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncRead;

use tandem_core::stream::tag_readers;
use tandem_core::{MarkerSet, ScanOutcome, scan_for_marker};

/// Scan `file` (or stdin) and print every hit. Returns 1 if anything matched.
pub async fn run_scan(file: Option<&Path>, markers: &[String], marker_regex: &[String]) -> Result<i32> {
    if markers.is_empty() && marker_regex.is_empty() {
        bail!("no markers given; pass --marker or --marker-regex");
    }
    let markers =
        MarkerSet::from_patterns(markers, marker_regex).context("invalid --marker/--marker-regex")?;

    let outcome = match file {
        Some(path) => {
            let reader = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            scan_reader(&path.display().to_string(), reader, &markers).await
        }
        None => scan_reader("stdin", tokio::io::stdin(), &markers).await,
    };

    for hit in &outcome.hits {
        println!("{}: matched {:?}: {}", hit.source, hit.pattern, hit.line);
    }
    eprintln!(
        "Scanned {} lines, {} marker hits.",
        outcome.lines,
        outcome.hits.len()
    );

    Ok(if outcome.is_clean() { 0 } else { 1 })
}

async fn scan_reader<R>(source: &str, reader: R, markers: &MarkerSet) -> ScanOutcome
where
    R: AsyncRead + Send + Unpin + 'static,
{
    scan_for_marker(tag_readers(source, reader, tokio::io::empty()), markers).await
}
