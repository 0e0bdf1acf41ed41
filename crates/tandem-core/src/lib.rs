//! Core of the `tandem` process harness.
//!
//! The harness launches a set of named subprocesses, tags every line they
//! print with the name of its source, merges the tagged lines into a single
//! stream, scans that stream for failure markers, and folds exit statuses and
//! marker hits into one [`Verdict`].
//!
//! ```text
//! LaunchSpec --launch()--> ManagedProcess --take_output()--> ProcessOutput
//!                               |                                 |
//!                          wait_or_terminate()               tag_stream()
//!                               |                                 |
//!                               v                                 v
//!                          ProcessReport                     TaggedStream
//!                               |                                 |
//!                               |                  merge() --> MergedLines
//!                               |                                 |
//!                               +----------> Supervisor <---------+
//!                                                |
//!                                    LineSink + MarkerSet
//!                                                |
//!                                                v
//!                                             Verdict
//! ```

pub mod config;
pub mod error;
pub mod launch;
pub mod marker;
pub mod presets;
pub mod stream;
pub mod supervisor;

pub use config::{HarnessFile, HarnessPlan, load_harness_file, parse_harness_toml};
pub use error::{HarnessError, HarnessResult};
pub use launch::{
    LaunchSpec, ManagedProcess, ProcessExit, ProcessGroups, ProcessOutput, launch,
};
pub use marker::{MarkerHit, MarkerKind, MarkerPattern, MarkerSet, ScanOutcome, scan_for_marker};
pub use stream::{
    LineFormat, LineSink, LogLine, MemorySink, MergedLines, StreamKind, TaggedStream, WriterSink,
    format_line, merge, tag_stream,
};
pub use supervisor::{
    DEFAULT_GRACE_PERIOD, Failure, ProcessReport, Supervisor, SupervisorConfig, Verdict,
};
