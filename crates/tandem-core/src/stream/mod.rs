//! Tagged, merged process output.
//!
//! Each process's stdout and stderr are read line by line and tagged with the
//! process name ([`tag_stream`]); the tagged streams of all processes are
//! funnelled into a single [`MergedLines`] stream ([`merge`]), which the
//! supervisor forwards to a [`LineSink`].
//!
//! Ordering: lines from one pipe keep their emission order. Nothing is
//! promised about the relative order of lines from different pipes.

mod merge;
mod sink;
mod tag;

use chrono::{DateTime, Local};
use serde::Serialize;

pub(crate) use merge::MERGE_BUFFER;
pub use merge::{MergedLines, merge};
pub use sink::{LineFormat, LineSink, MemorySink, WriterSink, format_line};
pub use tag::{TaggedStream, tag_readers, tag_stream};

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A single line of output attributed to the process that printed it.
#[derive(Debug, Clone)]
pub struct LogLine {
    /// Name of the source process.
    pub source: String,
    pub stream: StreamKind,
    /// Line text without the trailing newline.
    pub text: String,
    /// When the harness read the line.
    pub received_at: DateTime<Local>,
}

impl LogLine {
    /// Build a line stamped with the current local time.
    pub fn new(source: impl Into<String>, stream: StreamKind, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            stream,
            text: text.into(),
            received_at: Local::now(),
        }
    }
}
