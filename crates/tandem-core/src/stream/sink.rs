use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::LogLine;

/// Timestamp prefix used when [`LineFormat::timestamps`] is set.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Destination for merged output lines.
///
/// The supervisor calls [`LineSink::emit`] once per line in arrival order
/// and [`LineSink::flush`] once all output has drained.
#[async_trait]
pub trait LineSink: Send {
    async fn emit(&mut self, line: &LogLine) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// How a line is rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineFormat {
    /// Prefix each line with the local time it was read.
    pub timestamps: bool,
    /// Pad source names to this width so the text column lines up.
    pub tag_width: usize,
}

impl LineFormat {
    /// A format whose tag column fits the longest of `names`.
    pub fn aligned<'a>(names: impl IntoIterator<Item = &'a str>, timestamps: bool) -> Self {
        let tag_width = names
            .into_iter()
            .map(|name| name.chars().count())
            .max()
            .unwrap_or(0);
        Self {
            timestamps,
            tag_width,
        }
    }
}

/// Render `line` as `[<timestamp> ]<source> | <text>`.
pub fn format_line(line: &LogLine, format: &LineFormat) -> String {
    let tag = format!("{:<width$}", line.source, width = format.tag_width);
    if format.timestamps {
        format!(
            "{} {tag} | {}",
            line.received_at.format(TIMESTAMP_FORMAT),
            line.text
        )
    } else {
        format!("{tag} | {}", line.text)
    }
}

/// Writes formatted lines to an async writer (typically stdout).
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
    format: LineFormat,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W, format: LineFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> LineSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn emit(&mut self, line: &LogLine) -> io::Result<()> {
        let mut text = format_line(line, &self.format);
        text.push('\n');
        self.writer.write_all(text.as_bytes()).await?;
        // Lines are shown as they arrive, not when the run ends.
        self.writer.flush().await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub lines: Vec<LogLine>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texts of the lines printed by `source`, in order.
    pub fn texts_from(&self, source: &str) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|line| line.source == source)
            .map(|line| line.text.as_str())
            .collect()
    }
}

#[async_trait]
impl LineSink for MemorySink {
    async fn emit(&mut self, line: &LogLine) -> io::Result<()> {
        self.lines.push(line.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamKind;

    #[test]
    fn format_without_timestamps() {
        let line = LogLine::new("bn", StreamKind::Stdout, "synced");
        let format = LineFormat {
            timestamps: false,
            tag_width: 6,
        };
        assert_eq!(format_line(&line, &format), "bn     | synced");
    }

    #[test]
    fn format_with_timestamps_prefixes_time() {
        let line = LogLine::new("vc", StreamKind::Stderr, "CRIT boom");
        let format = LineFormat {
            timestamps: true,
            tag_width: 0,
        };
        let rendered = format_line(&line, &format);
        let expected_prefix = line.received_at.format(TIMESTAMP_FORMAT).to_string();
        assert!(rendered.starts_with(&expected_prefix), "got: {rendered}");
        assert!(rendered.ends_with(" vc | CRIT boom"), "got: {rendered}");
    }

    #[test]
    fn aligned_uses_longest_name() {
        let format = LineFormat::aligned(["a", "beacon", "vc"], true);
        assert_eq!(format.tag_width, 6);
        assert!(format.timestamps);
        assert_eq!(LineFormat::aligned([], false).tag_width, 0);
    }

    #[test]
    fn aligned_counts_characters_not_bytes() {
        let format = LineFormat::aligned(["bäcker", "vc"], false);
        assert_eq!(format.tag_width, 6);

        let long = format_line(&LogLine::new("bäcker", StreamKind::Stdout, "up"), &format);
        let short = format_line(&LogLine::new("vc", StreamKind::Stdout, "up"), &format);
        assert_eq!(long, "bäcker | up");
        assert_eq!(short, "vc     | up");
        assert_eq!(long.find('|').map(|i| long[..i].chars().count()), Some(7));
        assert_eq!(short.find('|').map(|i| short[..i].chars().count()), Some(7));
    }

    #[tokio::test]
    async fn writer_sink_writes_one_line_per_emit() {
        let mut sink = WriterSink::new(Vec::new(), LineFormat::default());
        sink.emit(&LogLine::new("a", StreamKind::Stdout, "one"))
            .await
            .unwrap();
        sink.emit(&LogLine::new("b", StreamKind::Stderr, "two"))
            .await
            .unwrap();
        sink.flush().await.unwrap();

        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(written, "a | one\nb | two\n");
    }

    #[tokio::test]
    async fn memory_sink_groups_by_source() {
        let mut sink = MemorySink::new();
        for (source, text) in [("a", "1"), ("b", "x"), ("a", "2")] {
            sink.emit(&LogLine::new(source, StreamKind::Stdout, text))
                .await
                .unwrap();
        }
        assert_eq!(sink.texts_from("a"), vec!["1", "2"]);
        assert_eq!(sink.texts_from("b"), vec!["x"]);
        assert!(sink.texts_from("c").is_empty());
    }
}
