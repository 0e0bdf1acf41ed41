use std::pin::Pin;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::warn;

use super::{LogLine, StreamKind};
use crate::launch::ProcessOutput;

/// A boxed stream of lines from one source.
pub type TaggedStream = Pin<Box<dyn Stream<Item = LogLine> + Send>>;

/// Tag every line of a process's combined stdout/stderr with `name`.
///
/// The two pipes are read independently and interleaved as lines arrive, so
/// a quiet stderr never holds back stdout (or the reverse). The stream ends
/// once both pipes are closed.
pub fn tag_stream(output: ProcessOutput, name: &str) -> TaggedStream {
    tag_readers(name, output.stdout, output.stderr)
}

/// [`tag_stream`] over arbitrary readers.
pub fn tag_readers<O, E>(name: &str, stdout: O, stderr: E) -> TaggedStream
where
    O: AsyncRead + Send + Unpin + 'static,
    E: AsyncRead + Send + Unpin + 'static,
{
    let stdout = read_lines(name.to_owned(), StreamKind::Stdout, stdout);
    let stderr = read_lines(name.to_owned(), StreamKind::Stderr, stderr);
    Box::pin(futures::stream::select(stdout, stderr))
}

/// Split `reader` on `\n`, dropping the terminator (and a preceding `\r`).
/// Invalid UTF-8 is replaced rather than ending the stream.
fn read_lines<R>(
    source: String,
    kind: StreamKind,
    reader: R,
) -> impl Stream<Item = LogLine> + Send + 'static
where
    R: AsyncRead + Send + Unpin + 'static,
{
    async_stream::stream! {
        let mut segments = BufReader::new(reader).split(b'\n');

        loop {
            match segments.next_segment().await {
                Ok(Some(mut bytes)) => {
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    yield LogLine::new(source.as_str(), kind, text);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(source = %source, stream = ?kind, error = %e, "error reading process output");
                    break;
                }
            }
        }
    }
}
