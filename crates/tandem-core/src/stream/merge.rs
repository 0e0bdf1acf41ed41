use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::LogLine;
use super::tag::TaggedStream;

/// Lines buffered at the merge point before sources wait for the consumer.
pub(crate) const MERGE_BUFFER: usize = 1024;

/// The merged lines of every source, in arrival order.
pub type MergedLines = ReceiverStream<LogLine>;

/// Merge tagged sources into one stream.
///
/// Every source is drained on its own task into a shared channel, so a
/// source that blocks on I/O never stalls the others. The merged stream ends
/// once every source has ended. Dropping it stops the forwarding tasks.
///
/// Must be called from within a Tokio runtime.
pub fn merge(sources: Vec<TaggedStream>) -> MergedLines {
    let (tx, rx) = mpsc::channel(MERGE_BUFFER);

    for mut source in sources {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(line) = source.next().await {
                if tx.send(line).await.is_err() {
                    // Consumer is gone.
                    break;
                }
            }
        });
    }

    ReceiverStream::new(rx)
}
