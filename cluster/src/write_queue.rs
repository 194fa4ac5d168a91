use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::ClusterError;

/// Upper bound on how many bytes get merged into one socket write.
const MAX_BATCH_BYTES: usize = 64 * 1024;

/// Producer side of a per-connection write-coalescing queue. Any task may
///  submit a fully encoded buffer; buffers reach the socket in submission
///  order, with bursts of small buffers merged into single writes.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<Bytes>,
}

/// Consumer side; `run` it on the connection's write half.
pub struct WriteBacklog {
    rx: mpsc::Receiver<Bytes>,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> (WriteQueue, WriteBacklog) {
        let (tx, rx) = mpsc::channel(capacity);
        (WriteQueue { tx }, WriteBacklog { rx })
    }

    /// Enqueue one buffer. An error means the connection's writer is gone.
    pub async fn submit(&self, buf: Bytes) -> anyhow::Result<()> {
        self.tx.send(buf).await.map_err(|_| ClusterError::PeerClosed)?;
        Ok(())
    }
}

impl WriteBacklog {
    /// Drains the queue into the socket until every producer is gone or the
    ///  socket fails. Whatever is queued when one buffer is written goes out
    ///  in the same write, up to the batch ceiling.
    pub async fn run(mut self, mut writer: impl AsyncWrite + Unpin) {
        let mut batch = BytesMut::with_capacity(MAX_BATCH_BYTES);
        while let Some(buf) = self.rx.recv().await {
            batch.clear();
            batch.extend_from_slice(&buf);
            while batch.len() < MAX_BATCH_BYTES {
                match self.rx.try_recv() {
                    Ok(next) => batch.extend_from_slice(&next),
                    Err(_) => break,
                }
            }

            trace!("writing {} coalesced bytes", batch.len());
            if let Err(e) = writer.write_all(&batch).await {
                debug!("connection write failed: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_buffers_arrive_in_submission_order() {
        let (queue, backlog) = WriteQueue::new(16);
        let (mut read_end, write_end) = tokio::io::duplex(4096);
        tokio::spawn(backlog.run(write_end));

        queue.submit(Bytes::from_static(b"one")).await.unwrap();
        queue.submit(Bytes::from_static(b"two")).await.unwrap();
        queue.submit(Bytes::from_static(b"three")).await.unwrap();
        drop(queue);

        let mut out = Vec::new();
        read_end.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"onetwothree");
    }

    #[tokio::test]
    async fn test_submit_fails_once_writer_is_gone() {
        let (queue, backlog) = WriteQueue::new(16);
        drop(backlog);

        let err = queue.submit(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusterError>(),
            Some(ClusterError::PeerClosed)
        ));
    }
}
