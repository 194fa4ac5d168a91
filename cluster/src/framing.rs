use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Read side of the 2-byte big-endian length framing: slices one packet body
///  at a time off the stream and forwards it on the agent's inbound channel.
///
/// Runs until the socket closes or the agent stops consuming. Backpressure is
///  the bounded channel: when the agent falls behind, this loop stops reading
///  and the peer eventually stalls in the TCP window.
pub(crate) async fn read_frames(mut reader: impl AsyncRead + Unpin, tx: mpsc::Sender<Bytes>) {
    let mut len_buf = [0u8; 2];
    loop {
        if let Err(e) = reader.read_exact(&mut len_buf).await {
            debug!("read side closed: {}", e);
            return;
        }
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut packet = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut packet).await {
            debug!("connection died mid-packet: {}", e);
            return;
        }

        if tx.send(packet.into()).await.is_err() {
            // the agent is gone; no point reading further
            return;
        }
    }
}
