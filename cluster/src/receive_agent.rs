use std::sync::Arc;

use bytes::BytesMut;
use codec::request::{decode_request, RequestReassembly};
use codec::response::{encode_response, ResponsePacket};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{debug, span, trace, warn, Instrument, Level, Span};
use uuid::Uuid;

use crate::config::ClusterConfig;
use crate::dispatcher::RequestDispatcher;
use crate::framing::read_frames;
use crate::write_queue::WriteQueue;

/// Owns one inbound connection: frames packets off the socket, runs the
///  request decoder against this connection's reassembly state, hands
///  complete requests to the dispatcher, and answers calls through the
///  connection's write-coalescing queue.
///
/// Returns when the peer closes, the listener signals shutdown, or the write
///  side dies; all partial multipart state dies with it.
pub async fn run(
    stream: TcpStream,
    dispatcher: Arc<dyn RequestDispatcher>,
    config: Arc<ClusterConfig>,
    shutdown: watch::Receiver<bool>,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    let span = span!(Level::DEBUG, "inbound_connection", %peer, correlation_id = %Uuid::new_v4());

    handle_connection(stream, dispatcher, config, shutdown)
        .instrument(span)
        .await
}

async fn handle_connection(
    stream: TcpStream,
    dispatcher: Arc<dyn RequestDispatcher>,
    config: Arc<ClusterConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("accepted connection");
    let (read_half, write_half) = stream.into_split();

    let (queue, backlog) = WriteQueue::new(config.write_queue_capacity);
    tokio::spawn(backlog.run(write_half).instrument(Span::current()));

    let (pkt_tx, mut pkt_rx) = mpsc::channel(config.recv_channel_capacity);
    let reader = tokio::spawn(read_frames(read_half, pkt_tx).instrument(Span::current()));

    let mut reassembly = RequestReassembly::default();
    loop {
        select! {
            pkt = pkt_rx.recv() => {
                let Some(packet) = pkt else { break };
                if handle_packet(&packet, &mut reassembly, dispatcher.as_ref(), &queue, config.part_size)
                    .await
                    .is_err()
                {
                    // the write side is gone; nothing sensible left to do
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!("shutdown requested");
                break;
            }
        }
    }

    reader.abort();
    debug!("connection closed ({} partial requests dropped)", reassembly.len());
}

async fn handle_packet(
    packet: &[u8],
    reassembly: &mut RequestReassembly,
    dispatcher: &dyn RequestDispatcher,
    queue: &WriteQueue,
    part_size: usize,
) -> anyhow::Result<()> {
    match decode_request(packet, reassembly) {
        Ok(None) => Ok(()),
        Ok(Some(req)) => {
            trace!("request addr:{} session:{} cmd:{}", req.addr, req.session, req.cmd);
            let result = dispatcher.dispatch(&req.addr, &req.cmd, &req.message).await;

            if req.is_push() {
                if let Err(e) = result {
                    debug!("push dispatch failed: {:#}", e);
                }
                return Ok(());
            }

            let resp = match result {
                Ok(message) => ResponsePacket { session: req.session, ok: true, message },
                Err(e) => ResponsePacket {
                    session: req.session,
                    ok: false,
                    message: format!("{:#}", e).into_bytes(),
                },
            };
            respond(queue, &resp, part_size).await
        }
        Err(failure) => {
            warn!("dropping undecodable packet: {}", failure);
            // a broken call still deserves an answer; broken pushes and
            // packets that broke before the session field do not
            if let Some(session) = failure.response_session() {
                let resp = ResponsePacket {
                    session,
                    ok: false,
                    message: failure.to_string().into_bytes(),
                };
                respond(queue, &resp, part_size).await?;
            }
            Ok(())
        }
    }
}

async fn respond(queue: &WriteQueue, resp: &ResponsePacket, part_size: usize) -> anyhow::Result<()> {
    let mut buf = BytesMut::new();
    encode_response(&mut buf, resp, part_size)?;
    queue.submit(buf.freeze()).await
}
