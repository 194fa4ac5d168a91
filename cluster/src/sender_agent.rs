use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use bytes::{Bytes, BytesMut};
use codec::request::{encode_request, RequestPacket, ServiceAddr};
use codec::response::{decode_response, ResponsePacket, ResponseReassembly};
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::framing::read_frames;
use crate::sender_pool::SenderPool;
use crate::write_queue::{WriteBacklog, WriteQueue};

/// What a dying agent answers to every caller still waiting for a response.
pub(crate) const CLOSE_MESSAGE: &[u8] = b"socket close";

type SessionTable = FxHashMap<u32, oneshot::Sender<ResponsePacket>>;

/// Owns the outbound connection to one named peer: allocates sessions,
///  encodes and enqueues requests, and routes each inbound response to the
///  caller waiting on its session.
pub struct SenderAgent {
    name: String,
    part_size: usize,
    next_session: AtomicU32,
    /// `None` once the agent has shut down; no new waiter may register after
    ///  the close fan-out has run.
    sessions: Mutex<Option<SessionTable>>,
    queue: WriteQueue,
    close_tx: watch::Sender<bool>,
}

/// The channel ends the agent's loops consume, handed back separately so the
///  pool can decide whether to start the loops at all - the loser of a dial
///  race never does.
pub struct AgentBacklog {
    write: WriteBacklog,
    close_rx: watch::Receiver<bool>,
    recv_capacity: usize,
}

impl SenderAgent {
    pub fn new(name: &str, config: &ClusterConfig) -> (Arc<SenderAgent>, AgentBacklog) {
        let (queue, write) = WriteQueue::new(config.write_queue_capacity);
        let (close_tx, close_rx) = watch::channel(false);

        let agent = Arc::new(SenderAgent {
            name: name.to_string(),
            part_size: config.part_size,
            next_session: AtomicU32::new(1),
            sessions: Mutex::new(Some(SessionTable::default())),
            queue,
            close_tx,
        });
        (agent, AgentBacklog { write, close_rx, recv_capacity: config.recv_channel_capacity })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the connection loops. Called exactly once, by the creator that
    ///  won the pool insert.
    pub fn start(self: &Arc<SenderAgent>, stream: TcpStream, backlog: AgentBacklog, pool: SenderPool) {
        let AgentBacklog { write, close_rx, recv_capacity } = backlog;
        let span = span!(
            Level::DEBUG, "outbound_connection",
            peer = %self.name, correlation_id = %Uuid::new_v4(),
        );

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(write.run(write_half).instrument(span.clone()));

        let (pkt_tx, pkt_rx) = mpsc::channel(recv_capacity);
        let reader = tokio::spawn(read_frames(read_half, pkt_tx).instrument(span.clone()));

        let agent = self.clone();
        tokio::spawn(
            async move {
                agent.reply_loop(pkt_rx, close_rx).await;
                reader.abort();
                // leave the pool before failing the waiters, so a caller that
                // sees "socket close" and retries gets a fresh agent
                pool.forget(&agent);
                agent.fail_pending();
            }
            .instrument(span),
        );
    }

    /// Issue a request and wait for the matching response or the deadline.
    ///  Returns the remote ok flag and message; transport-level failures
    ///  (encode, closed connection, deadline) are errors.
    pub async fn call(
        &self,
        service: ServiceAddr,
        cmd: &str,
        args: &[u8],
        deadline: Duration,
    ) -> anyhow::Result<(bool, Vec<u8>)> {
        let session = self.gen_session();
        let (waiter_tx, waiter_rx) = oneshot::channel();
        {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.as_mut() {
                Some(table) => {
                    table.insert(session, waiter_tx);
                }
                None => bail!(ClusterError::PeerClosed),
            }
        }

        if let Err(e) = self.post(service, session, cmd, args).await {
            self.remove_session(session);
            return Err(e);
        }

        match timeout(deadline, waiter_rx).await {
            Ok(Ok(resp)) => Ok((resp.ok, resp.message)),
            Ok(Err(_)) => {
                // waiter dropped without a response; should not happen since
                // the close fan-out answers every registered session
                self.remove_session(session);
                bail!(ClusterError::PeerClosed)
            }
            Err(_) => {
                self.remove_session(session);
                bail!(ClusterError::Timeout)
            }
        }
    }

    /// Fire-and-forget: session 0, no waiter. Returns once the request is
    ///  encoded and enqueued.
    pub async fn send(&self, service: ServiceAddr, cmd: &str, args: &[u8]) -> anyhow::Result<()> {
        self.post(service, 0, cmd, args).await
    }

    /// Asks the agent's loops to wind down; pending callers then observe the
    ///  close fan-out.
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }

    fn gen_session(&self) -> u32 {
        loop {
            let session = self.next_session.fetch_add(1, Ordering::Relaxed);
            if session != 0 {
                return session;
            }
            // 0 means push on the wire; skip it when the counter wraps
        }
    }

    async fn post(&self, addr: ServiceAddr, session: u32, cmd: &str, args: &[u8]) -> anyhow::Result<()> {
        let req = RequestPacket { addr, session, cmd: cmd.to_string(), message: args.to_vec() };
        let mut buf = BytesMut::new();
        encode_request(&mut buf, &req, self.part_size)?;

        trace!("posting request session:{} cmd:{}", session, req.cmd);
        self.queue.submit(buf.freeze()).await
    }

    async fn reply_loop(&self, mut pkt_rx: mpsc::Receiver<Bytes>, mut close_rx: watch::Receiver<bool>) {
        let mut reassembly = ResponseReassembly::default();
        loop {
            select! {
                pkt = pkt_rx.recv() => {
                    let Some(packet) = pkt else {
                        debug!("peer closed the connection");
                        return;
                    };
                    match decode_response(&packet, &mut reassembly) {
                        Ok(None) => {}
                        Ok(Some(resp)) => self.deliver(resp),
                        Err(e) => {
                            // a peer speaking garbage cannot be trusted with
                            // the remaining sessions - tear the connection down
                            warn!("undecodable response, closing connection: {}", e);
                            return;
                        }
                    }
                }
                _ = close_rx.changed() => {
                    debug!("close requested");
                    return;
                }
            }
        }
    }

    fn deliver(&self, resp: ResponsePacket) {
        let waiter = match self.sessions.lock().unwrap().as_mut() {
            Some(table) => table.remove(&resp.session),
            None => None,
        };
        match waiter {
            // the caller may have timed out between lookup and delivery
            Some(tx) => {
                let _ = tx.send(resp);
            }
            None => trace!("no waiter for session {}, dropping late response", resp.session),
        }
    }

    fn remove_session(&self, session: u32) {
        if let Some(table) = self.sessions.lock().unwrap().as_mut() {
            table.remove(&session);
        }
    }

    /// Close fan-out: answer every outstanding waiter with a synthetic
    ///  failure and refuse all future registrations.
    fn fail_pending(&self) {
        let Some(table) = self.sessions.lock().unwrap().take() else {
            return;
        };
        if !table.is_empty() {
            debug!("failing {} in-flight calls", table.len());
        }
        for (session, waiter) in table {
            let _ = waiter.send(ResponsePacket {
                session,
                ok: false,
                message: CLOSE_MESSAGE.to_vec(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The backlog is returned alongside so the write queue stays open even
    ///  though no loop is started; dropping it would fail every submit.
    fn agent() -> (Arc<SenderAgent>, AgentBacklog) {
        SenderAgent::new("peer", &ClusterConfig::default())
    }

    #[test]
    fn test_sessions_are_distinct_and_non_zero() {
        let (agent, _backlog) = agent();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let session = agent.gen_session();
            assert_ne!(session, 0);
            assert!(seen.insert(session), "session {} was handed out twice", session);
        }
    }

    #[test]
    fn test_session_counter_skips_zero_on_wrap() {
        let (agent, _backlog) = agent();
        agent.next_session.store(u32::MAX, Ordering::Relaxed);

        assert_eq!(agent.gen_session(), u32::MAX);
        assert_eq!(agent.gen_session(), 1, "0 must be skipped at wraparound");
    }

    #[tokio::test]
    async fn test_call_after_close_fails_immediately() {
        let (agent, _backlog) = agent();
        agent.fail_pending();

        let err = agent
            .call(ServiceAddr::Id(1), "cmd", b"", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ClusterError>(), Some(ClusterError::PeerClosed)));
    }

    #[tokio::test]
    async fn test_fail_pending_answers_every_waiter() {
        let (agent, _backlog) = agent();
        let mut waiters = Vec::new();
        {
            let mut sessions = agent.sessions.lock().unwrap();
            let table = sessions.as_mut().unwrap();
            for session in [5u32, 6, 7] {
                let (tx, rx) = oneshot::channel();
                table.insert(session, tx);
                waiters.push(rx);
            }
        }

        agent.fail_pending();

        for waiter in waiters {
            let resp = waiter.await.unwrap();
            assert!(!resp.ok);
            assert_eq!(resp.message, CLOSE_MESSAGE);
        }
    }

    /// A timed-out call must leave no session-table entry behind.
    #[tokio::test]
    async fn test_timeout_removes_session_entry() {
        let (agent, _backlog) = agent();
        let err = agent
            .call(ServiceAddr::Id(1), "cmd", b"", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ClusterError>(), Some(ClusterError::Timeout)));

        let sessions = agent.sessions.lock().unwrap();
        assert!(sessions.as_ref().unwrap().is_empty());
    }
}
