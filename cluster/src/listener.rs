use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ClusterConfig;
use crate::dispatcher::RequestDispatcher;
use crate::receive_agent;

/// Handle to a running inbound listener. `shutdown` drains gracefully;
///  merely dropping the handle tears everything down without waiting.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// Bind `listen_addr` and start accepting peer connections, each served by
///  its own receive agent wired to `dispatcher`.
pub async fn open(
    listen_addr: &str,
    dispatcher: Arc<dyn RequestDispatcher>,
    config: Arc<ClusterConfig>,
) -> anyhow::Result<ListenerHandle> {
    config.validate()?;
    let listener = TcpListener::bind(listen_addr).await?;
    let local_addr = listener.local_addr()?;
    info!("listening for cluster peers on {}", local_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept_task = tokio::spawn(accept_loop(listener, dispatcher, config, shutdown_rx));

    Ok(ListenerHandle { local_addr, shutdown_tx, accept_task })
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<dyn RequestDispatcher>,
    config: Arc<ClusterConfig>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut agents = JoinSet::new();
    loop {
        select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("inbound connection from {}", peer);
                    agents.spawn(receive_agent::run(
                        stream,
                        dispatcher.clone(),
                        config.clone(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => error!("accept failed: {}", e),
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    // stop taking new connections immediately; the agents saw the same
    // signal and drain on their own
    drop(listener);
    while agents.join_next().await.is_some() {}
    debug!("all inbound connections drained");
}

impl ListenerHandle {
    /// The actually bound address - useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, signal every connection agent, and wait up to
    ///  `timeout` for them to drain before abandoning the stragglers.
    pub async fn shutdown(mut self, timeout: Duration) {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(timeout, &mut self.accept_task).await {
            Ok(_) => debug!("listener shut down"),
            Err(_) => {
                warn!("listener shutdown timed out, aborting remaining connections");
                self.accept_task.abort();
            }
        }
    }
}
