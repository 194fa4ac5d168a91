use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::registry::NodeRegistry;
use crate::sender_agent::SenderAgent;

/// One sender agent per peer node, dialed on demand. Creators racing to the
///  same peer converge on a single agent; the losers' connections are
///  dropped before their loops ever start.
#[derive(Clone, Default)]
pub struct SenderPool {
    agents: Arc<RwLock<FxHashMap<String, Arc<SenderAgent>>>>,
}

impl SenderPool {
    pub fn new() -> SenderPool {
        SenderPool::default()
    }

    /// The cached agent for `node`, dialing a fresh connection if none
    ///  exists. The dial happens outside the pool lock.
    pub async fn agent_for(
        &self,
        node: &str,
        registry: &NodeRegistry,
        config: &ClusterConfig,
    ) -> anyhow::Result<Arc<SenderAgent>> {
        if let Some(agent) = self.agents.read().unwrap().get(node) {
            return Ok(agent.clone());
        }

        let addr = registry
            .lookup(node)
            .ok_or_else(|| ClusterError::UnknownNode(node.to_string()))?;
        let stream = timeout(config.dial_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ClusterError::Timeout)?
            .map_err(ClusterError::Transport)?;
        debug!("dialed node {} at {}", node, addr);

        let (agent, backlog) = SenderAgent::new(node, config);
        let raced = {
            let mut agents = self.agents.write().unwrap();
            match agents.entry(node.to_string()) {
                Entry::Occupied(e) => Some(e.get().clone()),
                Entry::Vacant(e) => {
                    e.insert(agent.clone());
                    None
                }
            }
        };
        if let Some(existing) = raced {
            debug!("lost the dial race for {}, dropping our connection", node);
            return Ok(existing);
        }

        agent.start(stream, backlog, self.clone());
        Ok(agent)
    }

    /// Removes a dying agent - but only while the pool still maps the name
    ///  to that exact agent; a replacement dialed meanwhile stays.
    pub(crate) fn forget(&self, agent: &Arc<SenderAgent>) {
        let mut agents = self.agents.write().unwrap();
        if let Some(current) = agents.get(agent.name()) {
            if Arc::ptr_eq(current, agent) {
                agents.remove(agent.name());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn peer_count(&self) -> usize {
        self.agents.read().unwrap().len()
    }
}
