use std::sync::Arc;
use std::time::Duration;

use codec::request::ServiceAddr;

use crate::config::ClusterConfig;
use crate::dispatcher::RequestDispatcher;
use crate::listener::{self, ListenerHandle};
use crate::registry::NodeRegistry;
use crate::sender_pool::SenderPool;

/// The host process's handle on the cluster transport: the node-name
///  registry, the pool of outbound agents, and the inbound listener.
///
/// A node usually runs both directions - `open` once to serve peers, and
///  `call`/`send` whenever local code needs a remote service - but either
///  side works on its own.
pub struct ClusterNode {
    config: Arc<ClusterConfig>,
    registry: NodeRegistry,
    senders: SenderPool,
}

impl ClusterNode {
    pub fn new(config: ClusterConfig) -> anyhow::Result<ClusterNode> {
        config.validate()?;
        Ok(ClusterNode {
            config: Arc::new(config),
            registry: NodeRegistry::new(),
            senders: SenderPool::new(),
        })
    }

    /// Bind `name` to a `host:port` address for dialing.
    pub fn register_node(&self, name: &str, addr: &str) {
        self.registry.register(name, addr);
    }

    pub fn unregister_node(&self, name: &str) {
        self.registry.unregister(name);
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        self.registry.lookup(name)
    }

    /// Merge a batch of name bindings into the registry (additive; see
    ///  [`NodeRegistry::reload`]).
    pub fn reload(&self, bindings: impl IntoIterator<Item = (String, String)>) {
        self.registry.reload(bindings);
    }

    /// Replace the registry contents wholesale.
    pub fn replace_all(&self, bindings: impl IntoIterator<Item = (String, String)>) {
        self.registry.replace_all(bindings);
    }

    /// Start the inbound listener; `dispatcher` receives every request that
    ///  peers address to this node.
    pub async fn open(
        &self,
        listen_addr: &str,
        dispatcher: Arc<dyn RequestDispatcher>,
    ) -> anyhow::Result<ListenerHandle> {
        listener::open(listen_addr, dispatcher, self.config.clone()).await
    }

    /// Call a service on the named peer and wait for its response or the
    ///  deadline. The returned flag and message are the remote verdict;
    ///  transport-level problems (unknown node, dead connection, deadline)
    ///  come back as errors instead.
    pub async fn call(
        &self,
        node: &str,
        service: impl Into<ServiceAddr>,
        cmd: &str,
        args: &[u8],
        deadline: Duration,
    ) -> anyhow::Result<(bool, Vec<u8>)> {
        let agent = self.senders.agent_for(node, &self.registry, &self.config).await?;
        agent.call(service.into(), cmd, args, deadline).await
    }

    /// Push to a service on the named peer: no session, no response, returns
    ///  once the request is encoded and enqueued.
    pub async fn send(
        &self,
        node: &str,
        service: impl Into<ServiceAddr>,
        cmd: &str,
        args: &[u8],
    ) -> anyhow::Result<()> {
        let agent = self.senders.agent_for(node, &self.registry, &self.config).await?;
        agent.send(service.into(), cmd, args).await
    }
}
