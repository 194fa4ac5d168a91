//! Node-to-node transport for an actor cluster. Every node runs both sides
//!  at once: a listener that accepts peer connections and dispatches inbound
//!  requests to locally addressable services, and a pool of outbound agents
//!  that dial named peers and issue requests on behalf of local callers.
//!
//! One TCP connection per direction per peer carries many concurrent
//!  requests; the session field of the wire format (see the `codec` crate)
//!  correlates each call with its response. There is no handshake, no
//!  heartbeat, and no reconnect logic - a connection lives until either side
//!  closes it, and every in-flight call on it then fails with a synthetic
//!  "socket close" response.
//!
//! The entry point is [`node::ClusterNode`]: register peer addresses, `open`
//!  a listener with a [`dispatcher::RequestDispatcher`] for local services,
//!  and use `call`/`send` to reach services on other nodes.

pub mod config;
pub mod dispatcher;
pub mod error;
mod framing;
pub mod listener;
pub mod node;
pub mod receive_agent;
pub mod registry;
pub mod sender_agent;
pub mod sender_pool;
pub mod write_queue;

#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
