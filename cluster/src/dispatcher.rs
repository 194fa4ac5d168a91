use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use codec::request::ServiceAddr;

/// The seam between the transport and the hosting process: every complete
///  inbound request ends up here.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequestDispatcher: Send + Sync + 'static {
    /// Handle one request addressed to a local service. For calls, `Ok`
    ///  becomes an ok response carrying the returned bytes and `Err` becomes
    ///  a failure response carrying the error text; for pushes the result is
    ///  discarded.
    async fn dispatch(
        &self,
        addr: &ServiceAddr,
        cmd: &str,
        message: &[u8],
    ) -> anyhow::Result<Vec<u8>>;
}

/// Answers every request with a short description of what arrived. A
///  placeholder for hosts that have not wired up real services yet, and a
///  convenient peer for tests.
pub struct EchoDispatcher;

#[async_trait]
impl RequestDispatcher for EchoDispatcher {
    async fn dispatch(
        &self,
        addr: &ServiceAddr,
        cmd: &str,
        message: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        Ok(format!("recv addr:{} cmd:{} ({} bytes)", addr, cmd, message.len()).into_bytes())
    }
}
