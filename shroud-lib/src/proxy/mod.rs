use std::{fmt::Debug, net::SocketAddr, sync::Arc, time::Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Result, session::Network};

pub mod direct;
pub mod doh;
pub mod http_obfs;

#[cfg(test)]
pub mod mocks;

pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Sync + Unpin + Debug {}
impl<T> ProxyStream for T where
    T: AsyncRead + AsyncWrite + Send + Sync + Unpin + Debug
{
}
pub type AnyStream = Box<dyn ProxyStream>;

/// Datagram oriented connection.
///
/// Every method takes `&self` so a single connection can be read from one
/// task while another one writes to it.
#[async_trait]
pub trait PacketConn: Send + Sync + Debug {
    /// receives one datagram, truncating it if `buf` is too small.
    /// the source address is `None` when the transport has no meaningful
    /// per-packet peer
    async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, Option<SocketAddr>)>;

    async fn write_to(&self, buf: &[u8], target: &str) -> Result<usize>;

    async fn close(&self) -> Result<()>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Ok(())
    }

    fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Ok(())
    }
}
pub type AnyPacketConn = Box<dyn PacketConn>;

/// allows a forwarder to get a connection to a remote server, possibly
/// through a chain of other forwarders
#[async_trait]
pub trait Dialer: Send + Sync + Debug {
    /// address of the next hop, never empty
    fn addr(&self) -> String;

    async fn dial(&self, network: Network, address: &str) -> Result<AnyStream>;

    async fn dial_udp(
        &self,
        network: Network,
        address: &str,
    ) -> Result<AnyPacketConn>;
}
pub type AnyDialer = Arc<dyn Dialer>;
