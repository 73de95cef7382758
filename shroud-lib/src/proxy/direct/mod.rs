use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

use crate::{
    Error, Result,
    proxy::{AnyPacketConn, AnyStream, Dialer, PacketConn},
    session::Network,
};

pub const DIRECT_ADDR: &str = "direct";

/// Connects straight to the destination, the root of every dialer chain.
#[derive(Debug, Default)]
pub struct DirectDialer;

impl DirectDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    fn addr(&self) -> String {
        DIRECT_ADDR.to_owned()
    }

    async fn dial(&self, network: Network, address: &str) -> Result<AnyStream> {
        if network != Network::Tcp {
            return Err(Error::NotSupported);
        }

        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        debug!(
            "direct tcp connection to {} established, local: {:?}",
            address,
            stream.local_addr().ok()
        );
        Ok(Box::new(stream))
    }

    async fn dial_udp(
        &self,
        _network: Network,
        address: &str,
    ) -> Result<AnyPacketConn> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        trace!(
            "direct udp socket {:?} bound for {}",
            socket.local_addr().ok(),
            address
        );
        Ok(Box::new(DirectPacketConn::new(socket)))
    }
}

#[derive(Debug)]
pub struct DirectPacketConn {
    inner: UdpSocket,
}

impl DirectPacketConn {
    pub fn new(inner: UdpSocket) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PacketConn for DirectPacketConn {
    async fn read_from(
        &self,
        buf: &mut [u8],
    ) -> Result<(usize, Option<SocketAddr>)> {
        let (n, src) = self.inner.recv_from(buf).await?;
        Ok((n, Some(src)))
    }

    async fn write_to(&self, buf: &[u8], target: &str) -> Result<usize> {
        Ok(self.inner.send_to(buf, target).await?)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr().ok()
    }
}
