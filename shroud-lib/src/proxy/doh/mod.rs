mod exchange;
mod packet_conn;

use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

use async_trait::async_trait;
use tracing::debug;

pub use exchange::{DohExchanger, HttpsExchanger};
pub use packet_conn::DohPacketConn;

use crate::{
    Error, Result,
    config::scheme::DohOption,
    proxy::{AnyDialer, AnyPacketConn, AnyStream, Dialer},
    session::Network,
};

/// answers waiting to be read, a writer blocks while it is full
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// Everything a [`DohPacketConn`] needs to reach the resolver, shared by all
/// the connections of one dialer.
pub(crate) struct DohEndpoint {
    /// `host[:port]` put in the request url
    pub(crate) addr: String,
    pub(crate) path: String,
    pub(crate) timeout: std::time::Duration,
    pub(crate) exchanger: Box<dyn DohExchanger>,
}

impl Debug for DohEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohEndpoint")
            .field("addr", &self.addr)
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Turns every udp dial into a [`DohPacketConn`]. Streams are not supported.
pub struct DohDialer {
    dialer: AnyDialer,
    opts: DohOption,
    endpoint: Arc<DohEndpoint>,
}

impl DohDialer {
    /// the https client reaches the resolver through `dialer`
    pub fn new(opts: DohOption, dialer: AnyDialer) -> Result<Self> {
        let exchanger = HttpsExchanger::new(dialer.clone())?;
        Ok(Self::with_exchanger(opts, dialer, Box::new(exchanger)))
    }

    pub fn with_exchanger(
        opts: DohOption,
        dialer: AnyDialer,
        exchanger: Box<dyn DohExchanger>,
    ) -> Self {
        let addr = if opts.addr.is_empty() {
            dialer.addr()
        } else {
            opts.addr.clone()
        };
        let endpoint = Arc::new(DohEndpoint {
            addr,
            path: opts.path.clone(),
            timeout: opts.timeout,
            exchanger,
        });

        Self {
            dialer,
            opts,
            endpoint,
        }
    }
}

impl Debug for DohDialer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohDialer")
            .field("endpoint", &self.endpoint)
            .field("dialer", &self.dialer)
            .finish()
    }
}

#[async_trait]
impl Dialer for DohDialer {
    fn addr(&self) -> String {
        if self.opts.addr.is_empty() {
            self.dialer.addr()
        } else {
            self.opts.addr.clone()
        }
    }

    async fn dial(&self, _network: Network, _address: &str) -> Result<AnyStream> {
        Err(Error::NotSupported)
    }

    async fn dial_udp(
        &self,
        network: Network,
        address: &str,
    ) -> Result<AnyPacketConn> {
        // every datagram goes to the resolver whatever its destination
        debug!(
            "doh packet conn for {} {} via https://{}{}",
            network, address, self.endpoint.addr, self.endpoint.path
        );
        Ok(Box::new(DohPacketConn::new(
            self.endpoint.clone(),
            DEFAULT_QUEUE_CAPACITY,
        )))
    }
}
