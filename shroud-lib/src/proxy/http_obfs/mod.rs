mod stream;

use std::{
    fmt::{Debug, Formatter},
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, warn};

pub use stream::{HttpObfsStream, REQUEST_USER_AGENTS};

use crate::{
    Error, Result,
    common::pool::BufferPool,
    config::scheme::HttpObfsOption,
    proxy::{AnyDialer, AnyPacketConn, AnyStream, Dialer},
    session::Network,
};

/// Wraps every stream dialed through the upstream in an [`HttpObfsStream`].
pub struct HttpObfsDialer {
    dialer: AnyDialer,
    opts: HttpObfsOption,
    pool: Arc<BufferPool>,
    rng: Mutex<StdRng>,
}

impl HttpObfsDialer {
    pub fn new(
        opts: HttpObfsOption,
        dialer: AnyDialer,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self::with_rng(opts, dialer, pool, StdRng::from_os_rng())
    }

    /// user agents are drawn from `rng`, seed it for reproducible headers
    pub fn with_rng(
        opts: HttpObfsOption,
        dialer: AnyDialer,
        pool: Arc<BufferPool>,
        rng: StdRng,
    ) -> Self {
        Self {
            dialer,
            opts,
            pool,
            rng: Mutex::new(rng),
        }
    }

    fn next_user_agent_index(&self) -> usize {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(0..REQUEST_USER_AGENTS.len())
    }
}

impl Debug for HttpObfsDialer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpObfsDialer")
            .field("addr", &self.opts.addr)
            .field("host", &self.opts.host)
            .field("path", &self.opts.path)
            .field("dialer", &self.dialer)
            .finish()
    }
}

#[async_trait]
impl Dialer for HttpObfsDialer {
    fn addr(&self) -> String {
        if self.opts.addr.is_empty() {
            self.dialer.addr()
        } else {
            self.opts.addr.clone()
        }
    }

    async fn dial(&self, network: Network, address: &str) -> Result<AnyStream> {
        let remote = self.addr();
        debug!("http obfs dialing {} for {} {}", remote, network, address);

        let s = self
            .dialer
            .dial(Network::Tcp, &remote)
            .await
            .inspect_err(|e| warn!("[httpobfs] dial to {} error: {}", remote, e))?;

        Ok(Box::new(HttpObfsStream::new(
            s,
            self.opts.path.clone(),
            self.opts.host.clone(),
            self.next_user_agent_index(),
            &self.pool,
        )))
    }

    async fn dial_udp(
        &self,
        _network: Network,
        _address: &str,
    ) -> Result<AnyPacketConn> {
        Err(Error::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{Rng, SeedableRng, rngs::StdRng};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::io::Builder;

    use super::{HttpObfsDialer, REQUEST_USER_AGENTS};
    use crate::{
        Error,
        common::pool::BufferPool,
        config::scheme::HttpObfsOption,
        proxy::{Dialer, mocks::MockDummyDialer},
        session::Network,
    };

    fn opts(addr: &str) -> HttpObfsOption {
        HttpObfsOption {
            addr: addr.to_owned(),
            host: "cdn.example.com".to_owned(),
            path: "/".to_owned(),
        }
    }

    #[test]
    fn test_addr_fallback() {
        let mut upstream = MockDummyDialer::new();
        upstream.expect_addr().return_const("10.0.0.1:1080".to_owned());
        let upstream = Arc::new(upstream);
        let pool = Arc::new(BufferPool::new());

        let d = HttpObfsDialer::new(opts(""), upstream.clone(), pool.clone());
        assert_eq!(d.addr(), "10.0.0.1:1080");

        let d = HttpObfsDialer::new(opts("1.2.3.4:80"), upstream, pool);
        assert_eq!(d.addr(), "1.2.3.4:80");
    }

    #[test]
    fn test_debug_shows_upstream() {
        let d = HttpObfsDialer::new(
            opts("1.2.3.4:80"),
            Arc::new(MockDummyDialer::new()),
            Arc::new(BufferPool::new()),
        );
        let s = format!("{d:?}");
        assert!(s.contains("1.2.3.4:80"));
        assert!(s.contains("MockDummyDialer"));
    }

    #[tokio::test]
    async fn test_dial_ignores_requested_address() {
        let ua = StdRng::seed_from_u64(7).random_range(0..REQUEST_USER_AGENTS.len());
        let request = format!(
            "GET / HTTP/1.1\r\nAccept-Encoding: gzip, deflate\r\nConnection: \
             keep-alive\r\nHost: cdn.example.com\r\nPragma: no-cache\r\n\
             User-Agent: {}\r\n\r\nping",
            REQUEST_USER_AGENTS[ua]
        );
        let inner = Builder::new()
            .write(request.as_bytes())
            .read(b"HTTP/1.1 200 OK\r\n\r\n")
            .read(b"pong")
            .build();

        let mut upstream = MockDummyDialer::new();
        upstream
            .expect_dial()
            .withf(|network, address| {
                *network == Network::Tcp && address.to_string() == "1.2.3.4:80"
            })
            .times(1)
            .return_once(move |_, _| Ok(Box::new(inner) as _));

        let d = HttpObfsDialer::with_rng(
            opts("1.2.3.4:80"),
            Arc::new(upstream),
            Arc::new(BufferPool::new()),
            StdRng::seed_from_u64(7),
        );
        let mut s = d.dial(Network::Tcp, "example.org:443").await.unwrap();
        s.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        s.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_dial_error_propagated() {
        let mut upstream = MockDummyDialer::new();
        upstream.expect_dial().return_once(|_, _| {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        });

        let d = HttpObfsDialer::new(
            opts("1.2.3.4:80"),
            Arc::new(upstream),
            Arc::new(BufferPool::new()),
        );
        match d.dial(Network::Tcp, "example.org:443").await {
            Err(Error::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused)
            }
            _ => panic!("expected the transport error"),
        }
    }

    #[tokio::test]
    async fn test_dial_udp_not_supported() {
        let d = HttpObfsDialer::new(
            opts("1.2.3.4:80"),
            Arc::new(MockDummyDialer::new()),
            Arc::new(BufferPool::new()),
        );
        assert!(matches!(
            d.dial_udp(Network::Udp, "8.8.8.8:53").await,
            Err(Error::NotSupported)
        ));
    }

    #[test]
    fn test_seeded_user_agents_are_reproducible() {
        let pick = |seed| {
            let d = HttpObfsDialer::with_rng(
                opts("1.2.3.4:80"),
                Arc::new(MockDummyDialer::new()),
                Arc::new(BufferPool::new()),
                StdRng::seed_from_u64(seed),
            );
            (0..8).map(|_| d.next_user_agent_index()).collect::<Vec<_>>()
        };

        let a = pick(42);
        assert_eq!(a, pick(42));
        assert!(a.iter().all(|i| *i < REQUEST_USER_AGENTS.len()));
    }
}
