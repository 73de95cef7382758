use std::fmt::{Debug, Formatter};

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Empty;
use mockall::mock;

use super::{AnyPacketConn, AnyStream, Dialer, doh::DohExchanger};
use crate::{Result, session::Network};

mock! {
    pub DummyDialer {}

    #[async_trait::async_trait]
    impl Dialer for DummyDialer {
        fn addr(&self) -> String;
        async fn dial(&self, network: Network, address: &str) -> Result<AnyStream>;
        async fn dial_udp(
            &self,
            network: Network,
            address: &str,
        ) -> Result<AnyPacketConn>;
    }
}

mock! {
    pub DummyExchanger {}

    #[async_trait::async_trait]
    impl DohExchanger for DummyExchanger {
        async fn round_trip(
            &self,
            req: Request<Empty<Bytes>>,
        ) -> Result<Response<Bytes>>;
    }
}

impl Debug for MockDummyDialer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDummyDialer").finish()
    }
}
