use std::fmt::{Debug, Formatter};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Limited};
use hyper_util::client::legacy::{Client, connect::Connect};

use crate::{
    Error, Result,
    common::{
        errors::map_io_error,
        http::{DialerConnector, new_http_client},
    },
    proxy::AnyDialer,
};

/// largest DNS message that fits the wire format
pub const MAX_DNS_MESSAGE_SIZE: usize = 65535;

/// Sends one DoH request and hands back the response with its body fully
/// read.
#[async_trait]
pub trait DohExchanger: Send + Sync {
    /// the body is only read for a `200 OK`, it is left empty otherwise
    async fn round_trip(&self, req: Request<Empty<Bytes>>) -> Result<Response<Bytes>>;
}

/// [`DohExchanger`] over a pooled hyper client, https through the dialer
/// chain unless built from another client
pub struct HttpsExchanger<C = hyper_rustls::HttpsConnector<DialerConnector>> {
    client: Client<C, Empty<Bytes>>,
}

impl HttpsExchanger {
    pub fn new(dialer: AnyDialer) -> Result<Self> {
        Ok(Self::with_client(new_http_client(dialer)?))
    }
}

impl<C> HttpsExchanger<C> {
    pub fn with_client(client: Client<C, Empty<Bytes>>) -> Self {
        Self { client }
    }
}

impl<C> Debug for HttpsExchanger<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpsExchanger").finish()
    }
}

#[async_trait]
impl<C> DohExchanger for HttpsExchanger<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    async fn round_trip(&self, req: Request<Empty<Bytes>>) -> Result<Response<Bytes>> {
        let (parts, body) = self
            .client
            .request(req)
            .await
            .map_err(map_io_error)?
            .into_parts();

        if parts.status != StatusCode::OK {
            return Ok(Response::from_parts(parts, Bytes::new()));
        }

        let body = Limited::new(body, MAX_DNS_MESSAGE_SIZE)
            .collect()
            .await
            .map_err(|e| Error::Resource(e.to_string()))?
            .to_bytes();
        Ok(Response::from_parts(parts, body))
    }
}
