use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Future;
use http_body_util::Empty;
use hyper::Uri;
use hyper_util::{
    client::legacy::{
        Client,
        connect::{Connected, Connection},
    },
    rt::TokioExecutor,
};
use tower::Service;

use crate::{
    common::{
        errors::{map_io_error, new_io_error},
        tls::{crypto_provider, global_root_store},
    },
    proxy::{AnyDialer, AnyStream},
    session::Network,
};

#[derive(Clone)]
/// A connector that reaches every url through a [`crate::Dialer`], so the
/// http traffic rides the dialer chain
pub struct DialerConnector(pub AnyDialer);

impl Service<Uri> for DialerConnector {
    type Error = std::io::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;
    type Response = AnyStream;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, remote: Uri) -> Self::Future {
        let dialer = self.0.clone();

        Box::pin(async move {
            let host = remote
                .host()
                .ok_or_else(|| new_io_error(format!("invalid url: {remote}")))?;
            let port = remote.port_u16().unwrap_or(match remote.scheme_str() {
                Some("http") => 80,
                _ => 443,
            });
            dialer
                .dial(Network::Tcp, &format!("{host}:{port}"))
                .await
                .map_err(Into::into)
        })
    }
}

impl Connection for AnyStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for AnyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let n = unsafe {
            let mut tbuf = tokio::io::ReadBuf::uninit(buf.as_mut());
            match tokio::io::AsyncRead::poll_read(self, cx, &mut tbuf) {
                Poll::Ready(Ok(())) => tbuf.filled().len(),
                other => return other,
            }
        };

        unsafe {
            buf.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl hyper::rt::Write for AnyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        tokio::io::AsyncWrite::poll_write(self, cx, buf)
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        tokio::io::AsyncWrite::poll_flush(self, cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        tokio::io::AsyncWrite::poll_shutdown(self, cx)
    }
}

pub type HttpClient =
    Client<hyper_rustls::HttpsConnector<DialerConnector>, Empty<Bytes>>;

/// https only client whose connections are all made by `dialer`
pub fn new_http_client(dialer: AnyDialer) -> std::io::Result<HttpClient> {
    let tls_config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(map_io_error)?
        .with_root_certificates(global_root_store())
        .with_no_client_auth();

    let connector: hyper_rustls::HttpsConnector<DialerConnector> =
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_only()
            .enable_all_versions()
            .wrap_connector(DialerConnector(dialer));

    Ok(Client::builder(TokioExecutor::new()).build(connector))
}
