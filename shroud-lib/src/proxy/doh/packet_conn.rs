use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::Empty;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::DohEndpoint;
use crate::{Error, Result, proxy::PacketConn};

const DNS_MESSAGE: &str = "application/dns-message";

/// A datagram connection to a DoH resolver.
///
/// Each [`PacketConn::write_to`] is sent as one `GET` request and the
/// answer is queued for [`PacketConn::read_from`]. Writers block while the
/// queue is full, for at most the configured timeout. Once closed, reads
/// fail even if answers are still queued.
#[derive(Debug)]
pub struct DohPacketConn {
    endpoint: Arc<DohEndpoint>,
    tx: mpsc::Sender<Bytes>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    closed: CancellationToken,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
}

impl DohPacketConn {
    pub(crate) fn new(endpoint: Arc<DohEndpoint>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            endpoint,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
        }
    }

    fn new_request(&self, msg: &[u8]) -> Result<Request<Empty<Bytes>>> {
        let uri = format!(
            "https://{}{}?dns={}",
            self.endpoint.addr,
            self.endpoint.path,
            URL_SAFE_NO_PAD.encode(msg)
        );

        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::CONTENT_TYPE, DNS_MESSAGE)
            .header(header::ACCEPT, DNS_MESSAGE)
            .body(Empty::new())
            .map_err(|e| Error::InvalidRequest(e.to_string()))
    }

    /// one budget for the whole write: the configured timeout, cut short by
    /// the write deadline
    fn write_budget(&self) -> tokio::time::Instant {
        let deadline = tokio::time::Instant::now() + self.endpoint.timeout;
        match deadline_of(&self.write_deadline) {
            Some(d) => deadline.min(d.into()),
            None => deadline,
        }
    }

    async fn exchange(
        &self,
        req: Request<Empty<Bytes>>,
        deadline: tokio::time::Instant,
    ) -> Result<Bytes> {
        let round_trip = self.endpoint.exchanger.round_trip(req);
        let resp = tokio::time::timeout_at(deadline, round_trip)
            .await
            .map_err(|_| timed_out("doh request timed out"))??;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(Error::Protocol(status.to_string()));
        }
        Ok(resp.into_body())
    }

    async fn enqueue(&self, msg: Bytes, deadline: tokio::time::Instant) -> Result<()> {
        tokio::time::timeout_at(deadline, self.tx.send(msg))
            .await
            .map_err(|_| timed_out("doh answer queue is full"))?
            .map_err(|_| Error::Closed)
    }

    async fn dequeue(&self) -> Result<Bytes> {
        let mut rx = self.rx.lock().await;
        let msg = match deadline_of(&self.read_deadline) {
            Some(d) => tokio::time::timeout_at(d.into(), rx.recv())
                .await
                .map_err(|_| timed_out("doh read timed out"))?,
            None => rx.recv().await,
        };
        msg.ok_or(Error::Closed)
    }
}

fn deadline_of(slot: &Mutex<Option<Instant>>) -> Option<Instant> {
    *slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn timed_out(msg: &'static str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::TimedOut, msg))
}

#[async_trait]
impl PacketConn for DohPacketConn {
    async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, Option<SocketAddr>)> {
        let msg = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::Closed),
            msg = self.dequeue() => msg?,
        };

        let n = msg.len().min(buf.len());
        buf[..n].copy_from_slice(&msg[..n]);
        if n < msg.len() {
            trace!("doh answer truncated from {} to {} bytes", msg.len(), n);
        }
        Ok((n, None))
    }

    async fn write_to(&self, buf: &[u8], target: &str) -> Result<usize> {
        if self.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        let req = self.new_request(buf)?;
        trace!("doh query of {} bytes for {}", buf.len(), target);

        let deadline = self.write_budget();
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::Closed),
            rv = async {
                let msg = self.exchange(req, deadline).await?;
                self.enqueue(msg, deadline).await
            } => {
                rv.inspect_err(|e| {
                    debug!("doh query to {} failed: {}", self.endpoint.addr, e)
                })?;
                Ok(buf.len())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        *self.read_deadline.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        *self.write_deadline.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
        Ok(())
    }
}
