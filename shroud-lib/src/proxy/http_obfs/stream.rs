use std::{
    fmt::{Debug, Formatter},
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

use crate::{
    common::pool::{BufferPool, PooledBuf},
    proxy::AnyStream,
};

// maximum packet size of most proxy protocols is about 16 KiB so 20 KiB is
// enough for one response header plus the first chunk of payload
pub const SCRATCH_BUF_SIZE: usize = 20 * 1024;

const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";

pub const REQUEST_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 6.3; WOW64; rv:40.0) Gecko/20100101 Firefox/40.0",
    "Mozilla/5.0 (Windows NT 6.3; WOW64; rv:40.0) Gecko/20100101 Firefox/44.0",
    "Mozilla/5.0 (Windows NT 6.1) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/41.0.2228.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/535.11 (KHTML, like Gecko) \
     Ubuntu/11.10 Chromium/27.0.1453.93 Chrome/27.0.1453.93 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:35.0) Gecko/20100101 Firefox/35.0",
    "Mozilla/5.0 (compatible; WOW64; MSIE 10.0; Windows NT 6.2)",
    "Mozilla/5.0 (Windows; U; Windows NT 6.1; en-US) AppleWebKit/533.20.25 \
     (KHTML, like Gecko) Version/5.0.4 Safari/533.20.27",
    "Mozilla/4.0 (compatible; MSIE 7.0; Windows NT 6.3; Trident/7.0; .NET4.0E; \
     .NET4.0C)",
    "Mozilla/5.0 (Windows NT 6.3; Trident/7.0; rv:11.0) like Gecko",
    "Mozilla/5.0 (Linux; Android 4.4; Nexus 5 Build/BuildID) AppleWebKit/537.36 \
     (KHTML, like Gecko) Version/4.0 Chrome/30.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (iPad; CPU OS 5_0 like Mac OS X) AppleWebKit/534.46 (KHTML, \
     like Gecko) Version/5.1 Mobile/9A334 Safari/7534.48.3",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 5_0 like Mac OS X) AppleWebKit/534.46 \
     (KHTML, like Gecko) Version/5.1 Mobile/9A334 Safari/7534.48.3",
];

enum WriteState {
    Init,
    /// request header plus the first payload, partially written
    Handshaking {
        pending: Vec<u8>,
        written: usize,
        payload_len: usize,
    },
    Handshaken,
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum ReadState {
    Init,
    Handshaken,
}

/// A stream that looks like a plain HTTP GET exchange on the wire.
///
/// The first write is prefixed with a fake request header and the first
/// response header sent by the server is stripped from the inbound bytes.
/// After that, bytes flow unmodified in both directions.
///
/// The first write owns the header it encoded: if it returns `Pending`, the
/// caller must retry with the same buffer, as `write_all` does. A different
/// buffer on the retry is ignored until the header is out.
pub struct HttpObfsStream {
    inner: AnyStream,
    path: String,
    host: String,
    user_agent: &'static str,

    write_state: WriteState,
    read_state: ReadState,

    /// raw inbound bytes while the response header is incomplete
    scratch: PooledBuf,
    scratch_filled: usize,
    /// decoded bytes that did not fit into the caller's buffer
    carry: PooledBuf,
}

impl HttpObfsStream {
    /// `user_agent_index` picks from [`REQUEST_USER_AGENTS`], wrapping around
    pub fn new(
        inner: AnyStream,
        path: String,
        host: String,
        user_agent_index: usize,
        pool: &Arc<BufferPool>,
    ) -> Self {
        Self {
            inner,
            path,
            host,
            user_agent: REQUEST_USER_AGENTS
                [user_agent_index % REQUEST_USER_AGENTS.len()],
            write_state: WriteState::Init,
            read_state: ReadState::Init,
            scratch: pool.acquire(SCRATCH_BUF_SIZE),
            scratch_filled: 0,
            carry: pool.acquire_empty(),
        }
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent
    }

    fn drain_carry(&mut self, buf: &mut ReadBuf<'_>) {
        let n = self.carry.len().min(buf.remaining());
        buf.put_slice(&self.carry[..n]);
        self.carry.advance(n);
    }
}

fn encode_request(path: &str, host: &str, user_agent: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "GET {path} HTTP/1.1\r\nAccept-Encoding: gzip, deflate\r\nConnection: \
         keep-alive\r\nHost: {host}\r\nPragma: no-cache\r\nUser-Agent: \
         {user_agent}\r\n\r\n"
    );
    let mut buf = Vec::with_capacity(header.len() + payload.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(HEADER_DELIMITER.len())
        .position(|window| window == HEADER_DELIMITER)
}

impl Debug for HttpObfsStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpObfsStream")
            .field("inner", &self.inner)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("read_state", &self.read_state)
            .field("carry", &self.carry.len())
            .finish()
    }
}

impl AsyncWrite for HttpObfsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            match &mut this.write_state {
                WriteState::Handshaken => {
                    return Pin::new(&mut this.inner).poll_write(cx, buf);
                }
                WriteState::Init => {
                    let pending =
                        encode_request(&this.path, &this.host, this.user_agent, buf);
                    trace!(
                        "http obfs sending request header, {} bytes of payload",
                        buf.len()
                    );
                    this.write_state = WriteState::Handshaking {
                        pending,
                        written: 0,
                        payload_len: buf.len(),
                    };
                }
                WriteState::Handshaking {
                    pending,
                    written,
                    payload_len,
                } => {
                    while *written < pending.len() {
                        let n = ready!(
                            Pin::new(&mut this.inner)
                                .poll_write(cx, &pending[*written..])
                        )?;
                        if n == 0 {
                            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                        }
                        *written += n;
                    }
                    let n = *payload_len;
                    this.write_state = WriteState::Handshaken;
                    return Poll::Ready(Ok(n));
                }
            }
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

impl AsyncRead for HttpObfsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.carry.is_empty() {
            this.drain_carry(buf);
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.read_state == ReadState::Handshaken {
                return Pin::new(&mut this.inner).poll_read(cx, buf);
            }

            let filled = this.scratch_filled;
            if filled == this.scratch.len() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "http obfs response header too large",
                )));
            }

            let mut raw = ReadBuf::new(&mut this.scratch[filled..]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut raw))?;
            let n = raw.filled().len();
            if n == 0 {
                // eof before the response header completed
                return Poll::Ready(Ok(()));
            }
            this.scratch_filled += n;

            // the delimiter may straddle the previous read
            let search_from = filled.saturating_sub(HEADER_DELIMITER.len() - 1);
            let Some(pos) =
                find_delimiter(&this.scratch[search_from..this.scratch_filled])
            else {
                continue;
            };

            let body_start = search_from + pos + HEADER_DELIMITER.len();
            this.read_state = ReadState::Handshaken;
            trace!("http obfs response header stripped, {} bytes", body_start);

            let decoded = &this.scratch[body_start..this.scratch_filled];
            let n = decoded.len().min(buf.remaining());
            buf.put_slice(&decoded[..n]);
            this.carry.extend_from_slice(&decoded[n..]);
            this.scratch_filled = 0;

            if !decoded.is_empty() {
                return Poll::Ready(Ok(()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io, pin::Pin, sync::Arc, time::Duration};

    use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, duplex};
    use tokio_test::{
        assert_pending,
        io::{Builder, Mock},
        task,
    };

    use super::{HttpObfsStream, REQUEST_USER_AGENTS, SCRATCH_BUF_SIZE};
    use crate::common::pool::BufferPool;

    fn obfs(inner: Mock, pool: &Arc<BufferPool>) -> HttpObfsStream {
        HttpObfsStream::new(
            Box::new(inner),
            "/stream".to_owned(),
            "cdn.example.com".to_owned(),
            0,
            pool,
        )
    }

    fn request(payload: &[u8]) -> Vec<u8> {
        let mut wire = format!(
            "GET /stream HTTP/1.1\r\nAccept-Encoding: gzip, deflate\r\n\
             Connection: keep-alive\r\nHost: cdn.example.com\r\nPragma: \
             no-cache\r\nUser-Agent: {}\r\n\r\n",
            REQUEST_USER_AGENTS[0]
        )
        .into_bytes();
        wire.extend_from_slice(payload);
        wire
    }

    #[tokio::test]
    async fn test_header_sent_once() {
        let pool = Arc::new(BufferPool::new());
        let inner = Builder::new()
            .write(&request(b"abc"))
            .write(b"de")
            .write(b"f")
            .build();
        let mut s = obfs(inner, &pool);

        assert_eq!(s.write(b"abc").await.unwrap(), 3);
        assert_eq!(s.write(b"de").await.unwrap(), 2);
        assert_eq!(s.write(b"f").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_transport_writes() {
        let pool = Arc::new(BufferPool::new());
        let wire = request(b"payload");
        let inner = Builder::new()
            .write(&wire[..7])
            .wait(Duration::from_millis(10))
            .write(&wire[7..])
            .write(b"0123456")
            .wait(Duration::from_millis(10))
            .write(b"789")
            .build();
        let mut s = obfs(inner, &pool);

        // the header overhead is not part of the reported length
        assert_eq!(s.write(b"payload").await.unwrap(), 7);
        // past the handshake, partial writes surface to the caller
        assert_eq!(s.write(b"0123456789").await.unwrap(), 7);
        assert_eq!(s.write(b"789").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_handshake_resumes_after_pending() {
        let pool = Arc::new(BufferPool::new());
        let wire = request(b"payload");
        let inner = Builder::new()
            .write(&wire[..7])
            .wait(Duration::from_millis(20))
            .write(&wire[7..])
            .build();
        let mut s = obfs(inner, &pool);

        let mut t = task::spawn(());
        let poll = t.enter(|cx, _| Pin::new(&mut s).poll_write(cx, b"payload"));
        assert_pending!(poll);

        // the retry with the same buffer finishes the header, not a new one
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(s.write(b"payload").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_write_failure() {
        let pool = Arc::new(BufferPool::new());
        let inner = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
            .build();
        let mut s = obfs(inner, &pool);

        let err = s.write(b"payload").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_handshake_across_fragments() {
        let pool = Arc::new(BufferPool::new());
        let inner = Builder::new()
            .read(b"HTTP/1.1 200\r\n")
            .read(b"\r\n")
            .read(b"HELLO")
            .build();
        let mut s = obfs(inner, &pool);

        let mut buf = [0u8; 64];
        let n = s.read(&mut buf).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"HELLO");
    }

    #[tokio::test]
    async fn test_delimiter_split_inside() {
        let pool = Arc::new(BufferPool::new());
        let inner = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nServer: nginx\r")
            .read(b"\n\r")
            .read(b"\nbody")
            .read(b"-more")
            .build();
        let mut s = obfs(inner, &pool);

        let mut out = Vec::new();
        s.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"body-more");
    }

    #[tokio::test]
    async fn test_only_first_header_stripped() {
        let pool = Arc::new(BufferPool::new());
        let inner = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\n\r\nfirst")
            .read(b"\r\n\r\nsecond")
            .build();
        let mut s = obfs(inner, &pool);

        let mut out = Vec::new();
        s.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"first\r\n\r\nsecond");
    }

    #[tokio::test]
    async fn test_carry_over_small_buffer() {
        let pool = Arc::new(BufferPool::new());
        let inner = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\n\r\n0123456789")
            .build();
        let mut s = obfs(inner, &pool);

        let mut buf = [0u8; 4];
        let n = s.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"0123");

        // the transport is at eof, the rest comes from the carry-over buffer
        let mut rest = [0u8; 16];
        let n = s.read(&mut rest).await.unwrap();
        assert_eq!(&rest[..n], b"456789");

        assert_eq!(s.read(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_eof_before_handshake() {
        let pool = Arc::new(BufferPool::new());
        let inner = Builder::new().read(b"HTTP/1.1 200 OK\r\n").build();
        let mut s = obfs(inner, &pool);

        let mut buf = [0u8; 16];
        assert_eq!(s.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_header_too_large() {
        let pool = Arc::new(BufferPool::new());
        let junk = vec![b'a'; SCRATCH_BUF_SIZE];
        let inner = Builder::new().read(&junk).build();
        let mut s = obfs(inner, &pool);

        let mut buf = [0u8; 16];
        let err = s.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_buffers_released_on_drop() {
        let pool = Arc::new(BufferPool::new());
        let s = obfs(Builder::new().build(), &pool);
        assert_eq!(pool.idle(), 0);
        drop(s);
        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let pool = Arc::new(BufferPool::new());
        let (client, mut server) = duplex(64);
        let mut s = HttpObfsStream::new(
            Box::new(client),
            "/".to_owned(),
            "example.com".to_owned(),
            3,
            &pool,
        );

        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut buf = [0u8; 128];
            let body_start = loop {
                let n = server.read(&mut buf).await.unwrap();
                seen.extend_from_slice(&buf[..n]);
                if let Some(pos) = seen.windows(4).position(|w| w == b"\r\n\r\n")
                {
                    break pos + 4;
                }
            };
            let header = String::from_utf8(seen[..body_start].to_vec()).unwrap();
            assert!(header.starts_with("GET / HTTP/1.1\r\n"));
            assert!(header.contains(REQUEST_USER_AGENTS[3]));

            let mut body = seen[body_start..].to_vec();
            while body.len() < expected.len() {
                let n = server.read(&mut buf).await.unwrap();
                body.extend_from_slice(&buf[..n]);
            }
            assert_eq!(body, expected);

            server
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n")
                .await
                .unwrap();
            server.write_all(&body).await.unwrap();
        });

        s.write_all(&payload).await.unwrap();
        let mut echoed = vec![0u8; payload.len()];
        s.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, payload);
        server.await.unwrap();
    }
}
