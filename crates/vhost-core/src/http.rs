use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::time::timeout;
use tracing::debug;

use crate::config::SniffConfig;
use crate::error::{DecodeError, SniffError};
use crate::replay::ReplayStream;
use crate::sniff::Rejected;

const MAX_HEADERS: usize = 128;
const READ_CHUNK: usize = 1024;

/// The request line and headers of one HTTP/1.x request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestHead {
    pub method: String,
    pub path: String,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1
    pub version: u8,
    pub headers: Vec<(String, Vec<u8>)>,
    host: Option<String>,
}

impl HttpRequestHead {
    /// Host the request is addressed to, empty when it names none.
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    fn from_parsed(req: &httparse::Request<'_, '_>) -> Self {
        let headers: Vec<(String, Vec<u8>)> = req
            .headers
            .iter()
            .map(|h| (h.name.to_string(), h.value.to_vec()))
            .collect();
        let path = req.path.unwrap_or("").to_string();

        let mut head = Self {
            method: req.method.unwrap_or("").to_string(),
            version: req.version.unwrap_or(1),
            host: None,
            path,
            headers,
        };
        head.host = head.resolve_host();
        head
    }

    // Host header first; an absolute-form target (proxy style) otherwise.
    fn resolve_host(&self) -> Option<String> {
        if let Some(value) = self.header("host") {
            let value = String::from_utf8_lossy(value).trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
        let uri: http::Uri = self.path.parse().ok()?;
        uri.authority().map(|a| a.as_str().to_string())
    }
}

/// Read one request head from `reader`, within the configured deadline and size cap.
pub async fn read_request_head<R>(
    reader: &mut R,
    config: &SniffConfig,
) -> Result<HttpRequestHead, SniffError>
where
    R: AsyncRead + Unpin,
{
    match timeout(config.handshake_timeout, read_head(reader, config.max_handshake_bytes)).await {
        Ok(result) => result,
        Err(_) => Err(SniffError::Timeout(config.handshake_timeout)),
    }
}

async fn read_head<R>(reader: &mut R, limit: usize) -> Result<HttpRequestHead, SniffError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if buf.len() >= limit {
            return Err(SniffError::ResourceLimit { limit });
        }
        let want = chunk.len().min(limit - buf.len());
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(SniffError::Truncated {
                received: buf.len(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                debug!("HTTP request head: {} bytes", len);
                return Ok(HttpRequestHead::from_parsed(&req));
            }
            Ok(httparse::Status::Partial) => continue,
            Err(e) => return Err(DecodeError::Http(e).into()),
        }
    }
}

/// A connection whose HTTP/1.x request head has been read.
///
/// Reads replay the request head (and anything read along with it) before
/// continuing with the live stream.
pub struct HttpConn<S> {
    stream: ReplayStream<S>,
    head: HttpRequestHead,
}

impl<S> HttpConn<S>
where
    S: AsyncRead + Unpin,
{
    pub async fn sniff(stream: S, config: &SniffConfig) -> Result<Self, Rejected<S>> {
        Self::sniff_replay(ReplayStream::new(stream), config).await
    }

    pub async fn sniff_replay(
        mut stream: ReplayStream<S>,
        config: &SniffConfig,
    ) -> Result<Self, Rejected<S>> {
        stream.rewind();
        let result = read_request_head(&mut stream, config).await;
        stream.rewind();

        match result {
            Ok(head) => {
                debug!("HTTP request: {} {} host={:?}", head.method, head.path, head.host);
                stream.stop_recording();
                Ok(Self { stream, head })
            }
            Err(error) => {
                debug!("HTTP sniffing failed: {}", error);
                Err(Rejected::new(error, stream))
            }
        }
    }
}

impl<S> HttpConn<S> {
    pub fn host(&self) -> &str {
        self.head.host()
    }

    pub fn request(&self) -> &HttpRequestHead {
        &self.head
    }

    pub fn get_ref(&self) -> &ReplayStream<S> {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut ReplayStream<S> {
        &mut self.stream
    }

    pub fn into_inner(self) -> ReplayStream<S> {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for HttpConn<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for HttpConn<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
