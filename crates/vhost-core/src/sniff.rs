use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::config::SniffConfig;
use crate::error::SniffError;
use crate::http::HttpConn;
use crate::replay::ReplayStream;
use crate::tls::TlsConn;

/// A failed sniffing attempt, handing back the connection.
///
/// The stream is rewound: every byte the sniffer consumed will be read again
/// by the next reader, and it is still recording, so another sniffer can be
/// run over it.
pub struct Rejected<S> {
    error: SniffError,
    stream: ReplayStream<S>,
}

impl<S> Rejected<S> {
    pub(crate) fn new(error: SniffError, stream: ReplayStream<S>) -> Self {
        Self { error, stream }
    }

    pub fn error(&self) -> &SniffError {
        &self.error
    }

    pub fn into_stream(self) -> ReplayStream<S> {
        self.stream
    }

    pub fn into_parts(self) -> (SniffError, ReplayStream<S>) {
        (self.error, self.stream)
    }
}

impl<S> fmt::Debug for Rejected<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("captured", &self.stream.captured_len())
            .finish()
    }
}

impl<S> fmt::Display for Rejected<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<S> std::error::Error for Rejected<S> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Which protocol a sniffed connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tls,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tls => "tls",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection whose virtual host is known.
pub enum Sniffed<S> {
    Tls(TlsConn<S>),
    Http(HttpConn<S>),
}

impl<S> Sniffed<S> {
    pub fn host(&self) -> &str {
        match self {
            Sniffed::Tls(conn) => conn.host(),
            Sniffed::Http(conn) => conn.host(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Sniffed::Tls(_) => Protocol::Tls,
            Sniffed::Http(_) => Protocol::Http,
        }
    }

    pub fn into_inner(self) -> ReplayStream<S> {
        match self {
            Sniffed::Tls(conn) => conn.into_inner(),
            Sniffed::Http(conn) => conn.into_inner(),
        }
    }
}

/// Sniff a connection as TLS, falling back to HTTP/1.x when the first bytes are
/// not a TLS handshake.
///
/// Only `NotTls` triggers the fallback; a malformed, truncated or slow
/// ClientHello is reported as is. The HTTP attempt gets a fresh deadline.
pub async fn sniff<S>(stream: S, config: &SniffConfig) -> Result<Sniffed<S>, Rejected<S>>
where
    S: AsyncRead + Unpin,
{
    match TlsConn::sniff(stream, config).await {
        Ok(conn) => Ok(Sniffed::Tls(conn)),
        Err(rejected) if rejected.error().is_not_tls() => {
            debug!("{}, trying HTTP", rejected.error());
            HttpConn::sniff_replay(rejected.into_stream(), config)
                .await
                .map(Sniffed::Http)
        }
        Err(rejected) => Err(rejected),
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Sniffed<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Sniffed::Tls(conn) => Pin::new(conn).poll_read(cx, buf),
            Sniffed::Http(conn) => Pin::new(conn).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Sniffed<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Sniffed::Tls(conn) => Pin::new(conn).poll_write(cx, data),
            Sniffed::Http(conn) => Pin::new(conn).poll_write(cx, data),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Sniffed::Tls(conn) => Pin::new(conn).poll_flush(cx),
            Sniffed::Http(conn) => Pin::new(conn).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Sniffed::Tls(conn) => Pin::new(conn).poll_shutdown(cx),
            Sniffed::Http(conn) => Pin::new(conn).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::io::Builder;

    use crate::error::DecodeError;
    use crate::tls::clienthello::tests::CHROME_CLIENT_HELLO;
    use crate::tls::record::tests::into_records;

    #[tokio::test]
    async fn tls_connection() {
        let wire = into_records(CHROME_CLIENT_HELLO, 16384);
        let mock = Builder::new().read(&wire).build();

        let mut conn = sniff(mock, &SniffConfig::default()).await.unwrap();
        assert_eq!(conn.protocol(), Protocol::Tls);
        assert_eq!(conn.host(), "www.myexample.com");

        let mut replayed = Vec::new();
        conn.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, wire);
    }

    #[tokio::test]
    async fn http_fallback_over_preserved_stream() {
        let request = b"GET / HTTP/1.1\r\nHost: plain.example\r\n\r\n";
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(request).await.unwrap();

        let mut conn = sniff(server, &SniffConfig::default()).await.unwrap();
        assert_eq!(conn.protocol(), Protocol::Http);
        assert_eq!(conn.host(), "plain.example");

        // Bytes sent after sniffing follow the replayed request head.
        client.write_all(b"trailing").await.unwrap();
        drop(client);

        let mut replayed = Vec::new();
        conn.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, b"GET / HTTP/1.1\r\nHost: plain.example\r\n\r\ntrailing");
    }

    #[tokio::test]
    async fn malformed_tls_does_not_fall_back() {
        let mut hello = CHROME_CLIENT_HELLO.to_vec();
        hello[0] = 0x02;
        let wire = into_records(&hello, 16384);
        let mock = Builder::new().read(&wire).build();

        let rejected = match sniff(mock, &SniffConfig::default()).await {
            Ok(_) => panic!("ServerHello should be rejected"),
            Err(rejected) => rejected,
        };
        assert!(matches!(
            rejected.error(),
            SniffError::Malformed(DecodeError::UnexpectedMessage(2))
        ));
        assert_eq!(rejected.to_string(), "malformed message: unexpected handshake message type 2");

        let mut stream = rejected.into_stream();
        let mut replayed = Vec::new();
        stream.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, wire);
    }

    #[tokio::test]
    async fn neither_protocol() {
        let mock = Builder::new().read(b"SSH-2.0-OpenSSH_9.6\r\n").build();

        match sniff(mock, &SniffConfig::default()).await {
            Err(rejected) => assert!(matches!(
                rejected.error(),
                SniffError::Malformed(DecodeError::Http(_))
            )),
            Ok(conn) => panic!("SSH banner sniffed as {}", conn.protocol()),
        }
    }
}
