use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::timeout;
use tracing::debug;

use crate::config::SniffConfig;
use crate::error::SniffError;
use crate::replay::ReplayStream;
use crate::sniff::Rejected;
use crate::tls::clienthello::parse_client_hello_with;
use crate::tls::record::HandshakeAssembler;
use crate::tls::types::ClientHelloMsg;

/// Read and decode exactly one ClientHello from `reader`, within the configured deadline.
pub async fn read_client_hello<R>(
    reader: &mut R,
    config: &SniffConfig,
) -> Result<ClientHelloMsg, SniffError>
where
    R: AsyncRead + Unpin,
{
    let mut assembler = HandshakeAssembler::new(config.max_handshake_bytes);
    let message = match timeout(config.handshake_timeout, assembler.next_message(reader)).await {
        Ok(result) => result?,
        Err(_) => return Err(SniffError::Timeout(config.handshake_timeout)),
    };
    Ok(parse_client_hello_with(
        message.as_bytes(),
        config.sni_selection,
    )?)
}

/// A connection whose TLS ClientHello has been read and decoded.
///
/// Reading from it yields the full original byte stream, starting with the
/// ClientHello records that were sniffed, so it can be handed unchanged to a
/// TLS terminator or a passthrough proxy.
pub struct TlsConn<S> {
    stream: ReplayStream<S>,
    hello: ClientHelloMsg,
}

impl<S> TlsConn<S>
where
    S: AsyncRead + Unpin,
{
    /// Sniff a fresh connection.
    pub async fn sniff(stream: S, config: &SniffConfig) -> Result<Self, Rejected<S>> {
        Self::sniff_replay(ReplayStream::new(stream), config).await
    }

    /// Sniff a stream that another sniffer may already have read from.
    ///
    /// On failure the stream comes back rewound, still recording, so a
    /// different sniffer can take its turn.
    pub async fn sniff_replay(
        mut stream: ReplayStream<S>,
        config: &SniffConfig,
    ) -> Result<Self, Rejected<S>> {
        stream.rewind();
        let result = read_client_hello(&mut stream, config).await;
        stream.rewind();

        match result {
            Ok(hello) => {
                debug!(
                    "ClientHello: sni={:?} alpn={:?} ({} bytes buffered)",
                    hello.server_name,
                    hello.alpn_protocols,
                    stream.captured_len()
                );
                stream.stop_recording();
                Ok(Self { stream, hello })
            }
            Err(error) => {
                debug!("TLS sniffing failed: {}", error);
                Err(Rejected::new(error, stream))
            }
        }
    }
}

impl<S> TlsConn<S> {
    /// Requested server name, empty when the client sent no SNI.
    pub fn host(&self) -> &str {
        self.hello.host()
    }

    pub fn alpn_protocols(&self) -> &[String] {
        &self.hello.alpn_protocols
    }

    pub fn client_hello(&self) -> &ClientHelloMsg {
        &self.hello
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

impl<S: AsyncRead + Unpin> AsyncRead for TlsConn<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsConn<S> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::io::Builder;

    use crate::error::DecodeError;
    use crate::tls::clienthello::tests::{client_hello_with_extensions, CHROME_CLIENT_HELLO};
    use crate::tls::record::tests::into_records;
    use crate::tls::types::MAX_PLAINTEXT_LEN;

    /// The first flight rustls sends for `host`, offering h2 and http/1.1.
    fn rustls_client_hello(host: &str) -> Vec<u8> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        let server_name = rustls::pki_types::ServerName::try_from(host)
            .unwrap()
            .to_owned();
        let mut client = rustls::ClientConnection::new(Arc::new(config), server_name).unwrap();

        let mut wire = Vec::new();
        while client.wants_write() {
            client.write_tls(&mut wire).unwrap();
        }
        wire
    }

    #[tokio::test]
    async fn test_sni_from_real_client() {
        let wire = rustls_client_hello("foo.example.com");
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(&wire).await.unwrap();

        let mut conn = TlsConn::sniff(server, &SniffConfig::default())
            .await
            .unwrap();
        assert_eq!(conn.host(), "foo.example.com");
        assert_eq!(conn.alpn_protocols(), &["h2", "http/1.1"]);
        assert!(conn.client_hello().supported_versions.contains(&0x0304));

        // Nothing the sniffer consumed is lost for the downstream reader.
        drop(client);
        let mut replayed = Vec::new();
        conn.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, wire);
    }

    #[tokio::test]
    async fn test_matches_independent_parser() {
        use tls_parser::{
            parse_tls_extensions, parse_tls_plaintext, TlsExtension, TlsMessage,
            TlsMessageHandshake,
        };

        let wire = rustls_client_hello("cross.check.example");
        let mut mock = Builder::new().read(&wire).build();
        let conn = TlsConn::sniff(&mut mock, &SniffConfig::default())
            .await
            .unwrap();

        let (_, record) = parse_tls_plaintext(&wire).unwrap();
        let ch = record
            .msg
            .iter()
            .find_map(|msg| match msg {
                TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) => Some(ch),
                _ => None,
            })
            .unwrap();

        let theirs: Vec<u16> = ch.ciphers.iter().map(|c| c.0).collect();
        assert_eq!(conn.client_hello().cipher_suites, theirs);
        assert_eq!(conn.client_hello().version, ch.version.0);
        assert_eq!(conn.client_hello().session_id.as_slice(), ch.session_id.unwrap_or(&[]));

        let (_, extensions) = parse_tls_extensions(ch.ext.unwrap()).unwrap();
        let sni = extensions.iter().find_map(|ext| match ext {
            TlsExtension::SNI(names) => names
                .first()
                .map(|(_, name)| std::str::from_utf8(name).unwrap()),
            _ => None,
        });
        assert_eq!(sni, Some(conn.host()));
        assert_eq!(extensions.len(), conn.client_hello().extensions.len());
    }

    #[tokio::test]
    async fn test_fragmented_hello_replays_byte_for_byte() {
        let mut wire = into_records(CHROME_CLIENT_HELLO, 50);
        wire.extend_from_slice(b"\x14\x03\x03\x00\x01\x01");
        let mut builder = Builder::new();
        for segment in wire.chunks(17) {
            builder.read(segment);
        }
        let mock = builder.build();

        let mut conn = TlsConn::sniff(mock, &SniffConfig::default()).await.unwrap();
        assert_eq!(conn.host(), "www.myexample.com");
        assert_eq!(conn.alpn_protocols(), &["h2", "http/1.1"]);

        let mut replayed = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let n = conn.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            replayed.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(replayed, wire);
    }

    #[tokio::test]
    async fn test_no_sni() {
        let hello = client_hello_with_extensions(&[0x00, 0x17, 0x00, 0x00]);
        let wire = into_records(&hello, MAX_PLAINTEXT_LEN);
        let mock = Builder::new().read(&wire).build();

        let conn = TlsConn::sniff(mock, &SniffConfig::default()).await.unwrap();
        assert_eq!(conn.host(), "");
        assert!(conn.alpn_protocols().is_empty());
    }

    #[tokio::test]
    async fn test_not_tls_keeps_stream_replayable() {
        let request = b"GET / HTTP/1.1\r\nHost: plain.example\r\n\r\n";
        let mock = Builder::new().read(&request[..5]).read(&request[5..]).build();

        let rejected = match TlsConn::sniff(mock, &SniffConfig::default()).await {
            Ok(_) => panic!("plain HTTP should not sniff as TLS"),
            Err(rejected) => rejected,
        };
        assert!(rejected.error().is_not_tls());

        let mut stream = rejected.into_stream();
        let mut replayed = Vec::new();
        stream.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, request);
    }

    #[tokio::test]
    async fn test_malformed_hello() {
        let truncated = &CHROME_CLIENT_HELLO[..CHROME_CLIENT_HELLO.len() - 50];
        let mut hello = truncated.to_vec();
        // Header agrees with the shorter body, so assembly succeeds and decoding fails.
        let body_len = (hello.len() - 4) as u32;
        hello[1..4].copy_from_slice(&body_len.to_be_bytes()[1..]);
        let wire = into_records(&hello, MAX_PLAINTEXT_LEN);
        let mock = Builder::new().read(&wire).build();

        match TlsConn::sniff(mock, &SniffConfig::default()).await {
            Err(rejected) => match rejected.error() {
                SniffError::Malformed(DecodeError::Short(_)) => {}
                other => panic!("expected Malformed, got {:?}", other),
            },
            Ok(_) => panic!("truncated hello should not decode"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let wire = into_records(CHROME_CLIENT_HELLO, MAX_PLAINTEXT_LEN);
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        // Half a ClientHello, then silence with the connection held open.
        client.write_all(&wire[..100]).await.unwrap();

        let config = SniffConfig::default().with_timeout(Duration::from_millis(50));
        let rejected = match TlsConn::sniff(server, &config).await {
            Ok(_) => panic!("incomplete hello should time out"),
            Err(rejected) => rejected,
        };
        assert!(matches!(rejected.error(), SniffError::Timeout(_)));

        // The partial bytes are still there for whoever reads next.
        let (_error, stream) = rejected.into_parts();
        assert_eq!(stream.unreplayed(), &wire[..100]);
        drop(client);
    }

    #[tokio::test]
    async fn test_resource_limit() {
        let wire = into_records(CHROME_CLIENT_HELLO, MAX_PLAINTEXT_LEN);
        // Only the record header is read before the cap trips.
        let mock = Builder::new().read(&wire[..5]).build();

        let config = SniffConfig::default().with_max_handshake_bytes(128);
        match TlsConn::sniff(mock, &config).await {
            Err(rejected) => assert!(matches!(
                rejected.error(),
                SniffError::ResourceLimit { limit: 128 }
            )),
            Ok(_) => panic!("200 byte hello should exceed a 128 byte cap"),
        }
    }

    #[tokio::test]
    async fn test_writes_reach_the_peer() {
        let wire = into_records(CHROME_CLIENT_HELLO, MAX_PLAINTEXT_LEN);
        let mock = Builder::new().read(&wire).write(b"\x15\x03\x03").build();

        let mut conn = TlsConn::sniff(mock, &SniffConfig::default()).await.unwrap();
        let mut replayed = vec![0u8; wire.len()];
        conn.read_exact(&mut replayed).await.unwrap();
        conn.write_all(b"\x15\x03\x03").await.unwrap();
    }
}
