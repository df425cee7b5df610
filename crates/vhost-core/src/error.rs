use std::time::Duration;

use thiserror::Error;

/// Why a sniffing attempt gave up.
///
/// Every variant is terminal for the attempt that produced it. `NotTls` is the
/// only one where trying a different sniffer on the same (rewound) stream makes
/// sense.
#[derive(Debug, Error)]
pub enum SniffError {
    #[error("not a TLS handshake (first byte 0x{0:02x})")]
    NotTls(u8),
    #[error("malformed message: {0}")]
    Malformed(#[from] DecodeError),
    #[error("peer closed the connection after {received} bytes, before a complete message")]
    Truncated { received: usize },
    #[error("no complete message within {0:?}")]
    Timeout(Duration),
    #[error("message exceeds the {limit} byte sniffing limit")]
    ResourceLimit { limit: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SniffError {
    pub fn is_not_tls(&self) -> bool {
        matches!(self, SniffError::NotTls(_))
    }
}

/// Structural problems found while decoding a handshake message or request head.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("not enough data for {0}")]
    Short(&'static str),
    #[error("{0} length does not match its contents")]
    LengthMismatch(&'static str),
    #[error("unexpected handshake message type {0}")]
    UnexpectedMessage(u8),
    #[error("unexpected record content type {0} inside a handshake")]
    UnexpectedRecord(u8),
    #[error("empty handshake record")]
    EmptyRecord,
    #[error("record of {0} bytes exceeds the TLS plaintext limit")]
    RecordOverflow(usize),
    #[error("session id of {0} bytes is longer than 32")]
    SessionIdTooLong(usize),
    #[error("extension 0x{0:04x} appears more than once")]
    DuplicateExtension(u16),
    #[error("empty ALPN protocol name")]
    EmptyAlpnProtocol,
    #[error("HTTP request head: {0}")]
    Http(#[from] httparse::Error),
}
