use bytes::Bytes;

/// Record content type carrying handshake messages.
pub const CONTENT_TYPE_HANDSHAKE: u8 = 22;

/// Handshake message type of a ClientHello.
pub const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 1;

pub const RECORD_HEADER_LEN: usize = 5;
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// Largest record payload a peer may send in the clear (2^14).
pub const MAX_PLAINTEXT_LEN: usize = 16384;

pub const EXT_SERVER_NAME: u16 = 0x0000;
pub const EXT_STATUS_REQUEST: u16 = 0x0005;
pub const EXT_SUPPORTED_CURVES: u16 = 0x000a;
pub const EXT_SUPPORTED_POINTS: u16 = 0x000b;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
pub const EXT_ALPN: u16 = 0x0010;
pub const EXT_SCT: u16 = 0x0012;
pub const EXT_EXTENDED_MASTER_SECRET: u16 = 0x0017;
pub const EXT_SESSION_TICKET: u16 = 0x0023;
pub const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
pub const EXT_NEXT_PROTO_NEG: u16 = 0x3374;
pub const EXT_RENEGOTIATION_INFO: u16 = 0xff01;

/// The five-byte header in front of every TLS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: u8,
    pub version: u16,
    pub length: usize,
}

impl RecordHeader {
    pub fn parse(raw: &[u8; RECORD_HEADER_LEN]) -> Self {
        Self {
            content_type: raw[0],
            version: u16::from_be_bytes([raw[1], raw[2]]),
            length: u16::from_be_bytes([raw[3], raw[4]]) as usize,
        }
    }

    /// Content type is handshake and the major version is 3 (SSL 3.0 / TLS 1.x).
    pub fn looks_like_handshake(&self) -> bool {
        self.content_type == CONTENT_TYPE_HANDSHAKE && self.version >> 8 == 0x03
    }
}

/// One TLS record as read off the wire.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub header: RecordHeader,
    pub payload: Bytes,
}

/// One complete handshake message, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    raw: Bytes,
}

impl HandshakeMessage {
    /// `raw` must hold exactly one message: 4-byte header plus its declared body.
    pub(crate) fn new(raw: Bytes) -> Self {
        debug_assert!(raw.len() >= HANDSHAKE_HEADER_LEN);
        Self { raw }
    }

    pub fn msg_type(&self) -> u8 {
        self.raw[0]
    }

    pub fn body(&self) -> &[u8] {
        &self.raw[HANDSHAKE_HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// Decoded ClientHello.
///
/// Only the extensions a virtual-host router (or someone logging its traffic)
/// cares about are interpreted; the rest are recorded in `extensions` by type
/// code and otherwise ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloMsg {
    /// Legacy version field, e.g. 0x0303 for TLS 1.2
    pub version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    /// Cipher suite values in wire order, GREASE included
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    /// Extension type codes in wire order, GREASE included
    pub extensions: Vec<u16>,
    /// Server Name Indication (host_name entry)
    pub server_name: Option<String>,
    /// ALPN protocol names in client preference order
    pub alpn_protocols: Vec<String>,
    /// Supported TLS versions (from extension 0x002b)
    pub supported_versions: Vec<u16>,
    /// Supported groups / named curves (from extension 0x000a)
    pub supported_curves: Vec<u16>,
    /// EC point format values (from extension 0x000b)
    pub supported_points: Vec<u8>,
    /// Signature algorithms (from extension 0x000d)
    pub signature_algorithms: Vec<u16>,
    pub ocsp_stapling: bool,
    pub scts: bool,
    pub extended_master_secret: bool,
    pub ticket_supported: bool,
    pub session_ticket: Vec<u8>,
    /// Contents of renegotiation_info, when the client sent one
    pub secure_renegotiation: Option<Vec<u8>>,
    pub next_proto_neg: bool,
}

impl ClientHelloMsg {
    /// Server name, or the empty string when the client sent none.
    pub fn host(&self) -> &str {
        self.server_name.as_deref().unwrap_or("")
    }

    /// The highest version the client offers, preferring supported_versions.
    pub fn max_version(&self) -> u16 {
        super::grease::filter_grease_u16(&self.supported_versions)
            .into_iter()
            .max()
            .unwrap_or(self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_header_fields() {
        let header = RecordHeader::parse(&[0x16, 0x03, 0x01, 0x02, 0x00]);
        assert_eq!(header.content_type, CONTENT_TYPE_HANDSHAKE);
        assert_eq!(header.version, 0x0301);
        assert_eq!(header.length, 512);
        assert!(header.looks_like_handshake());

        // "GET /"
        let header = RecordHeader::parse(b"GET /");
        assert!(!header.looks_like_handshake());

        // Handshake content type but an SSLv2-style version
        let header = RecordHeader::parse(&[0x16, 0x02, 0x00, 0x00, 0x10]);
        assert!(!header.looks_like_handshake());
    }

    #[test]
    fn host_defaults_to_empty() {
        let mut hello = ClientHelloMsg::default();
        assert_eq!(hello.host(), "");
        hello.server_name = Some("example.com".to_string());
        assert_eq!(hello.host(), "example.com");
    }

    #[test]
    fn max_version_skips_grease() {
        let mut hello = ClientHelloMsg {
            version: 0x0303,
            ..Default::default()
        };
        assert_eq!(hello.max_version(), 0x0303);

        hello.supported_versions = vec![0x3A3A, 0x0304, 0x0303];
        assert_eq!(hello.max_version(), 0x0304);
    }
}
