use tracing::{debug, trace};

use crate::config::SniSelection;
use crate::error::DecodeError;
use crate::tls::grease::is_grease_u16;
use crate::tls::types::*;

/// Decode a complete ClientHello handshake message (4-byte header included).
///
/// Bytes past the declared body length belong to the next message and are
/// ignored. Any declared length that overruns the data is an error, never a
/// panic.
pub fn parse_client_hello(msg: &[u8]) -> Result<ClientHelloMsg, DecodeError> {
    parse_client_hello_with(msg, SniSelection::First)
}

pub fn parse_client_hello_with(
    msg: &[u8],
    sni: SniSelection,
) -> Result<ClientHelloMsg, DecodeError> {
    let mut reader = Reader::new(msg);
    let msg_type = reader.u8("handshake type")?;
    if msg_type != HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(DecodeError::UnexpectedMessage(msg_type));
    }
    let body = reader.u24_prefixed("handshake body")?;
    decode_body(body, sni)
}

/// Decode a ClientHello body, i.e. everything after the handshake header.
pub fn decode_body(body: &[u8], sni: SniSelection) -> Result<ClientHelloMsg, DecodeError> {
    let mut r = Reader::new(body);
    let mut hello = ClientHelloMsg {
        version: r.u16("client version")?,
        random: r.array("random")?,
        ..Default::default()
    };

    let session_id = r.u8_prefixed("session id")?;
    if session_id.len() > 32 {
        return Err(DecodeError::SessionIdTooLong(session_id.len()));
    }
    hello.session_id = session_id.to_vec();

    hello.cipher_suites = u16_list(r.u16_prefixed("cipher suites")?, "cipher suites")?;
    hello.compression_methods = r.u8_prefixed("compression methods")?.to_vec();

    // Pre-TLS 1.2 clients may omit the extension block entirely.
    if r.is_empty() {
        return Ok(hello);
    }

    let mut extensions = Reader::new(r.u16_prefixed("extensions")?);
    r.finish("ClientHello body")?;

    while !extensions.is_empty() {
        let ext_type = extensions.u16("extension type")?;
        let data = extensions.u16_prefixed("extension data")?;

        if is_interpreted(ext_type) && hello.extensions.contains(&ext_type) {
            return Err(DecodeError::DuplicateExtension(ext_type));
        }
        hello.extensions.push(ext_type);

        decode_extension(&mut hello, ext_type, data, sni)?;
    }

    Ok(hello)
}

/// Extensions whose contents end up in `ClientHelloMsg`. Anything else is
/// skipped by length and may repeat.
fn is_interpreted(ext_type: u16) -> bool {
    matches!(
        ext_type,
        EXT_SERVER_NAME
            | EXT_ALPN
            | EXT_SUPPORTED_VERSIONS
            | EXT_SUPPORTED_CURVES
            | EXT_SUPPORTED_POINTS
            | EXT_SIGNATURE_ALGORITHMS
            | EXT_STATUS_REQUEST
            | EXT_RENEGOTIATION_INFO
            | EXT_SESSION_TICKET
            | EXT_SCT
            | EXT_EXTENDED_MASTER_SECRET
            | EXT_NEXT_PROTO_NEG
    )
}

fn decode_extension(
    hello: &mut ClientHelloMsg,
    ext_type: u16,
    data: &[u8],
    sni: SniSelection,
) -> Result<(), DecodeError> {
    let mut ext = Reader::new(data);
    match ext_type {
        EXT_SERVER_NAME => {
            hello.server_name = decode_server_name(&mut ext, sni)?;
        }
        EXT_ALPN => {
            let mut list = Reader::new(ext.u16_prefixed("ALPN list")?);
            ext.finish("ALPN extension")?;
            if list.is_empty() {
                return Err(DecodeError::LengthMismatch("ALPN list"));
            }
            while !list.is_empty() {
                let proto = list.u8_prefixed("ALPN protocol")?;
                if proto.is_empty() {
                    return Err(DecodeError::EmptyAlpnProtocol);
                }
                hello
                    .alpn_protocols
                    .push(String::from_utf8_lossy(proto).into_owned());
            }
        }
        EXT_SUPPORTED_VERSIONS => {
            let versions = ext.u8_prefixed("supported versions")?;
            ext.finish("supported_versions extension")?;
            hello.supported_versions = non_empty(u16_list(versions, "supported versions")?)
                .ok_or(DecodeError::LengthMismatch("supported versions"))?;
        }
        EXT_SUPPORTED_CURVES => {
            let curves = ext.u16_prefixed("supported groups")?;
            ext.finish("supported_groups extension")?;
            hello.supported_curves = non_empty(u16_list(curves, "supported groups")?)
                .ok_or(DecodeError::LengthMismatch("supported groups"))?;
        }
        EXT_SUPPORTED_POINTS => {
            let points = ext.u8_prefixed("point formats")?;
            ext.finish("ec_point_formats extension")?;
            hello.supported_points = non_empty(points.to_vec())
                .ok_or(DecodeError::LengthMismatch("point formats"))?;
        }
        EXT_SIGNATURE_ALGORITHMS => {
            let algs = ext.u16_prefixed("signature algorithms")?;
            ext.finish("signature_algorithms extension")?;
            hello.signature_algorithms = non_empty(u16_list(algs, "signature algorithms")?)
                .ok_or(DecodeError::LengthMismatch("signature algorithms"))?;
        }
        EXT_STATUS_REQUEST => {
            let status_type = ext.u8("status type")?;
            ext.u16_prefixed("OCSP responder ids")?;
            ext.u16_prefixed("OCSP request extensions")?;
            ext.finish("status_request extension")?;
            hello.ocsp_stapling = status_type == 1;
        }
        EXT_RENEGOTIATION_INFO => {
            let info = ext.u8_prefixed("renegotiation info")?;
            ext.finish("renegotiation_info extension")?;
            hello.secure_renegotiation = Some(info.to_vec());
        }
        EXT_SESSION_TICKET => {
            hello.ticket_supported = true;
            hello.session_ticket = data.to_vec();
        }
        EXT_SCT => hello.scts = true,
        EXT_EXTENDED_MASTER_SECRET => hello.extended_master_secret = true,
        EXT_NEXT_PROTO_NEG => hello.next_proto_neg = true,
        other => {
            if is_grease_u16(other) {
                trace!("skipping GREASE extension 0x{:04x}", other);
            } else {
                trace!("skipping extension 0x{:04x} ({} bytes)", other, data.len());
            }
        }
    }
    Ok(())
}

fn decode_server_name(
    ext: &mut Reader<'_>,
    selection: SniSelection,
) -> Result<Option<String>, DecodeError> {
    let mut list = Reader::new(ext.u16_prefixed("server name list")?);
    ext.finish("server_name extension")?;

    let mut host = None;
    while !list.is_empty() {
        let name_type = list.u8("server name type")?;
        let name = list.u16_prefixed("server name")?;
        if name_type != 0 {
            continue;
        }
        if host.is_some() && selection == SniSelection::First {
            continue;
        }
        match std::str::from_utf8(name) {
            Ok(name) if !name.is_empty() => host = Some(name.to_string()),
            _ => debug!("ignoring unusable host_name entry ({} bytes)", name.len()),
        }
    }
    Ok(host)
}

fn u16_list(data: &[u8], field: &'static str) -> Result<Vec<u16>, DecodeError> {
    if data.len() % 2 != 0 {
        return Err(DecodeError::LengthMismatch(field));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Bounds-checked big-endian reader over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if n > self.data.len() {
            return Err(DecodeError::Short(field));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self, field: &'static str) -> Result<usize, DecodeError> {
        let b = self.take(3, field)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn u8_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = self.u8(field)? as usize;
        self.take(len, field)
    }

    fn u16_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = self.u16(field)? as usize;
        self.take(len, field)
    }

    fn u24_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = self.u24(field)?;
        self.take(len, field)
    }

    fn finish(&self, field: &'static str) -> Result<(), DecodeError> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::LengthMismatch(field))
        }
    }
}
