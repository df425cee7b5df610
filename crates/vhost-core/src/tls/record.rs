use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::error::{DecodeError, SniffError};
use crate::tls::types::*;

/// Pulls TLS records off a stream and reassembles handshake messages from them.
///
/// One logical message may be split across several records, and one record
/// may carry the tail of one message and the start of the next. Bytes past a
/// returned message stay in the accumulator for the following call.
pub struct HandshakeAssembler {
    pending: BytesMut,
    records: usize,
    consumed: usize,
    limit: usize,
}

impl HandshakeAssembler {
    /// `limit` caps the total bytes (record headers included) read from the peer.
    pub fn new(limit: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            records: 0,
            consumed: 0,
            limit,
        }
    }

    /// Number of records read so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Bytes read from the stream so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Handshake bytes buffered but not yet returned as a message.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Read one record.
    ///
    /// The first record must look like a TLS handshake; anything else is
    /// reported as [`SniffError::NotTls`] before the payload is touched, so a
    /// plaintext protocol is never misread as a length. Later non-handshake
    /// records are malformed.
    pub async fn read_record<R>(&mut self, reader: &mut R) -> Result<RawRecord, SniffError>
    where
        R: AsyncRead + Unpin,
    {
        let mut raw = [0u8; RECORD_HEADER_LEN];
        let n = read_full(reader, &mut raw).await?;
        self.consumed += n;

        if self.records == 0 && n > 0 && raw[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(SniffError::NotTls(raw[0]));
        }
        if n < RECORD_HEADER_LEN {
            return Err(SniffError::Truncated {
                received: self.consumed,
            });
        }

        let header = RecordHeader::parse(&raw);
        if !header.looks_like_handshake() {
            if self.records == 0 {
                return Err(SniffError::NotTls(header.content_type));
            }
            return Err(DecodeError::UnexpectedRecord(header.content_type).into());
        }
        if header.length == 0 {
            return Err(DecodeError::EmptyRecord.into());
        }
        if header.length > MAX_PLAINTEXT_LEN {
            return Err(DecodeError::RecordOverflow(header.length).into());
        }
        if self.consumed + header.length > self.limit {
            return Err(SniffError::ResourceLimit { limit: self.limit });
        }

        let mut payload = BytesMut::zeroed(header.length);
        let n = read_full(reader, &mut payload).await?;
        self.consumed += n;
        if n < header.length {
            return Err(SniffError::Truncated {
                received: self.consumed,
            });
        }

        self.records += 1;
        trace!(
            "record #{}: version 0x{:04x}, {} bytes",
            self.records,
            header.version,
            header.length
        );

        Ok(RawRecord {
            header,
            payload: payload.freeze(),
        })
    }

    /// Read records until one complete handshake message is buffered.
    pub async fn next_message<R>(&mut self, reader: &mut R) -> Result<HandshakeMessage, SniffError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(message) = self.take_message()? {
                debug!(
                    "assembled handshake message: {} bytes from {} record(s)",
                    message.as_bytes().len(),
                    self.records
                );
                return Ok(message);
            }
            let record = self.read_record(reader).await?;
            self.pending.extend_from_slice(&record.payload);
        }
    }

    fn take_message(&mut self) -> Result<Option<HandshakeMessage>, SniffError> {
        if self.pending.len() < HANDSHAKE_HEADER_LEN {
            return Ok(None);
        }

        let msg_type = self.pending[0];
        if msg_type != HANDSHAKE_TYPE_CLIENT_HELLO {
            return Err(DecodeError::UnexpectedMessage(msg_type).into());
        }

        let body_len = ((self.pending[1] as usize) << 16)
            | ((self.pending[2] as usize) << 8)
            | self.pending[3] as usize;
        let total = HANDSHAKE_HEADER_LEN + body_len;
        if total > self.limit {
            debug!(
                "peer announced a {} byte handshake message (limit {})",
                total, self.limit
            );
            return Err(SniffError::ResourceLimit { limit: self.limit });
        }
        if self.pending.len() < total {
            return Ok(None);
        }

        Ok(Some(HandshakeMessage::new(
            self.pending.split_to(total).freeze(),
        )))
    }
}

/// Fill `buf` unless the stream ends first. Returns how many bytes were read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
