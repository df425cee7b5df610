use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

/// A stream wrapper that records what it reads so it can be read again.
///
/// While recording, every byte pulled from the inner stream is appended to an
/// internal buffer before it reaches the caller. Reads are always served from
/// captured-but-not-yet-replayed bytes first, so after [`rewind`] a second
/// consumer sees exactly the byte sequence the first one saw, followed by live
/// data, regardless of how either of them sized its reads.
///
/// Writes pass straight through.
///
/// [`rewind`]: ReplayStream::rewind
pub struct ReplayStream<S> {
    inner: S,
    buffer: BytesMut,
    cursor: usize,
    recording: bool,
}

impl<S> ReplayStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            cursor: 0,
            recording: true,
        }
    }

    /// Move the read position back to the first captured byte.
    pub fn rewind(&mut self) {
        trace!(captured = self.buffer.len(), "rewinding replay buffer");
        self.cursor = 0;
    }

    /// Stop capturing fresh reads. The buffer is released once replayed.
    pub fn stop_recording(&mut self) {
        self.recording = false;
        self.release_if_drained();
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Every byte captured so far, replayed or not.
    pub fn captured(&self) -> &[u8] {
        &self.buffer
    }

    pub fn captured_len(&self) -> usize {
        self.buffer.len()
    }

    /// Captured bytes the next reads will return before touching the inner stream.
    pub fn unreplayed(&self) -> &[u8] {
        &self.buffer[self.cursor..]
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Reading from the inner stream directly bypasses the capture.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Split into the inner stream and the bytes that were not yet replayed.
    pub fn into_parts(mut self) -> (S, Bytes) {
        let pending = self.buffer.split_off(self.cursor).freeze();
        (self.inner, pending)
    }

    fn release_if_drained(&mut self) {
        if !self.recording && self.cursor == self.buffer.len() && !self.buffer.is_empty() {
            trace!(released = self.buffer.len(), "replay buffer drained");
            self.buffer = BytesMut::new();
            self.cursor = 0;
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReplayStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.cursor < this.buffer.len() {
            let available = &this.buffer[this.cursor..];
            let to_copy = available.len().min(buf.remaining());
            buf.put_slice(&available[..to_copy]);
            this.cursor += to_copy;
            this.release_if_drained();
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if this.recording {
            this.buffer.extend_from_slice(&buf.filled()[before..]);
            this.cursor = this.buffer.len();
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReplayStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
