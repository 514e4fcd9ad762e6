//! Wrapped connection module
//!
//! This module binds an accepted raw connection to its replay buffer. All
//! ordinary reads go through the buffer, so the protocol server that finally
//! owns the connection cannot tell that matchers already consumed leading
//! bytes: they are re-delivered first, in order, before any new network read.

mod buffer;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Sleep};

use buffer::{BufferState, ReplayBuffer};

/// Raw byte-stream abstraction
///
/// The wrapper owns the connection through a trait object so the rest of the
/// crate is independent of the concrete transport; tests drive it with
/// in-memory duplex pipes.
pub(crate) trait RawIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawIo for T {}

/// A connection accepted by the multiplexer
///
/// Handed to protocol servers by [`MuxListener::accept`]. Reads replay any
/// bytes consumed during protocol inspection before touching the network
/// again; writes go straight to the raw connection.
///
/// [`MuxListener::accept`]: crate::listener::MuxListener::accept
pub struct MuxStream {
    raw: Box<dyn RawIo>,
    buffer: ReplayBuffer,
    /// Peer address captured at accept time
    peer: Option<SocketAddr>,
    /// Deadline bounding source reads during the inspection phase
    deadline: Option<Pin<Box<Sleep>>>,
}

impl MuxStream {
    pub(crate) fn new<T>(raw: T, peer: Option<SocketAddr>) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            raw: Box::new(raw),
            buffer: ReplayBuffer::new(),
            peer,
            deadline: None,
        }
    }

    /// Peer address of the underlying connection, when known
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Bound the inspection phase: a source read that cannot complete before
    /// the deadline surfaces as `io::ErrorKind::TimedOut`, which matchers
    /// treat as "no match". Replay from the buffer is never delayed by this.
    pub(crate) fn set_read_deadline(&mut self, timeout: Duration) {
        self.deadline = Some(Box::pin(sleep(timeout)));
    }

    pub(crate) fn clear_read_deadline(&mut self) {
        self.deadline = None;
    }

    /// Rewind the replayed view so the next matcher inspects the stream from
    /// byte zero.
    pub(crate) fn start_inspection(&mut self) {
        self.buffer.begin_sniff();
    }

    /// A matcher claimed the connection: switch the buffer to draining and
    /// drop the inspection deadline. Called exactly once per connection.
    pub(crate) fn finish_inspection(&mut self) {
        self.buffer.end_sniff();
        self.clear_read_deadline();
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();

        // A zero-capacity read is legal and must not be mistaken for EOF.
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        match me.buffer.state() {
            BufferState::Sniffing => {
                if me.buffer.replay_into(buf) {
                    return Poll::Ready(Ok(()));
                }
                if let Some(deadline) = me.deadline.as_mut() {
                    if deadline.as_mut().poll(cx).is_ready() {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "read deadline elapsed during protocol inspection",
                        )));
                    }
                }
                let before = buf.filled().len();
                match Pin::new(&mut me.raw).poll_read(cx, buf) {
                    Poll::Ready(Ok(())) => {
                        if buf.filled().len() == before {
                            me.buffer.set_eof();
                        } else {
                            me.buffer.record(&buf.filled()[before..]);
                        }
                        Poll::Ready(Ok(()))
                    }
                    Poll::Ready(Err(e)) => {
                        me.buffer.set_error(&e);
                        Poll::Ready(Err(e))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
            BufferState::Draining => {
                if me.buffer.replay_into(buf) {
                    // Buffered bytes always come out first; a remembered
                    // terminal condition must never pre-empt them.
                    return Poll::Ready(Ok(()));
                }
                match me.buffer.finish_drain() {
                    Some(result) => Poll::Ready(result),
                    None => Pin::new(&mut me.raw).poll_read(cx, buf),
                }
            }
            BufferState::Passthrough => Pin::new(&mut me.raw).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().raw).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().raw).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().raw).poll_shutdown(cx)
    }
}

impl std::fmt::Debug for MuxStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxStream").field("peer", &self.peer).finish()
    }
}

/// Read capability handed to a [`Matcher`]
///
/// Replays the connection's leading bytes from the very beginning on every
/// matcher invocation.
///
/// [`Matcher`]: crate::matcher::Matcher
pub struct SniffReader<'a> {
    stream: &'a mut MuxStream,
}

impl<'a> SniffReader<'a> {
    pub(crate) fn new(stream: &'a mut MuxStream) -> Self {
        Self { stream }
    }
}

impl AsyncRead for SniffReader<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().stream).poll_read(cx, buf)
    }
}

/// Read and write capability handed to a [`WriteMatcher`]
///
/// Reads are replayed like [`SniffReader`]; writes go straight to the raw
/// connection so a matcher can send an active probe before deciding.
///
/// [`WriteMatcher`]: crate::matcher::WriteMatcher
pub struct SniffIo<'a> {
    stream: &'a mut MuxStream,
}

impl<'a> SniffIo<'a> {
    pub(crate) fn new(stream: &'a mut MuxStream) -> Self {
        Self { stream }
    }
}

impl AsyncRead for SniffIo<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SniffIo<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream.raw).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream.raw).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream.raw).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn wrapped_pair() -> (MuxStream, tokio::io::DuplexStream) {
        let (near, far) = tokio::io::duplex(64);
        (MuxStream::new(near, None), far)
    }

    #[tokio::test]
    async fn test_sniffed_bytes_are_replayed_to_owner() {
        let (mut conn, mut peer) = wrapped_pair();

        peer.write_all(b"hello world\r\n").await.unwrap();

        // A matcher reads part of the stream and declines
        conn.start_inspection();
        let mut probe = [0u8; 5];
        conn.read_exact(&mut probe).await.unwrap();
        assert_eq!(&probe, b"hello");

        // The next matcher sees the stream from byte zero again
        conn.start_inspection();
        let mut probe = [0u8; 11];
        conn.read_exact(&mut probe).await.unwrap();
        assert_eq!(&probe, b"hello world");

        // Hand-off: the owner reads the entire original sequence
        conn.finish_inspection();
        let mut line = [0u8; 13];
        conn.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"hello world\r\n");

        // New bytes keep flowing after the buffer collapses
        peer.write_all(b"more").await.unwrap();
        let mut more = [0u8; 4];
        conn.read_exact(&mut more).await.unwrap();
        assert_eq!(&more, b"more");
    }

    #[tokio::test]
    async fn test_eof_held_back_until_replay_completes() {
        let (mut conn, mut peer) = wrapped_pair();

        peer.write_all(b"short").await.unwrap();
        peer.shutdown().await.unwrap();
        drop(peer);

        // Matcher reads everything, including the EOF
        conn.start_inspection();
        let mut seen = Vec::new();
        conn.read_to_end(&mut seen).await.unwrap();
        assert_eq!(seen, b"short");

        // Owner still gets all five bytes before end-of-stream
        conn.finish_inspection();
        let mut replayed = Vec::new();
        conn.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, b"short");
    }

    #[tokio::test]
    async fn test_deadline_surfaces_as_timed_out() {
        let (mut conn, mut peer) = wrapped_pair();

        conn.set_read_deadline(Duration::from_millis(20));
        conn.start_inspection();

        let mut probe = [0u8; 1];
        let err = conn.read_exact(&mut probe).await.expect_err("no data sent");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        // Bytes arriving after the timeout still reach the owner untouched
        peer.write_all(b"late").await.unwrap();
        conn.finish_inspection();
        let mut late = [0u8; 4];
        conn.read_exact(&mut late).await.unwrap();
        assert_eq!(&late, b"late");
    }

    #[tokio::test]
    async fn test_zero_read_matcher_never_touches_source() {
        let (mut conn, mut peer) = wrapped_pair();

        // No data available, deadline armed: a matcher that reads nothing
        // must still be able to claim the connection immediately.
        conn.set_read_deadline(Duration::from_millis(10));
        conn.start_inspection();
        conn.finish_inspection();

        peer.write_all(b"pay").await.unwrap();
        let mut body = [0u8; 3];
        conn.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"pay");
    }

    #[tokio::test]
    async fn test_writer_view_reaches_peer() {
        let (mut conn, mut peer) = wrapped_pair();

        peer.write_all(b"ping").await.unwrap();

        conn.start_inspection();
        let mut io = SniffIo::new(&mut conn);
        let mut probe = [0u8; 4];
        io.read_exact(&mut probe).await.unwrap();
        assert_eq!(&probe, b"ping");
        io.write_all(b"pong").await.unwrap();

        let mut reply = [0u8; 4];
        peer.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
    }
}
