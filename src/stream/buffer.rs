//! Replay buffer implementation
//!
//! Records every byte read from a connection while matchers are inspecting it
//! and replays those bytes, exactly once and in order, to whichever consumer
//! ultimately owns the connection. This is the correctness core of the
//! multiplexer: the union of replayed bytes and subsequent direct reads must
//! equal the original byte stream with nothing lost, duplicated or reordered.
//!
//! The buffer is a sans-I/O state machine; the wrapped connection in the
//! parent module drives it from its `AsyncRead` implementation.

use bytes::BytesMut;
use std::io;
use tokio::io::ReadBuf;

/// Replay buffer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferState {
    /// Matchers are inspecting: reads replay the store first, then fall
    /// through to the source, recording whatever the source produces.
    Sniffing,
    /// A matcher won: replay the store to the owning consumer before any
    /// direct source read.
    Draining,
    /// The store is spent; reads delegate straight to the source.
    Passthrough,
}

/// Terminal condition observed from the source while sniffing.
///
/// `io::Error` is not `Clone`, so errors are remembered by kind and message
/// and reconstructed when finally surfaced.
#[derive(Debug)]
pub(crate) enum Terminal {
    Eof,
    Error { kind: io::ErrorKind, message: String },
}

impl Terminal {
    fn surface(self) -> io::Result<()> {
        match self {
            Terminal::Eof => Ok(()),
            Terminal::Error { kind, message } => Err(io::Error::new(kind, message)),
        }
    }
}

/// Replay buffer for one wrapped connection
#[derive(Debug)]
pub(crate) struct ReplayBuffer {
    /// Bytes seen from the source so far
    store: BytesMut,
    /// How much of the store has been re-delivered to the current reader
    cursor: usize,
    state: BufferState,
    /// End-of-stream or error seen from the source, held back until the
    /// store has been fully replayed
    terminal: Option<Terminal>,
}

impl ReplayBuffer {
    pub(crate) fn new() -> Self {
        Self {
            store: BytesMut::new(),
            cursor: 0,
            state: BufferState::Passthrough,
            terminal: None,
        }
    }

    pub(crate) fn state(&self) -> BufferState {
        self.state
    }

    /// Rewind for the next matcher: every matcher sees the connection's byte
    /// stream from the very beginning, including bytes earlier matchers
    /// already consumed.
    pub(crate) fn begin_sniff(&mut self) {
        self.state = BufferState::Sniffing;
        self.cursor = 0;
    }

    /// A matcher won; switch from recording to draining. Called exactly once
    /// per connection.
    pub(crate) fn end_sniff(&mut self) {
        self.cursor = 0;
        if self.store.is_empty() {
            self.state = BufferState::Passthrough;
        } else {
            self.state = BufferState::Draining;
        }
    }

    /// Copy buffered bytes into `buf` and advance the cursor.
    ///
    /// Returns `true` if the cursor still trailed the store, meaning the
    /// read is satisfied from the buffer and the source must not be touched.
    pub(crate) fn replay_into(&mut self, buf: &mut ReadBuf<'_>) -> bool {
        if self.cursor >= self.store.len() {
            return false;
        }
        let n = std::cmp::min(buf.remaining(), self.store.len() - self.cursor);
        buf.put_slice(&self.store[self.cursor..self.cursor + n]);
        self.cursor += n;
        true
    }

    /// Record bytes freshly read from the source while sniffing. The cursor
    /// tracks the store end: the active matcher has seen these bytes.
    pub(crate) fn record(&mut self, chunk: &[u8]) {
        debug_assert_eq!(self.state, BufferState::Sniffing);
        debug_assert_eq!(self.cursor, self.store.len());
        self.store.extend_from_slice(chunk);
        self.cursor = self.store.len();
    }

    /// Remember end-of-stream seen from the source.
    pub(crate) fn set_eof(&mut self) {
        if self.terminal.is_none() {
            self.terminal = Some(Terminal::Eof);
        }
    }

    /// Remember a read error seen from the source.
    pub(crate) fn set_error(&mut self, err: &io::Error) {
        if self.terminal.is_none() {
            self.terminal = Some(Terminal::Error {
                kind: err.kind(),
                message: err.to_string(),
            });
        }
    }

    /// The store has been fully replayed while draining: release it,
    /// collapse to passthrough and surface the remembered terminal
    /// condition, if any. `None` means the caller should now read the
    /// source directly.
    pub(crate) fn finish_drain(&mut self) -> Option<io::Result<()>> {
        debug_assert_eq!(self.state, BufferState::Draining);
        self.state = BufferState::Passthrough;
        self.store = BytesMut::new();
        self.cursor = 0;
        self.terminal.take().map(Terminal::surface)
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(buffer: &mut ReplayBuffer, n: usize) -> Vec<u8> {
        let mut backing = vec![0u8; n];
        let mut buf = ReadBuf::new(&mut backing);
        assert!(buffer.replay_into(&mut buf));
        buf.filled().to_vec()
    }

    #[test]
    fn test_sniff_records_and_rewinds() {
        let mut buffer = ReplayBuffer::new();
        buffer.begin_sniff();

        // First matcher: nothing buffered yet, source reads get recorded
        let mut backing = vec![0u8; 8];
        let mut buf = ReadBuf::new(&mut backing);
        assert!(!buffer.replay_into(&mut buf));
        buffer.record(b"hello");

        // Second matcher starts over and replays the same bytes
        buffer.begin_sniff();
        assert_eq!(read_all(&mut buffer, 5), b"hello");

        // Cursor caught up, next read would hit the source again
        let mut backing = vec![0u8; 8];
        let mut buf = ReadBuf::new(&mut backing);
        assert!(!buffer.replay_into(&mut buf));
        buffer.record(b" world");
        assert_eq!(buffer.buffered(), 11);
    }

    #[test]
    fn test_drain_replays_exactly_once() {
        let mut buffer = ReplayBuffer::new();
        buffer.begin_sniff();

        let mut backing = vec![0u8; 16];
        let mut buf = ReadBuf::new(&mut backing);
        assert!(!buffer.replay_into(&mut buf));
        buffer.record(b"hello world");

        buffer.end_sniff();
        assert_eq!(buffer.state(), BufferState::Draining);

        // Replay in two chunks, then collapse to passthrough
        assert_eq!(read_all(&mut buffer, 6), b"hello ");
        assert_eq!(read_all(&mut buffer, 6), b"world");

        let mut backing = vec![0u8; 4];
        let mut buf = ReadBuf::new(&mut backing);
        assert!(!buffer.replay_into(&mut buf));
        assert!(buffer.finish_drain().is_none());
        assert_eq!(buffer.state(), BufferState::Passthrough);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_terminal_held_back_until_drained() {
        let mut buffer = ReplayBuffer::new();
        buffer.begin_sniff();

        let mut backing = vec![0u8; 4];
        let mut buf = ReadBuf::new(&mut backing);
        assert!(!buffer.replay_into(&mut buf));
        buffer.record(b"data");
        // Source hit end-of-stream while a matcher was still probing
        buffer.set_eof();

        buffer.end_sniff();

        // Buffered bytes must come out before the remembered EOF
        assert_eq!(read_all(&mut buffer, 4), b"data");
        assert!(buffer.finish_drain().expect("terminal remembered").is_ok());
        assert_eq!(buffer.state(), BufferState::Passthrough);
    }

    #[test]
    fn test_terminal_error_resurfaces() {
        let mut buffer = ReplayBuffer::new();
        buffer.begin_sniff();

        let mut backing = vec![0u8; 2];
        let mut buf = ReadBuf::new(&mut backing);
        assert!(!buffer.replay_into(&mut buf));
        buffer.record(b"ab");
        buffer.set_error(&io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));

        buffer.end_sniff();
        assert_eq!(read_all(&mut buffer, 2), b"ab");

        let err = buffer
            .finish_drain()
            .expect("terminal remembered")
            .expect_err("error should resurface");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_end_sniff_without_bytes_is_passthrough() {
        let mut buffer = ReplayBuffer::new();
        buffer.begin_sniff();
        buffer.end_sniff();
        assert_eq!(buffer.state(), BufferState::Passthrough);
    }

    #[test]
    fn test_first_terminal_wins() {
        let mut buffer = ReplayBuffer::new();
        buffer.begin_sniff();

        let mut backing = vec![0u8; 1];
        let mut buf = ReadBuf::new(&mut backing);
        assert!(!buffer.replay_into(&mut buf));
        buffer.record(b"x");
        buffer.set_eof();
        // A later error must not displace the already-remembered EOF
        buffer.set_error(&io::Error::new(io::ErrorKind::Other, "late"));

        buffer.end_sniff();
        assert_eq!(read_all(&mut buffer, 1), b"x");
        assert!(buffer.finish_drain().expect("terminal remembered").is_ok());
    }
}
