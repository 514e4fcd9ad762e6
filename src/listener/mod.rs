//! Sub-listener module
//!
//! Each registered matcher group gets one sub-listener: a bounded queue of
//! matched connections exposed with listener-shaped semantics, so a protocol
//! server can call `accept` on it exactly as it would on a directly-bound
//! `TcpListener`.

use std::net::SocketAddr;

use log::debug;
use tokio::sync::{mpsc, watch};

use crate::common::{MuxError, Result};
use crate::stream::MuxStream;

/// Listener for one matcher group
///
/// Obtained from [`Mux::match_group`] / [`Mux::match_group_with_writers`].
/// All sub-listeners of one multiplexer report the same local address, since
/// they share a single bound socket.
///
/// [`Mux::match_group`]: crate::mux::Mux::match_group
/// [`Mux::match_group_with_writers`]: crate::mux::Mux::match_group_with_writers
pub struct MuxListener {
    queue: mpsc::Receiver<MuxStream>,
    addr: SocketAddr,
    shutdown: watch::Receiver<bool>,
    closed: bool,
}

impl MuxListener {
    pub(crate) fn new(
        queue: mpsc::Receiver<MuxStream>,
        addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            addr,
            shutdown,
            closed: false,
        }
    }

    /// Wait for the next connection matched to this group.
    ///
    /// A connection already sitting in the queue is delivered even when the
    /// multiplexer is concurrently shutting down. Returns
    /// [`MuxError::ListenerClosed`] once this listener's queue is closed and
    /// drained, and [`MuxError::ServerClosed`] if the multiplexer shut down
    /// while the call was waiting.
    pub async fn accept(&mut self) -> Result<MuxStream> {
        if self.closed {
            return Err(MuxError::ListenerClosed);
        }
        tokio::select! {
            biased;
            conn = self.queue.recv() => conn.ok_or(MuxError::ListenerClosed),
            _ = self.shutdown.wait_for(|closed| *closed) => Err(MuxError::ServerClosed),
        }
    }

    /// Close this sub-listener.
    ///
    /// Idempotent: the first call closes the queue and synchronously drops
    /// (closing) every connection still sitting in it; later calls are
    /// no-ops. The rest of the multiplexer keeps serving.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.queue.close();

        let mut dropped = 0usize;
        while let Ok(conn) = self.queue.try_recv() {
            drop(conn);
            dropped += 1;
        }
        if dropped > 0 {
            debug!("closed sub-listener on {}, dropped {} queued connections", self.addr, dropped);
        }
    }

    /// The multiplexer's single bound address, shared by every sub-listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for MuxListener {
    fn drop(&mut self) {
        self.close();
    }
}
