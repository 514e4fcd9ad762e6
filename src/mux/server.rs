//! Multiplexer coordinator
//!
//! Owns the single bound listener, the registered matcher groups and the
//! shutdown signal. `serve` accepts raw connections and spawns one
//! inspection task per connection; `close` trips the shared shutdown signal
//! that unblocks everything.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::common::{MuxError, Result};
use crate::listener::MuxListener;
use crate::matcher::{Matcher, MatcherKind, WriteMatcher};
use crate::stream::MuxStream;

use super::handler::inspect_connection;

/// Default bound for each sub-listener's connection queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Error policy function
///
/// Consulted on accept-loop errors and no-match conditions; returning
/// `false` stops the multiplexer.
pub(crate) type ErrorPolicy = dyn Fn(&MuxError) -> bool + Send + Sync;

/// One registered matcher group and the send side of its sub-listener queue
#[derive(Clone)]
pub(crate) struct MatchGroup {
    pub(crate) matchers: Vec<MatcherKind>,
    pub(crate) queue: mpsc::Sender<MuxStream>,
}

/// Connection multiplexer
///
/// Accepts raw connections from one bound `TcpListener` and routes each to
/// the first registered matcher group that recognizes its leading bytes.
/// Register groups with [`match_group`] / [`match_group_with_writers`]
/// before calling [`serve`]; registration order is priority order, highest
/// first.
///
/// [`match_group`]: Mux::match_group
/// [`match_group_with_writers`]: Mux::match_group_with_writers
/// [`serve`]: Mux::serve
pub struct Mux {
    root: TcpListener,
    local_addr: SocketAddr,
    groups: Vec<MatchGroup>,
    read_timeout: Option<Duration>,
    queue_capacity: usize,
    policy: Arc<ErrorPolicy>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Mux {
    /// Create a multiplexer over an already-bound listener.
    ///
    /// Socket creation and binding stay with the caller; the multiplexer
    /// takes ownership of the listener for its lifetime.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub fn new(root: TcpListener) -> Result<Self> {
        let local_addr = root.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            root,
            local_addr,
            groups: Vec::new(),
            read_timeout: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            policy: Arc::new(|_| true),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// The single bound address shared by every sub-listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a matcher group and return its sub-listener.
    ///
    /// Matchers are tried in the given order; groups are tried in
    /// registration order. Register the [`Any`] catch-all last if
    /// unrecognized connections should still be served.
    ///
    /// [`Any`]: crate::matcher::Any
    pub fn match_group(&mut self, matchers: Vec<Arc<dyn Matcher>>) -> MuxListener {
        self.register(matchers.into_iter().map(MatcherKind::Reader).collect())
    }

    /// Register a group of writer-matchers and return its sub-listener.
    ///
    /// See [`WriteMatcher`] for the side-effect caveat: probe bytes written
    /// to the peer are never rolled back.
    pub fn match_group_with_writers(&mut self, matchers: Vec<Arc<dyn WriteMatcher>>) -> MuxListener {
        self.register(matchers.into_iter().map(MatcherKind::Writer).collect())
    }

    fn register(&mut self, matchers: Vec<MatcherKind>) -> MuxListener {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.groups.push(MatchGroup {
            matchers,
            queue: tx,
        });
        debug!("registered matcher group {} on {}", self.groups.len() - 1, self.local_addr);
        MuxListener::new(rx, self.local_addr, self.shutdown_rx.clone())
    }

    /// Bound the time a connection may spend in the inspection phase.
    ///
    /// The deadline covers source reads only; matchers replaying already
    /// buffered bytes (and the zero-read catch-all) are unaffected. Expiry
    /// surfaces to the active matcher as an ordinary `TimedOut` read error,
    /// so the connection falls through to the no-match path rather than to a
    /// distinct failure path.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = Some(timeout);
    }

    /// Set the queue bound for sub-listeners registered after this call.
    pub fn set_queue_capacity(&mut self, capacity: usize) {
        self.queue_capacity = capacity.max(1);
    }

    /// Install the error policy.
    ///
    /// The policy sees every accept-loop error and every no-match condition;
    /// returning `false` makes `serve` stop with that error. The default
    /// policy always continues. [`MuxError::is_transient`] gives the same
    /// classification `serve` itself applies after the policy.
    pub fn handle_error<F>(&mut self, policy: F)
    where
        F: Fn(&MuxError) -> bool + Send + Sync + 'static,
    {
        self.policy = Arc::new(policy);
    }

    /// Serve connections until [`close`] is called or a fatal error occurs.
    ///
    /// Blocking loop: accepts from the root listener and spawns one
    /// inspection task per connection. Accept errors go through the error
    /// policy, then the transience test; either can stop the loop. A
    /// returned error means the multiplexer has fully stopped and every
    /// sub-listener now reports closure; returning `Ok(())` means `close`
    /// was called.
    ///
    /// [`close`]: Mux::close
    pub async fn serve(&self) -> Result<()> {
        if self.groups.is_empty() {
            warn!("serving on {} with no registered matcher groups; every connection will be dropped", self.local_addr);
        }

        // Inspection tasks report policy-escalated errors here; one is
        // enough to stop the loop.
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<MuxError>(1);
        let groups = Arc::new(self.groups.clone());
        let mut shutdown = self.shutdown_rx.clone();

        info!("multiplexer serving on {} ({} groups)", self.local_addr, groups.len());

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => {
                    info!("multiplexer on {} shut down", self.local_addr);
                    return Ok(());
                }
                Some(err) = fatal_rx.recv() => {
                    error!("multiplexer on {} stopping: {}", self.local_addr, err);
                    self.close();
                    return Err(err);
                }
                accepted = self.root.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted connection from {}", peer);
                        tokio::spawn(inspect_connection(
                            MuxStream::new(stream, Some(peer)),
                            Arc::clone(&groups),
                            self.read_timeout,
                            self.shutdown_rx.clone(),
                            Arc::clone(&self.policy),
                            fatal_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        let err = MuxError::Io(e);
                        if !(*self.policy)(&err) || !err.is_transient() {
                            error!("accept on {} failed: {}", self.local_addr, err);
                            self.close();
                            return Err(err);
                        }
                        warn!("transient accept error on {}: {}", self.local_addr, err);
                    }
                }
            }
        }
    }

    /// Shut the multiplexer down.
    ///
    /// Trips the shared shutdown signal: `serve` returns, every blocked
    /// sub-listener `accept` returns [`MuxError::ServerClosed`] promptly,
    /// and in-flight inspection tasks close their connection instead of
    /// enqueueing it. Idempotent and callable from any task.
    pub fn close(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!("multiplexer on {} closing", self.local_addr);
    }
}
