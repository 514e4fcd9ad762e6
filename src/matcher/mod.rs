//! Matching protocol module
//!
//! This module defines how a candidate connection is inspected. A matcher is
//! a predicate over the connection's leading bytes; the coordinator invokes
//! the matchers of every registered group in priority order, and the first
//! one to return `true` wins the connection.
//!
//! Concrete content matchers (TLS client hello, HTTP/1 request line, HTTP/2
//! preface, RPC framing, ...) live with the embedder; the only matcher
//! shipped here is the conventional [`Any`] catch-all.

use std::sync::Arc;

use async_trait::async_trait;

use crate::stream::{MuxStream, SniffIo, SniffReader};

/// Predicate deciding whether a connection belongs to a protocol
///
/// Contract: a matcher may read zero or more bytes and must return a bool.
/// Every invocation observes the connection's byte stream from the very
/// beginning, including bytes earlier matchers already consumed. The
/// coordinator invokes a matcher at most once per connection. A read error
/// (including an inspection-deadline timeout, surfaced as
/// `io::ErrorKind::TimedOut`) should be treated as "no match", not as a
/// failure.
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Inspect the connection's leading bytes and decide.
    async fn matches(&self, reader: &mut SniffReader<'_>) -> bool;
}

/// A matcher that may also write to the raw connection before deciding
///
/// Needed by protocols that require an active probe (writing a greeting or
/// a settings frame) before the peer reveals itself.
///
/// Caveat: bytes written during the probe have already reached the peer and
/// are never rolled back, even if the connection subsequently matches a
/// different group or nothing at all. Only use a writer-matcher when every
/// protocol sharing the listener tolerates the probe.
#[async_trait]
pub trait WriteMatcher: Send + Sync {
    /// Inspect the connection, optionally writing a probe, and decide.
    async fn matches(&self, io: &mut SniffIo<'_>) -> bool;
}

/// The conventional catch-all matcher
///
/// Reads nothing and matches everything; register it last so unrecognized
/// connections have somewhere to go.
pub struct Any;

#[async_trait]
impl Matcher for Any {
    async fn matches(&self, _reader: &mut SniffReader<'_>) -> bool {
        true
    }
}

/// A registered matcher, tagged by capability
#[derive(Clone)]
pub(crate) enum MatcherKind {
    Reader(Arc<dyn Matcher>),
    Writer(Arc<dyn WriteMatcher>),
}

impl MatcherKind {
    /// Run the matcher against a connection under inspection, handing it the
    /// capability view its kind calls for.
    pub(crate) async fn claim(&self, stream: &mut MuxStream) -> bool {
        match self {
            MatcherKind::Reader(m) => m.matches(&mut SniffReader::new(stream)).await,
            MatcherKind::Writer(m) => m.matches(&mut SniffIo::new(stream)).await,
        }
    }
}
