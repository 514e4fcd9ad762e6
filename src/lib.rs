//! SockMux: one bound listener, many protocol servers
//!
//! This library lets several independent protocol servers (TLS, HTTP/1,
//! HTTP/2, RPC, custom wire protocols) share a single bound TCP socket. One
//! process accepts raw connections and, for each one, non-destructively
//! inspects the first bytes to decide which registered protocol handler
//! should own it, then hands the connection off unmodified: every byte
//! consumed during inspection is replayed to the owner first, in order,
//! before any new network read.
//!
//! # Main features
//!
//! - Replay-capable sniffing: no byte is ever lost, duplicated or reordered
//! - Deterministic priority: matcher groups are tried in registration order
//! - Listener-shaped sub-listeners: protocol servers just call `accept`
//! - Inspection read timeout, pluggable error policy, graceful shutdown
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sockmux::{Any, Mux, Result};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let root = TcpListener::bind("127.0.0.1:8080").await?;
//!     let mut mux = Mux::new(root)?;
//!     mux.set_read_timeout(Duration::from_millis(200));
//!
//!     // Register protocol-specific groups first, the catch-all last.
//!     // Content matchers are supplied by the embedder.
//!     let mut rest = mux.match_group(vec![Arc::new(Any)]);
//!
//!     tokio::spawn(async move {
//!         while let Ok(conn) = rest.accept().await {
//!             // Hand `conn` to the protocol server; it reads the stream
//!             // exactly as if it had accepted it directly.
//!             drop(conn);
//!         }
//!     });
//!
//!     mux.serve().await
//! }
//! ```

// Public modules
pub mod common;
pub mod listener;
pub mod matcher;
pub mod mux;
pub mod stream;

// Re-export commonly used structures and functions for convenience
pub use common::{init_logger, MuxError, Result};
pub use listener::MuxListener;
pub use matcher::{Any, Matcher, WriteMatcher};
pub use mux::Mux;
pub use stream::{MuxStream, SniffIo, SniffReader};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
