//! Connection multiplexer module
//!
//! This module implements the coordinator: the accept loop over the single
//! bound listener, priority matching across registered matcher groups, and
//! the timeout / error-policy / shutdown semantics that tie the whole
//! library together.

pub mod server;
mod handler;

pub use server::{Mux, DEFAULT_QUEUE_CAPACITY};
