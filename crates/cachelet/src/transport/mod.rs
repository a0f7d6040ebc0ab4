//! Client transport.
//!
//! Currently a TCP listener with length-prefixed JSON frames.

pub mod tcp;

pub use tcp::{serve, serve_connection, serve_listener};
