//! Client wire bridge.
//!
//! This module provides the frame types and the framing codec for client
//! connections.
//!
//! # Architecture
//!
//! - **protocol**: Frame types (RawMessage, ResponseMessage, FailureKind)
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
