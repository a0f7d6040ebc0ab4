//! Client connection handle shared by the tasks of one connection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::{ConnectionId, ResponseMessage};
use crate::security::CallerContext;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("connection closed")]
    Closed,
}

/// Sends encoded responses back on the originating connection.
#[async_trait]
pub trait ResponseWriter: Send + Sync {
    async fn write(&self, response: ResponseMessage) -> Result<(), WriteError>;
}

/// Writer that queues responses for the connection's writer task.
pub struct ChannelResponseWriter {
    tx: mpsc::Sender<ResponseMessage>,
}

impl ChannelResponseWriter {
    pub fn new(tx: mpsc::Sender<ResponseMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ResponseWriter for ChannelResponseWriter {
    async fn write(&self, response: ResponseMessage) -> Result<(), WriteError> {
        self.tx.send(response).await.map_err(|_| WriteError::Closed)
    }
}

/// An authenticated client connection.
///
/// Closing the connection cancels its token; tasks still running complete
/// their operation but drop the response.
pub struct Connection {
    id: ConnectionId,
    caller: Arc<CallerContext>,
    writer: Arc<dyn ResponseWriter>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(caller: Arc<CallerContext>, writer: Arc<dyn ResponseWriter>) -> Self {
        Self::with_token(caller, writer, CancellationToken::new())
    }

    pub fn with_token(
        caller: Arc<CallerContext>,
        writer: Arc<dyn ResponseWriter>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            caller,
            writer,
            closed,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn caller(&self) -> &CallerContext {
        &self.caller
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Write `response` unless the connection has closed.
    ///
    /// Returns whether the response was handed to the writer. A closed
    /// connection is not an error.
    pub async fn send(&self, response: ResponseMessage) -> bool {
        if self.is_closed() {
            tracing::debug!(
                connection_id = %self.id,
                correlation_id = response.correlation_id,
                "Connection closed, dropping response"
            );
            return false;
        }
        match self.writer.write(response).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Failed to write response");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::FailureKind;

    #[tokio::test]
    async fn channel_writer_delivers() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Connection::new(
            Arc::new(CallerContext::unrestricted("dev")),
            Arc::new(ChannelResponseWriter::new(tx)),
        );

        assert!(conn.send(ResponseMessage::ok(1, serde_json::json!(true))).await);
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.correlation_id, 1);
    }

    #[tokio::test]
    async fn closed_connection_drops_response() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Connection::new(
            Arc::new(CallerContext::unrestricted("dev")),
            Arc::new(ChannelResponseWriter::new(tx)),
        );
        conn.close();

        let sent = conn
            .send(ResponseMessage::error(
                2,
                FailureKind::InternalFault,
                "x".into(),
            ))
            .await;
        assert!(!sent);
        drop(conn);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_is_write_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let writer = ChannelResponseWriter::new(tx);
        let result = writer.write(ResponseMessage::ok(3, serde_json::Value::Null)).await;
        assert_eq!(result, Err(WriteError::Closed));
    }
}
