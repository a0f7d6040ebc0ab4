//! TCP server: accept loop, handshake and per-connection reader/writer.

use std::future::Future;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{RawMessage, ResponseMessage};
use crate::connection::{ChannelResponseWriter, Connection};
use crate::service::CacheService;
use crate::session;

/// Bind the configured address and serve until a shutdown signal arrives.
pub async fn serve(service: Arc<CacheService>) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        service.config().server.host,
        service.config().server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Cache server listening on {}", listener.local_addr()?);

    let shutdown = shutdown_signal(service.shutdown_rx());
    serve_listener(listener, Arc::clone(&service), shutdown).await?;

    info!("Server shutdown complete");
    service.shutdown();
    Ok(())
}

/// Accept connections on `listener` until `shutdown` resolves.
///
/// Open connections are closed on shutdown and their handlers awaited.
pub async fn serve_listener<F>(
    listener: TcpListener,
    service: Arc<CacheService>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let server_token = CancellationToken::new();
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                tracing::debug!(%peer, "Accepted connection");
                let service = Arc::clone(&service);
                let token = server_token.child_token();
                connections.spawn(async move {
                    serve_connection(stream, service, token).await;
                    tracing::debug!(%peer, "Connection finished");
                });
            }
        }
    }

    tracing::info!(open = connections.len(), "Closing client connections");
    server_token.cancel();
    while connections.join_next().await.is_some() {}
    Ok(())
}

/// Serve one client connection over any byte stream.
///
/// The first frame must authenticate. Each later frame is dispatched as its
/// own task, at most `max_in_flight_requests` at a time; responses are
/// funneled through a single writer task. Once the peer stops sending (or a
/// frame cannot be decoded) reading ends, but responses of requests already
/// read are still written. Only a failed write or `token` cancellation drops
/// them.
pub async fn serve_connection<S>(stream: S, service: Arc<CacheService>, token: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let max_frame_length = service.config().server.max_frame_length;
    let (reader, writer) = tokio::io::split(stream);
    let mut frames = FramedRead::new(
        reader,
        JsonCodec::<RawMessage>::with_max_frame_length(max_frame_length),
    );
    let mut sink = FramedWrite::new(
        writer,
        JsonCodec::<ResponseMessage>::with_max_frame_length(max_frame_length),
    );

    let first = tokio::select! {
        _ = token.cancelled() => return,
        frame = frames.next() => frame,
    };
    let message = match first {
        Some(Ok(message)) => message,
        Some(Err(e)) => {
            tracing::info!(error = %e, "Malformed handshake frame");
            return;
        }
        None => return,
    };

    let handshake = match session::authenticate(service.realm(), &message, service.version()) {
        Ok(handshake) => handshake,
        Err(response) => {
            if let Err(e) = sink.send(response).await {
                tracing::debug!(error = %e, "Failed to send handshake rejection");
            }
            return;
        }
    };
    if let Err(e) = sink.send(handshake.response).await {
        tracing::debug!(error = %e, "Failed to send handshake response");
        return;
    }

    let (tx, mut rx) = mpsc::channel(service.config().server.response_queue_depth);
    let connection = Arc::new(Connection::with_token(
        handshake.caller,
        Arc::new(ChannelResponseWriter::new(tx)),
        token.child_token(),
    ));
    let connection_id = connection.id();
    tracing::info!(
        %connection_id,
        principal = connection.caller().principal(),
        "Client connected"
    );

    let closed = connection.closed_token();
    let writer_task = tokio::spawn(async move {
        loop {
            let response = tokio::select! {
                _ = closed.cancelled() => break,
                response = rx.recv() => match response {
                    Some(response) => response,
                    None => break,
                },
            };
            if let Err(e) = sink.send(response).await {
                tracing::debug!(%connection_id, error = %e, "Write failed, closing connection");
                closed.cancel();
                break;
            }
        }
    });

    let in_flight = Arc::new(Semaphore::new(service.config().server.max_in_flight_requests));
    let closed = connection.closed_token();
    loop {
        let permit = tokio::select! {
            _ = closed.cancelled() => break,
            permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = frames.next() => frame,
        };
        match frame {
            Some(Ok(message)) => {
                service
                    .dispatcher()
                    .dispatch_with_permit(message, Arc::clone(&connection), permit);
            }
            Some(Err(e)) => {
                tracing::warn!(%connection_id, error = %e, "Undecodable frame, no further requests read");
                break;
            }
            None => {
                tracing::debug!(%connection_id, "Client finished sending");
                break;
            }
        }
    }

    // In-flight tasks keep the connection alive; the writer stops once the
    // last of them has responded.
    drop(frames);
    drop(connection);
    if let Err(e) = writer_task.await {
        tracing::warn!(%connection_id, error = %e, "Connection writer task failed");
    }
    tracing::info!(%connection_id, "Client disconnected");
}

/// Wait for SIGINT, SIGTERM, or an explicit shutdown request.
async fn shutdown_signal(mut shutdown_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let explicit_shutdown = async {
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = explicit_shutdown => {
            info!("Shutdown requested, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{FailureKind, MessageType};
    use crate::config::{CacheConfig, CacheletConfig};
    use serde_json::json;
    use tokio::io::DuplexStream;

    type ClientFrames = (
        FramedWrite<tokio::io::WriteHalf<DuplexStream>, JsonCodec<RawMessage>>,
        FramedRead<tokio::io::ReadHalf<DuplexStream>, JsonCodec<ResponseMessage>>,
    );

    fn service() -> Arc<CacheService> {
        let config = CacheletConfig {
            caches: vec![CacheConfig::new("orders")],
            ..CacheletConfig::default()
        };
        Arc::new(CacheService::from_config(config).unwrap())
    }

    fn limited_service(max_in_flight_requests: usize, response_queue_depth: usize) -> Arc<CacheService> {
        let mut config = CacheletConfig {
            caches: vec![CacheConfig::new("orders")],
            ..CacheletConfig::default()
        };
        config.server.max_in_flight_requests = max_in_flight_requests;
        config.server.response_queue_depth = response_queue_depth;
        Arc::new(CacheService::from_config(config).unwrap())
    }

    fn put(id: u64, key: &str) -> RawMessage {
        RawMessage::new(
            id,
            MessageType::from_static("cache.put"),
            json!({"name": "orders", "key": crate::Data::from(key), "value": "dg=="}),
        )
    }

    async fn drain(rx: &mut FramedRead<tokio::io::ReadHalf<DuplexStream>, JsonCodec<ResponseMessage>>) -> Vec<ResponseMessage> {
        let mut responses = Vec::new();
        while let Some(frame) = rx.next().await {
            responses.push(frame.unwrap());
        }
        responses
    }

    fn connect(service: Arc<CacheService>, token: CancellationToken) -> (ClientFrames, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(serve_connection(server, service, token));
        let (read, write) = tokio::io::split(client);
        let frames = (
            FramedWrite::new(write, JsonCodec::<RawMessage>::new()),
            FramedRead::new(read, JsonCodec::<ResponseMessage>::new()),
        );
        (frames, handle)
    }

    fn authenticate() -> RawMessage {
        RawMessage::new(
            1,
            MessageType::AUTHENTICATE,
            json!({"username": "dev", "password": ""}),
        )
    }

    #[tokio::test]
    async fn put_then_get_over_stream() {
        let ((mut tx, mut rx), handle) = connect(service(), CancellationToken::new());

        tx.send(authenticate()).await.unwrap();
        assert!(rx.next().await.unwrap().unwrap().is_ok());

        tx.send(RawMessage::new(
            2,
            MessageType::from_static("cache.put"),
            json!({"name": "orders", "key": "aw==", "value": "dg=="}),
        ))
        .await
        .unwrap();
        let put = rx.next().await.unwrap().unwrap();
        assert_eq!(put.correlation_id, 2);
        assert!(put.is_ok());

        tx.send(RawMessage::new(
            3,
            MessageType::from_static("cache.get"),
            json!({"name": "orders", "key": "aw=="}),
        ))
        .await
        .unwrap();
        let get = rx.next().await.unwrap().unwrap();
        assert_eq!(get.correlation_id, 3);
        assert_eq!(get, ResponseMessage::ok(3, json!("dg==")));

        tx.close().await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn half_close_still_receives_every_response() {
        let ((mut tx, mut rx), handle) = connect(service(), CancellationToken::new());
        tx.send(authenticate()).await.unwrap();
        assert!(rx.next().await.unwrap().unwrap().is_ok());

        for id in 2..52 {
            tx.send(put(id, &format!("k{id}"))).await.unwrap();
        }
        tx.close().await.unwrap();

        let responses = drain(&mut rx).await;
        handle.await.unwrap();
        assert_eq!(responses.len(), 50);
        assert!(responses.iter().all(ResponseMessage::is_ok));
        let mut ids: Vec<u64> = responses.iter().map(|r| r.correlation_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (2..52).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn in_flight_limit_still_serves_pipelined_requests() {
        let ((mut tx, mut rx), handle) =
            connect(limited_service(1, 1), CancellationToken::new());
        tx.send(authenticate()).await.unwrap();
        assert!(rx.next().await.unwrap().unwrap().is_ok());

        for id in 2..22 {
            tx.send(put(id, "same")).await.unwrap();
        }
        tx.close().await.unwrap();

        let responses = drain(&mut rx).await;
        handle.await.unwrap();
        // One request at a time: responses come back in request order.
        let ids: Vec<u64> = responses.iter().map(|r| r.correlation_id).collect();
        assert_eq!(ids, (2..22).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn first_frame_must_authenticate() {
        let ((mut tx, mut rx), handle) = connect(service(), CancellationToken::new());

        tx.send(RawMessage::new(
            5,
            MessageType::from_static("cache.size"),
            json!({"name": "orders"}),
        ))
        .await
        .unwrap();
        let response = rx.next().await.unwrap().unwrap();
        assert_eq!(response.failure_kind(), Some(FailureKind::PermissionDenied));

        handle.await.unwrap();
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_closes_connection() {
        let token = CancellationToken::new();
        let ((mut tx, mut rx), handle) = connect(service(), token.clone());

        tx.send(authenticate()).await.unwrap();
        assert!(rx.next().await.unwrap().unwrap().is_ok());

        token.cancel();
        handle.await.unwrap();
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn listener_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = service();
        let mut shutdown_rx = service.shutdown_rx();
        let server = tokio::spawn(serve_listener(listener, Arc::clone(&service), async move {
            let _ = shutdown_rx.changed().await;
        }));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        let mut tx = FramedWrite::new(write, JsonCodec::<RawMessage>::new());
        let mut rx = FramedRead::new(read, JsonCodec::<ResponseMessage>::new());
        tx.send(authenticate()).await.unwrap();
        assert!(rx.next().await.unwrap().unwrap().is_ok());

        service.trigger_shutdown();
        server.await.unwrap().unwrap();
        assert!(rx.next().await.is_none());
    }
}
