//! WebSocket connection handler
//!
//! Each connection runs two loops: a reader that hands every text frame to the
//! router on its own task, and a writer that drains the outbound queue and
//! keeps the peer alive with pings. Either loop ending tears down the other.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use super::hub::{ConnectionHandle, ConnectionId, Frame, HubHandle};
use super::router::Router;
use crate::config::ConnectionConfig;

/// Serve one upgraded socket until it closes or fails
pub async fn handle_connection(
    socket: WebSocket,
    hub: HubHandle,
    router: Arc<Router>,
    config: ConnectionConfig,
) {
    let id = hub.next_connection_id();
    let (tx, rx) = mpsc::channel(config.outbound_capacity.max(1));
    hub.register(ConnectionHandle { id, tx });
    tracing::info!(connection = id, "Client connected");

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(
        id,
        sink,
        rx,
        config.ping_period(),
        config.write_wait(),
    ));
    let abort = writer.abort_handle();

    let writer_done = tokio::select! {
        _ = read_loop(id, &mut stream, &router, config.pong_wait()) => false,
        _ = &mut writer => true,
    };

    // Closing the queue tells the writer to send a close frame and stop
    hub.unregister(id);
    if !writer_done && time::timeout(config.write_wait(), writer).await.is_err() {
        abort.abort();
    }

    tracing::info!(connection = id, "Client disconnected");
}

async fn read_loop(
    id: ConnectionId,
    stream: &mut SplitStream<WebSocket>,
    router: &Arc<Router>,
    pong_wait: Duration,
) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let message = match time::timeout_at(deadline, stream.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection = id, "Read failed: {}", e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::info!(connection = id, "No pong within {:?}; dropping client", pong_wait);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let router = Arc::clone(router);
                tokio::spawn(async move {
                    router.dispatch(id, text.as_str()).await;
                });
            }
            Message::Pong(_) => deadline = Instant::now() + pong_wait,
            Message::Close(_) => break,
            // Pings are answered by the socket itself
            Message::Ping(_) | Message::Binary(_) => {}
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
    ping_period: Duration,
    write_wait: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    let message = Message::Text(frame.to_string().into());
                    if !write(id, &mut sink, message, write_wait).await {
                        break;
                    }
                }
                None => {
                    write(id, &mut sink, Message::Close(None), write_wait).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !write(id, &mut sink, Message::Ping(Default::default()), write_wait).await {
                    break;
                }
            }
        }
    }
}

async fn write(
    id: ConnectionId,
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> bool {
    match time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(connection = id, "Write failed: {}", e);
            false
        }
        Err(_) => {
            tracing::warn!(connection = id, "Write timed out after {:?}", write_wait);
            false
        }
    }
}
