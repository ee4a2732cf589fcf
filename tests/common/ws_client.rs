//! WebSocket test client

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WsClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.unwrap();
        Self { ws }
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn request(&mut self, identifier: i64, task: i64, body: Value) {
        let message = if body.is_null() {
            json!({"identifier": identifier, "task": task})
        } else {
            json!({"identifier": identifier, "task": task, "body": body})
        };
        self.send_raw(&message.to_string()).await;
    }

    /// Next JSON message, or `None` if nothing arrives within `wait`
    pub async fn recv_within(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let next = tokio::time::timeout_at(deadline, self.ws.next()).await.ok()??;
            match next.ok()? {
                Message::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    pub async fn recv(&mut self) -> Value {
        self.recv_within(RECV_TIMEOUT)
            .await
            .expect("no message within timeout")
    }

    /// Skip messages until one carries `identifier`
    pub async fn recv_reply(&mut self, identifier: i64) -> Value {
        loop {
            let message = self.recv().await;
            if message["identifier"] == identifier {
                return message;
            }
        }
    }

    /// Collect library update events until the closing null event
    pub async fn recv_update_events(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        loop {
            let message = self.recv().await;
            if message.get("identifier").is_some() || message["task"] != 60 {
                continue;
            }
            let done = message["body"].is_null();
            events.push(message);
            if done {
                return events;
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
