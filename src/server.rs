// src/server.rs
//
// WebSocket front end. Every client is a viewer: it receives the terminal
// stream as JSON events and may send API requests on the same socket.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use crate::api::{self, ApiRequest, ApiResponse};
use crate::broadcast::StreamEvent;
use crate::io::serial::PortEnumerator;
use crate::io::IoError;
use crate::sessions::SessionManager;

/// Reply to one request frame. `id` is echoed from the request when present.
#[derive(Serialize)]
struct ResponseFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(flatten)]
    response: &'a ApiResponse,
}

pub async fn bind(addr: &str) -> Result<TcpListener, String> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;
    if let Ok(local) = listener.local_addr() {
        tlog!("[server] Listening on ws://{}", local);
    }
    Ok(listener)
}

/// Accept viewers until the task is dropped.
pub async fn serve(listener: TcpListener, manager: SessionManager, enumerator: Arc<dyn PortEnumerator>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let manager = manager.clone();
                let enumerator = enumerator.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, peer, manager, enumerator).await {
                        tlog!("[server] Client {} error: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                tlog!("[server] Accept failed: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

/// Parse one request frame, run it, and render the reply.
async fn handle_text(manager: &SessionManager, enumerator: &dyn PortEnumerator, text: &str) -> String {
    let (id, response) = match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            let id = value.get("id").cloned();
            match serde_json::from_value::<ApiRequest>(value) {
                Ok(request) => (id, api::dispatch(manager, enumerator, request).await),
                Err(e) => (
                    id,
                    ApiResponse::failure(&IoError::Validation(format!("Invalid request: {}", e))),
                ),
            }
        }
        Err(e) => (
            None,
            ApiResponse::failure(&IoError::Validation(format!("Invalid JSON: {}", e))),
        ),
    };

    let frame = ResponseFrame {
        kind: "response",
        id,
        response: &response,
    };
    serde_json::to_string(&frame)
        .unwrap_or_else(|e| format!(r#"{{"type":"response","success":false,"error":"{}"}}"#, e))
}

fn event_text(event: &StreamEvent) -> Result<String, String> {
    serde_json::to_string(event).map_err(|e| format!("Failed to serialize event: {}", e))
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    manager: SessionManager,
    enumerator: Arc<dyn PortEnumerator>,
) -> Result<(), String> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| format!("WebSocket handshake failed: {}", e))?;
    let (mut sink, mut source) = ws.split();

    let mut subscription = manager.subscribe();
    tlog!("[server] Viewer {} attached as {}", peer, subscription.id());

    // New viewers learn the current state before any stream traffic
    let hello = event_text(&StreamEvent::Session {
        status: manager.status(),
    })?;
    sink.send(Message::Text(hello.into()))
        .await
        .map_err(|e| format!("Send failed: {}", e))?;

    loop {
        tokio::select! {
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_text(&manager, enumerator.as_ref(), text.as_str()).await;
                    sink.send(Message::Text(reply.into()))
                        .await
                        .map_err(|e| format!("Send failed: {}", e))?;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(format!("Receive failed: {}", e)),
            },
            event = subscription.recv() => match event {
                Some(event) => {
                    sink.send(Message::Text(event_text(&event)?.into()))
                        .await
                        .map_err(|e| format!("Send failed: {}", e))?;
                }
                None => break,
            },
        }
    }

    tlog!(
        "[server] Viewer {} detached ({} events dropped)",
        peer,
        subscription.dropped_count()
    );
    Ok(())
}
