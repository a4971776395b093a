//! Scripted live endpoint for integration tests.
//!
//! Accepts WebSocket connections on a loopback port, records every JSON
//! message the client sends, and lets the test push frames or a close to
//! the most recent connection.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use live_voice_client::core::live::{LiveClientOptions, LiveEndpoint};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

enum ServerAction {
    Send(Message),
    Close(u16, String),
}

/// How the server answers the setup message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetupReply {
    /// Answer `{"setupComplete":{}}`
    Acknowledge,
    /// Never answer
    Silent,
}

pub struct MockLiveServer {
    pub url: String,
    received: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<ServerAction>>>>,
    connections: Arc<AtomicUsize>,
    closed_by_client: Arc<AtomicUsize>,
}

impl MockLiveServer {
    pub async fn start(reply: SetupReply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));
        let connections = Arc::new(AtomicUsize::new(0));
        let closed_by_client = Arc::new(AtomicUsize::new(0));

        let accept_current = current.clone();
        let accept_connections = connections.clone();
        let accept_closed = closed_by_client.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (action_tx, action_rx) = mpsc::unbounded_channel();
                *accept_current.lock() = Some(action_tx);
                accept_connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(
                    stream,
                    reply,
                    received_tx.clone(),
                    action_rx,
                    accept_closed.clone(),
                ));
            }
        });

        Self {
            url: format!("ws://{addr}/ws/live"),
            received: tokio::sync::Mutex::new(received_rx),
            current,
            connections,
            closed_by_client,
        }
    }

    pub fn endpoint(&self) -> LiveEndpoint {
        LiveEndpoint::new(self.url.clone(), "test-key")
    }

    pub fn options(setup_timeout: Duration) -> LiveClientOptions {
        LiveClientOptions {
            setup_timeout: Some(setup_timeout),
            allow_insecure_localhost: true,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Close frames received from clients.
    pub fn client_closes(&self) -> usize {
        self.closed_by_client.load(Ordering::SeqCst)
    }

    pub fn send_json(&self, value: Value) {
        self.send(Message::Text(value.to_string().into()));
    }

    /// Send JSON as a binary frame, as the production endpoint does.
    pub fn send_json_binary(&self, value: Value) {
        self.send(Message::Binary(value.to_string().into_bytes().into()));
    }

    pub fn send(&self, message: Message) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(ServerAction::Send(message));
        }
    }

    pub fn close(&self, code: u16, reason: &str) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(ServerAction::Close(code, reason.to_string()));
        }
    }

    /// Next JSON message sent by a client.
    pub async fn next_message(&self) -> Value {
        let mut received = self.received.lock().await;
        tokio::time::timeout(RECV_TIMEOUT, received.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("server stopped")
    }

    /// Next message whose top-level key is `key`, skipping others.
    pub async fn next_message_with(&self, key: &str) -> Value {
        loop {
            let message = self.next_message().await;
            if message.get(key).is_some() {
                return message;
            }
        }
    }

    /// Messages already received, without waiting.
    pub async fn drain(&self) -> Vec<Value> {
        let mut received = self.received.lock().await;
        let mut out = Vec::new();
        while let Ok(message) = received.try_recv() {
            out.push(message);
        }
        out
    }
}

async fn handle_connection(
    stream: TcpStream,
    reply: SetupReply,
    received: mpsc::UnboundedSender<Value>,
    mut actions: mpsc::UnboundedReceiver<ServerAction>,
    closed_by_client: Arc<AtomicUsize>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let is_setup = value.get("setup").is_some();
                    let _ = received.send(value);
                    if is_setup && reply == SetupReply::Acknowledge {
                        let ack = json!({ "setupComplete": {} }).to_string();
                        if write.send(Message::Text(ack.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    closed_by_client.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            Some(action) = actions.recv() => match action {
                ServerAction::Send(message) => {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                ServerAction::Close(code, reason) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }
            },
        }
    }
}
