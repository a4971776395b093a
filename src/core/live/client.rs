//! Live API client implementation.
//!
//! One [`LiveClient`] owns at most one WebSocket connection to a
//! `BidiGenerateContent` endpoint. It sends the setup handshake, exposes
//! typed send operations, and republishes inbound server messages as
//! [`LiveEvent`]s on its notification hub.
//!
//! # API Reference
//!
//! - Endpoint: `wss://generativelanguage.googleapis.com/ws/...BidiGenerateContent?key=<key>`
//! - Protocol: WebSocket with one-key JSON messages
//! - Audio in: PCM 16-bit, 16kHz, mono, little-endian, base64 encoded
//! - Audio out: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! # Example
//!
//! ```rust,ignore
//! use live_voice_client::core::live::{LiveClient, LiveEndpoint, LiveEvent, LiveEventKind, base_config};
//! use live_voice_client::core::live::messages::Part;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = LiveClient::new(LiveEndpoint::gemini("AIza..."));
//!
//!     let _sub = client.on(LiveEventKind::Content, |event| {
//!         if let LiveEvent::Content(content) = event {
//!             println!("{content:?}");
//!         }
//!     });
//!
//!     client.connect(base_config()).await.unwrap();
//!     client.send(vec![Part::text("hello")]).unwrap();
//! }
//! ```
//!
//! # Connection lifecycle
//!
//! `Disconnected -> Connecting -> AwaitingSetupAck -> Ready`, and back to
//! `Disconnected` on `disconnect`, remote close or transport failure. Every
//! connection attempt gets a new epoch; events from a connection whose epoch
//! is no longer current are dropped, so nothing is reported for a connection
//! after `close` was emitted for it.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use super::base::{ConnectionState, LiveClientOptions, LiveError, LiveResult};
use super::codec::{self, CodecError, Frame, InboundEvent, OutboundIntent};
use super::config::LiveEndpoint;
use super::event::{CloseEvent, LiveEvent, LiveEventKind, StreamingLog};
use super::messages::{Blob, Content, LiveConfig, ModelTurn, Part, ServerContent, ToolResponse};
use crate::core::events::{EventHub, Subscription};
use crate::utils::endpoint::build_connection_url;

/// Close code sent on a client-initiated disconnect.
const NORMAL_CLOSURE: u16 = 1000;

/// Frames waiting for the connection task. Sends beyond this fail instead of
/// buffering without bound while the socket is stalled (about 6 s of 100 ms
/// audio chunks).
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

// =============================================================================
// Connection Slot
// =============================================================================

/// Mutable per-connection state. Guarded by `ClientInner::slot`, which is
/// never held while callbacks run.
#[derive(Default)]
struct ConnectionSlot {
    state: ConnectionState,
    epoch: u64,
    outbound: Option<mpsc::Sender<Message>>,
    task: Option<JoinHandle<()>>,
    setup_waiter: Option<oneshot::Sender<LiveResult<()>>>,
    config: Option<LiveConfig>,
}

struct ClientInner {
    endpoint: LiveEndpoint,
    options: LiveClientOptions,
    hub: EventHub<LiveEvent>,
    slot: Mutex<ConnectionSlot>,
    /// Serializes emission against state changes. Reentrant so callbacks may
    /// call back into the client.
    dispatch: ReentrantMutex<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self.slot.get_mut().task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Live Client
// =============================================================================

/// Streaming session client.
///
/// Cheap to clone; clones share the connection and the subscriber registry.
#[derive(Clone)]
pub struct LiveClient {
    inner: Arc<ClientInner>,
}

/// Non-owning handle to a [`LiveClient`], for callbacks registered on the
/// client itself.
#[derive(Clone)]
pub struct WeakLiveClient {
    inner: Weak<ClientInner>,
}

impl WeakLiveClient {
    pub fn upgrade(&self) -> Option<LiveClient> {
        self.inner.upgrade().map(|inner| LiveClient { inner })
    }
}

impl LiveClient {
    /// Create a client with default options.
    pub fn new(endpoint: LiveEndpoint) -> Self {
        Self::with_options(endpoint, LiveClientOptions::default())
    }

    pub fn with_options(endpoint: LiveEndpoint, options: LiveClientOptions) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                endpoint,
                options,
                hub: EventHub::new(),
                slot: Mutex::new(ConnectionSlot::default()),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakLiveClient {
        WeakLiveClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.slot.lock().state
    }

    /// Whether setup has been acknowledged on the current connection.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Configuration of the current (or last) connection.
    pub fn config(&self) -> Option<LiveConfig> {
        self.inner.slot.lock().config.clone()
    }

    pub fn endpoint(&self) -> &LiveEndpoint {
        &self.inner.endpoint
    }

    /// Register `callback` for events of `kind`. Dropping the returned guard
    /// unregisters it.
    pub fn on<F>(&self, kind: LiveEventKind, callback: F) -> Subscription
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        self.inner.hub.subscribe(kind, callback)
    }

    /// Open a connection and complete the setup handshake.
    ///
    /// An existing connection is closed first. Resolves once the server
    /// acknowledges setup.
    pub async fn connect(&self, config: LiveConfig) -> LiveResult<()> {
        let url = build_connection_url(
            &self.inner.endpoint.url,
            &self.inner.endpoint.api_key,
            self.inner.options.allow_insecure_localhost,
        )
        .map_err(|e| LiveError::InvalidConfiguration(e.to_string()))?;

        self.disconnect();

        let (ack_tx, ack_rx) = oneshot::channel();
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

        let epoch = {
            let _dispatch = self.inner.dispatch.lock();
            let mut slot = self.inner.slot.lock();
            slot.epoch += 1;
            slot.state = ConnectionState::Connecting;
            slot.config = Some(config.clone());
            slot.outbound = Some(out_tx);
            slot.setup_waiter = Some(ack_tx);
            slot.epoch
        };

        info!(host = ?url.host_str(), model = %config.model, "Connecting to live endpoint");

        let task = tokio::spawn(run_connection(
            Arc::downgrade(&self.inner),
            epoch,
            url.to_string(),
            config,
            out_rx,
        ));
        {
            let mut slot = self.inner.slot.lock();
            if slot.epoch == epoch && slot.state.is_active() {
                slot.task = Some(task);
            } else {
                task.abort();
            }
        }

        let outcome = match self.inner.options.setup_timeout {
            Some(limit) => match tokio::time::timeout(limit, ack_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let reason = format!("setup not acknowledged within {}ms", limit.as_millis());
                    self.inner.close_local(Some(epoch), &reason);
                    return Err(LiveError::Connection(reason));
                }
            },
            None => ack_rx.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(LiveError::Connection(
                "connection attempt abandoned".to_string(),
            )),
        }
    }

    /// Close the connection, if any. Idempotent.
    ///
    /// Emits exactly one `close` for the connection that existed. A pending
    /// `connect` fails with a connection error.
    pub fn disconnect(&self) {
        self.inner.close_local(None, "client disconnect");
    }

    /// Replace the session configuration on the open connection.
    pub fn update_config(&self, config: LiveConfig) -> LiveResult<()> {
        self.inner
            .send_intent("update_config", OutboundIntent::Setup(config.clone()))?;
        self.inner.slot.lock().config = Some(config);
        Ok(())
    }

    /// Send a complete user turn.
    pub fn send(&self, parts: Vec<Part>) -> LiveResult<()> {
        self.send_turn(parts, true)
    }

    /// Send a user turn, optionally leaving the turn open.
    pub fn send_turn(&self, parts: Vec<Part>, turn_complete: bool) -> LiveResult<()> {
        self.inner.send_intent(
            "send",
            OutboundIntent::ClientContent {
                turns: vec![Content::user(parts)],
                turn_complete,
            },
        )
    }

    /// Stream media chunks. Failures are reported as `transportError` events.
    pub fn send_realtime_input(&self, chunks: Vec<Blob>) {
        if let Err(e) = self
            .inner
            .send_intent("send_realtime_input", OutboundIntent::RealtimeInput(chunks))
        {
            warn!(error = %e, "Realtime input not delivered");
            let _dispatch = self.inner.dispatch.lock();
            self.inner.hub.emit(&LiveEvent::TransportError(e.to_string()));
        }
    }

    /// Answer function calls requested by the model.
    pub fn send_tool_response(&self, response: ToolResponse) -> LiveResult<()> {
        self.inner
            .send_intent("send_tool_response", OutboundIntent::ToolResponse(response))
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Dispatch
// =============================================================================

impl ClientInner {
    fn is_current(&self, epoch: u64) -> bool {
        let slot = self.slot.lock();
        slot.epoch == epoch && slot.state != ConnectionState::Disconnected
    }

    /// Emit `event` unless the connection identified by `epoch` was abandoned.
    fn emit_if_current(&self, epoch: u64, event: LiveEvent) -> bool {
        let _dispatch = self.dispatch.lock();
        if !self.is_current(epoch) {
            return false;
        }
        self.hub.emit(&event);
        true
    }

    fn log(&self, epoch: u64, kind: &str, message: String) {
        debug!(kind, "{message}");
        self.emit_if_current(epoch, LiveEvent::Log(StreamingLog::new(kind, message)));
    }

    /// Move from `from` to `to` if the connection is still current.
    fn transition(&self, epoch: u64, from: ConnectionState, to: ConnectionState) -> bool {
        let _dispatch = self.dispatch.lock();
        let mut slot = self.slot.lock();
        if slot.epoch != epoch || slot.state != from {
            return false;
        }
        slot.state = to;
        true
    }

    fn send_intent(&self, operation: &'static str, intent: OutboundIntent) -> LiveResult<()> {
        let (epoch, outbound) = {
            let slot = self.slot.lock();
            if slot.state != ConnectionState::Ready {
                return Err(LiveError::InvalidState {
                    operation,
                    required: ConnectionState::Ready,
                    actual: slot.state,
                });
            }
            (slot.epoch, slot.outbound.clone())
        };

        let Some(outbound) = outbound else {
            return Err(LiveError::Transport("no outbound channel".to_string()));
        };

        let json = codec::encode(&intent)?;
        outbound
            .try_send(Message::Text(json.into()))
            .map_err(|e| match e {
                TrySendError::Full(_) => LiveError::Transport(format!(
                    "outbound queue full ({OUTBOUND_QUEUE_CAPACITY} frames pending)"
                )),
                TrySendError::Closed(_) => {
                    LiveError::Transport("connection task has stopped".to_string())
                }
            })?;

        self.log(epoch, &format!("client.{}", intent.name()), summarize(&intent));
        Ok(())
    }

    /// Tear down the connection locally. With `expected_epoch`, only that
    /// connection is closed.
    fn close_local(&self, expected_epoch: Option<u64>, reason: &str) {
        let _dispatch = self.dispatch.lock();

        let (epoch, previous) = {
            let mut slot = self.slot.lock();
            if slot.state == ConnectionState::Disconnected
                || expected_epoch.is_some_and(|e| e != slot.epoch)
            {
                return;
            }
            let previous = slot.state;
            slot.state = ConnectionState::Closing;
            (slot.epoch, previous)
        };

        self.log(epoch, "client.close", reason.to_string());

        let (outbound, task, waiter) = {
            let mut slot = self.slot.lock();
            slot.state = ConnectionState::Disconnected;
            slot.epoch += 1;
            (slot.outbound.take(), slot.task.take(), slot.setup_waiter.take())
        };

        if previous == ConnectionState::Connecting {
            if let Some(task) = task {
                task.abort();
            }
        } else if let Some(outbound) = outbound {
            let frame = CloseFrame {
                code: CloseCode::from(NORMAL_CLOSURE),
                reason: reason.to_string().into(),
            };
            // The task exits once the channel is drained and closed; with a
            // full queue the sink close at task exit sends the close frame.
            if outbound.try_send(Message::Close(Some(frame))).is_err() {
                debug!("Close frame not queued");
            }
        }

        info!(state = %previous, reason, "Live connection closed locally");

        self.hub.emit(&LiveEvent::Close(CloseEvent {
            code: Some(NORMAL_CLOSURE),
            reason: reason.to_string(),
            initiated_locally: true,
        }));

        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(LiveError::Connection(format!(
                "connection closed before setup completed: {reason}"
            ))));
        }
    }

    /// A socket write failed. The sink is unusable after a write error, so
    /// the failure is reported and the connection is torn down.
    fn transport_failed(&self, epoch: u64, error: String) {
        warn!(error = %error, "Failed to send WebSocket message");
        self.emit_if_current(epoch, LiveEvent::TransportError(error.clone()));
        self.close_remote(epoch, None, format!("send failed: {error}"));
    }

    /// The transport ended without a local disconnect.
    fn close_remote(&self, epoch: u64, code: Option<u16>, reason: String) {
        let _dispatch = self.dispatch.lock();

        if !self.is_current(epoch) {
            return;
        }
        self.log(epoch, "server.close", reason.clone());

        let (previous, waiter) = {
            let mut slot = self.slot.lock();
            let previous = slot.state;
            slot.state = ConnectionState::Disconnected;
            slot.epoch += 1;
            slot.outbound = None;
            slot.task = None;
            (previous, slot.setup_waiter.take())
        };

        warn!(state = %previous, ?code, reason = %reason, "Live connection closed by remote");

        self.hub.emit(&LiveEvent::Close(CloseEvent {
            code,
            reason: reason.clone(),
            initiated_locally: false,
        }));

        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(LiveError::Connection(reason)));
        }
    }

    fn handle_frame(&self, epoch: u64, frame: Frame) {
        let event = match codec::decode(&frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to decode server message");
                self.log(epoch, "server.error", e.to_string());
                self.emit_if_current(epoch, LiveEvent::ProtocolError(e));
                return;
            }
        };

        match event {
            InboundEvent::SetupComplete => {
                self.log(epoch, "server.setupComplete", String::new());
                let waiter = {
                    let _dispatch = self.dispatch.lock();
                    let mut slot = self.slot.lock();
                    if slot.epoch == epoch && slot.state == ConnectionState::AwaitingSetupAck {
                        slot.state = ConnectionState::Ready;
                        slot.setup_waiter.take()
                    } else {
                        None
                    }
                };
                if waiter.is_some() {
                    info!("Live session setup complete");
                }
                self.emit_if_current(epoch, LiveEvent::SetupComplete);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
            }
            InboundEvent::ServerContent(content) => self.dispatch_server_content(epoch, content),
            InboundEvent::ToolCall(call) => {
                let names: Vec<&str> = call.function_calls.iter().map(|c| c.name.as_str()).collect();
                self.log(epoch, "server.toolCall", names.join(", "));
                self.emit_if_current(epoch, LiveEvent::ToolCall(call));
            }
            InboundEvent::ToolCallCancellation(cancellation) => {
                self.log(
                    epoch,
                    "server.toolCallCancellation",
                    cancellation.ids.join(", "),
                );
                self.emit_if_current(epoch, LiveEvent::ToolCallCancellation(cancellation));
            }
        }
    }

    fn dispatch_server_content(&self, epoch: u64, content: ServerContent) {
        if content.interrupted {
            self.log(epoch, "server.interrupted", String::new());
            self.emit_if_current(epoch, LiveEvent::Interrupted);
            return;
        }

        if let Some(turn) = content.model_turn {
            let (audio, rest): (Vec<Part>, Vec<Part>) =
                turn.parts.into_iter().partition(Part::is_pcm_audio);

            for part in audio {
                let Some(blob) = part.inline_data else {
                    continue;
                };
                match blob.decode() {
                    Ok(pcm) => {
                        self.log(
                            epoch,
                            "server.audio",
                            format!("{} ({} bytes)", blob.mime_type, pcm.len()),
                        );
                        self.emit_if_current(epoch, LiveEvent::Audio(Bytes::from(pcm)));
                    }
                    Err(e) => {
                        let error = CodecError::Malformed(format!("audio payload: {e}"));
                        self.log(epoch, "server.error", error.to_string());
                        self.emit_if_current(epoch, LiveEvent::ProtocolError(error));
                    }
                }
            }

            if !rest.is_empty() {
                let text: Vec<&str> = rest.iter().filter_map(|p| p.text.as_deref()).collect();
                self.log(epoch, "server.content", text.join(" "));
                self.emit_if_current(
                    epoch,
                    LiveEvent::Content(ServerContent {
                        model_turn: Some(ModelTurn { parts: rest }),
                        interrupted: false,
                        turn_complete: content.turn_complete,
                    }),
                );
            }
        }

        if content.turn_complete {
            self.log(epoch, "server.turnComplete", String::new());
            self.emit_if_current(epoch, LiveEvent::TurnComplete);
        }
    }
}

/// Short trace text for an outbound intent. Media payloads are not logged.
fn summarize(intent: &OutboundIntent) -> String {
    match intent {
        OutboundIntent::Setup(config) => config.model.clone(),
        OutboundIntent::RealtimeInput(chunks) => chunks
            .iter()
            .map(|c| format!("{} ({} b64)", c.mime_type, c.data.len()))
            .collect::<Vec<_>>()
            .join(", "),
        OutboundIntent::ClientContent {
            turns,
            turn_complete,
        } => {
            let text: Vec<&str> = turns
                .iter()
                .flat_map(|t| t.parts.iter())
                .filter_map(|p| p.text.as_deref())
                .collect();
            format!("{} (turnComplete={turn_complete})", text.join(" "))
        }
        OutboundIntent::ToolResponse(response) => response
            .function_responses
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

// =============================================================================
// Connection Task
// =============================================================================

async fn run_connection(
    client: Weak<ClientInner>,
    epoch: u64,
    url: String,
    config: LiveConfig,
    mut outbound: mpsc::Receiver<Message>,
) {
    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            if let Some(inner) = client.upgrade() {
                inner.close_remote(epoch, None, format!("failed to open transport: {e}"));
            }
            return;
        }
    };

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    {
        let Some(inner) = client.upgrade() else {
            return;
        };
        if !inner.emit_if_current(epoch, LiveEvent::Open) {
            return;
        }

        let setup = OutboundIntent::Setup(config);
        let json = match codec::encode(&setup) {
            Ok(json) => json,
            Err(e) => {
                inner.close_remote(epoch, None, e.to_string());
                return;
            }
        };
        if !inner.transition(
            epoch,
            ConnectionState::Connecting,
            ConnectionState::AwaitingSetupAck,
        ) {
            return;
        }
        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
            inner.close_remote(epoch, None, format!("failed to send setup: {e}"));
            return;
        }
        inner.log(epoch, "client.setup", summarize(&setup));
    }

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // Local disconnect; the close frame was already queued.
                    break;
                };
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_sink.send(message).await {
                    if closing {
                        break;
                    }
                    let Some(inner) = client.upgrade() else { break };
                    inner.transport_failed(epoch, e.to_string());
                    break;
                }
            }

            inbound = ws_stream.next() => {
                let Some(inner) = client.upgrade() else { break };
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        inner.handle_frame(epoch, Frame::Text(text.as_str().to_string()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        inner.handle_frame(epoch, Frame::Binary(data));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            warn!(error = %e, "Failed to send pong");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                            None => (None, "closed by server".to_string()),
                        };
                        inner.close_remote(epoch, code, reason);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        inner.close_remote(epoch, None, format!("transport error: {e}"));
                        break;
                    }
                    None => {
                        inner.close_remote(epoch, None, "transport ended".to_string());
                        break;
                    }
                }
            }
        }
    }

    let _ = ws_sink.close().await;
    debug!(epoch, "Live connection task finished");
}
