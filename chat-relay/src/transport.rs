//! WebSocket side of the relay.
//!
//! Each accepted socket becomes a session task. The session turns frames into
//! [`InboundEvent`]s, waits for the bridge's acknowledgment, and forwards hub
//! deliveries for the addresses it is subscribed to. When the socket of a
//! client that registered ends, for whatever reason, the session raises
//! exactly one disconnect. Sockets that never registered leave the presence
//! count alone.

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    select,
    sync::{broadcast, watch},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    bridge::MessageBridge,
    event::{Ack, Connection, ConnectionId, ConnectionState, InboundEvent},
    frame::{ClientFrame, ServerFrame, decode_client_frame, encode_server_frame},
    hub::{Delivery, TopicHub},
};

#[derive(Clone)]
pub struct RelayState {
    bridge: Arc<MessageBridge>,
    hub: Arc<TopicHub>,
    shutdown: watch::Receiver<bool>,
    next_id: Arc<AtomicU64>,
}

impl RelayState {
    pub fn new(bridge: Arc<MessageBridge>, hub: Arc<TopicHub>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            bridge,
            hub,
            shutdown,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Event bus endpoints; serve with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/eventbus", get(upgrade))
        .route("/eventbus/websocket", get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, remote, state))
}

/// Hands an event to the bridge and waits for its verdict.
pub async fn dispatch(bridge: &MessageBridge, event: InboundEvent) -> bool {
    let (ack, verdict) = Ack::channel();
    bridge.on_inbound(event, ack);
    verdict.await.unwrap_or(false)
}

type SocketSink = SplitSink<WebSocket, Message>;

struct Session {
    connection: Connection,
    subscriptions: HashSet<String>,
    sink: SocketSink,
    /// Set by the first accepted register; the presence count only knows these sockets.
    counted: bool,
}

async fn run_session(socket: WebSocket, remote: SocketAddr, state: RelayState) {
    let connection = Connection::new(state.next_id(), remote);
    info!(peer = %remote, connection = connection.id, "client connected");

    let (sink, mut stream) = socket.split();
    let mut feed = state.hub.subscribe();
    let mut shutdown = state.shutdown.clone();
    let mut session = Session {
        connection,
        subscriptions: HashSet::new(),
        sink,
        counted: false,
    };

    let stopping = *shutdown.borrow_and_update();
    if !stopping {
        session
            .run(&state.bridge, &mut stream, &mut feed, &mut shutdown)
            .await;
    }

    session.connection.state = ConnectionState::Closed;
    if session.counted {
        dispatch(
            &state.bridge,
            InboundEvent::Disconnect {
                connection: session.connection,
            },
        )
        .await;
    }

    if let Err(error) = session.sink.close().await {
        debug!(peer = %remote, ?error, "socket already closed");
    }
    info!(peer = %remote, connection = session.connection.id, "client disconnected");
}

impl Session {
    async fn run(
        &mut self,
        bridge: &MessageBridge,
        stream: &mut SplitStream<WebSocket>,
        feed: &mut broadcast::Receiver<Delivery>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        loop {
            select! {
                _ = shutdown.changed() => break,
                incoming = stream.next() => {
                    if !self.handle_incoming(bridge, incoming).await {
                        break;
                    }
                }
                delivery = feed.recv() => {
                    if !self.handle_delivery(delivery).await {
                        break;
                    }
                }
            }
        }
    }

    async fn handle_incoming(
        &mut self,
        bridge: &MessageBridge,
        incoming: Option<Result<Message, axum::Error>>,
    ) -> bool {
        match incoming {
            Some(Ok(Message::Text(text))) => self.handle_text(bridge, &text).await,
            Some(Ok(Message::Close(_))) | None => false,
            // Pings are answered by the websocket layer; binary frames carry nothing for us.
            Some(Ok(_)) => true,
            Some(Err(error)) => {
                debug!(peer = %self.connection.remote, ?error, "socket read failed");
                false
            }
        }
    }

    async fn handle_text(&mut self, bridge: &MessageBridge, text: &str) -> bool {
        let frame = match decode_client_frame(text) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(peer = %self.connection.remote, code = error.code(), "undecodable frame");
                return self.send(&error.to_frame()).await;
            }
        };

        match frame {
            ClientFrame::Register { address } => {
                let event = InboundEvent::Register {
                    connection: self.connection,
                    address: address.clone(),
                };
                if dispatch(bridge, event).await {
                    if let Some(address) = address {
                        self.subscriptions.insert(address);
                    }
                    self.connection.state = ConnectionState::Registered;
                    self.counted = true;
                    true
                } else {
                    self.send(&ServerFrame::access_denied()).await
                }
            }
            ClientFrame::Publish { address, body } => {
                let event = InboundEvent::Publish {
                    connection: self.connection,
                    address,
                    body,
                };
                dispatch(bridge, event).await;
                true
            }
            ClientFrame::Unregister { address } => {
                if let Some(address) = address {
                    self.subscriptions.remove(&address);
                }
                if self.subscriptions.is_empty() {
                    self.connection.state = ConnectionState::Unregistered;
                }
                true
            }
            ClientFrame::Ping => true,
        }
    }

    async fn handle_delivery(&mut self, delivery: Result<Delivery, broadcast::error::RecvError>) -> bool {
        match delivery {
            Ok(Delivery { topic, body }) => {
                if !self.subscriptions.contains(&*topic) {
                    return true;
                }
                let frame = ServerFrame::Rec {
                    address: topic.to_string(),
                    body: body.to_string(),
                };
                self.send(&frame).await
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(peer = %self.connection.remote, skipped, "client fell behind, notices dropped");
                true
            }
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }

    async fn send(&mut self, frame: &ServerFrame) -> bool {
        let encoded = match encode_server_frame(frame) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(?error, "failed to encode frame");
                return true;
            }
        };
        if let Err(error) = self.sink.send(Message::Text(encoded)).await {
            warn!(peer = %self.connection.remote, ?error, "failed to deliver frame");
            return false;
        }
        true
    }
}
