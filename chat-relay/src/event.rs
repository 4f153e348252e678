use std::net::SocketAddr;

use serde_json::Value;
use tokio::sync::oneshot;

pub type ConnectionId = u64;

/// Lifecycle of one client channel as the bridge sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unregistered,
    Registered,
    Closed,
}

/// Snapshot of a client channel, taken when an event is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub remote: SocketAddr,
    pub state: ConnectionState,
}

impl Connection {
    pub fn new(id: ConnectionId, remote: SocketAddr) -> Self {
        Self {
            id,
            remote,
            state: ConnectionState::Unregistered,
        }
    }
}

/// One transport callback, consumed by the bridge as soon as it arrives.
///
/// `address` and `body` stay optional because they come straight off the
/// wire; the bridge decides what a missing field means.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Publish {
        connection: Connection,
        address: Option<String>,
        body: Option<Value>,
    },
    Register {
        connection: Connection,
        address: Option<String>,
    },
    Disconnect {
        connection: Connection,
    },
}

impl InboundEvent {
    pub fn connection(&self) -> &Connection {
        match self {
            InboundEvent::Publish { connection, .. }
            | InboundEvent::Register { connection, .. }
            | InboundEvent::Disconnect { connection } => connection,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Publish { .. } => "publish",
            InboundEvent::Register { .. } => "register",
            InboundEvent::Disconnect { .. } => "disconnect",
        }
    }
}

/// Acknowledgment owed to the transport for a single inbound event.
///
/// `complete` takes the token by value, so an event cannot be acknowledged
/// twice. A token dropped without completion acknowledges `false`.
#[derive(Debug)]
pub struct Ack {
    verdict: Option<oneshot::Sender<bool>>,
}

impl Ack {
    /// Creates a token together with the receiver the transport awaits.
    pub fn channel() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self { verdict: Some(tx) }, rx)
    }

    pub fn complete(mut self, accepted: bool) {
        self.send(accepted);
    }

    fn send(&mut self, accepted: bool) {
        if let Some(verdict) = self.verdict.take() {
            // The transport may have stopped waiting; nothing left to tell it.
            let _ = verdict.send(accepted);
        }
    }
}

impl Drop for Ack {
    fn drop(&mut self) {
        self.send(false);
    }
}
