//! Translation of inbound transport events into outbound notices.
//!
//! The bridge is stateless apart from the shared [`PresenceCounter`]. Publish
//! notices are handed to the [`Broadcast`] sink inside the calling task so
//! chat messages keep their latency low; register and close notices go through
//! the [`NoticeQueue`] and reach clients from the broadcaster task.

use std::{fmt, sync::Arc};

use serde_json::Value;
use tracing::{debug, info};

use crate::{
    broadcaster::NoticeQueue,
    event::{Ack, Connection, ConnectionState, InboundEvent},
    notice::{Notice, is_valid_message, message_length},
    presence::PresenceCounter,
};

pub const INBOUND_TOPIC: &str = "chat.to.server";
pub const OUTBOUND_TOPIC: &str = "chat.to.client";
/// Topic older deployments published close notices on.
pub const LEGACY_CLOSE_TOPIC: &str = "client.to.server";

/// Fan-out of a notice to every subscriber of a topic, best effort.
pub trait Broadcast: Send + Sync {
    fn broadcast(&self, topic: &str, notice: &Notice);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    pub inbound_topic: String,
    pub outbound_topic: String,
    pub close_topic: String,
    /// Reject publishes from connections that never registered.
    pub require_registration: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            inbound_topic: INBOUND_TOPIC.to_string(),
            outbound_topic: OUTBOUND_TOPIC.to_string(),
            close_topic: OUTBOUND_TOPIC.to_string(),
            require_registration: false,
        }
    }
}

impl BridgeOptions {
    /// Close notices go to [`LEGACY_CLOSE_TOPIC`] instead of the outbound topic.
    pub fn legacy() -> Self {
        Self {
            close_topic: LEGACY_CLOSE_TOPIC.to_string(),
            ..Self::default()
        }
    }
}

/// Why an inbound event produced no notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AddressMismatch(String),
    Malformed(&'static str),
    InvalidLength(usize),
    NotRegistered,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AddressMismatch(address) => write!(f, "address '{address}' not handled"),
            Rejection::Malformed(field) => write!(f, "missing or malformed '{field}' field"),
            Rejection::InvalidLength(units) => write!(f, "message length {units} out of bounds"),
            Rejection::NotRegistered => write!(f, "connection has not registered"),
        }
    }
}

pub struct MessageBridge {
    options: BridgeOptions,
    presence: Arc<PresenceCounter>,
    sink: Arc<dyn Broadcast>,
    queue: NoticeQueue,
}

impl MessageBridge {
    pub fn new(
        options: BridgeOptions,
        presence: Arc<PresenceCounter>,
        sink: Arc<dyn Broadcast>,
        queue: NoticeQueue,
    ) -> Self {
        Self {
            options,
            presence,
            sink,
            queue,
        }
    }

    pub fn presence(&self) -> &Arc<PresenceCounter> {
        &self.presence
    }

    /// Handles one inbound event and acknowledges it exactly once.
    ///
    /// Returns the notice that was broadcast or queued, if any. Nothing here
    /// fails: rejected events are logged and acknowledged as not accepted.
    pub fn on_inbound(&self, event: InboundEvent, ack: Ack) -> Option<Notice> {
        let kind = event.kind();
        let connection = *event.connection();

        let outcome = match event {
            InboundEvent::Publish {
                connection,
                address,
                body,
            } => self.publish(&connection, address, body),
            InboundEvent::Register {
                connection,
                address,
            } => self.register(&connection, address),
            InboundEvent::Disconnect { connection } => Ok(self.disconnect(&connection)),
        };

        match outcome {
            Ok(notice) => {
                ack.complete(true);
                Some(notice)
            }
            Err(rejection) => {
                debug!(
                    peer = %connection.remote,
                    connection = connection.id,
                    kind,
                    %rejection,
                    "inbound event ignored"
                );
                ack.complete(false);
                None
            }
        }
    }

    fn publish(
        &self,
        connection: &Connection,
        address: Option<String>,
        body: Option<Value>,
    ) -> Result<Notice, Rejection> {
        self.expect_address(address, &self.options.inbound_topic)?;

        let message = match body {
            Some(Value::String(message)) => message,
            _ => return Err(Rejection::Malformed("body")),
        };
        if !is_valid_message(&message) {
            return Err(Rejection::InvalidLength(message_length(&message)));
        }
        if self.options.require_registration && connection.state != ConnectionState::Registered {
            return Err(Rejection::NotRegistered);
        }

        let notice = Notice::publish(connection.remote, message);
        self.sink.broadcast(&self.options.outbound_topic, &notice);
        Ok(notice)
    }

    fn register(&self, connection: &Connection, address: Option<String>) -> Result<Notice, Rejection> {
        self.expect_address(address, &self.options.outbound_topic)?;

        let online = self.presence.increment();
        info!(peer = %connection.remote, connection = connection.id, online, "client registered");

        let notice = Notice::register(online);
        self.queue.submit(&self.options.outbound_topic, notice.clone());
        Ok(notice)
    }

    fn disconnect(&self, connection: &Connection) -> Notice {
        let online = self.presence.decrement();
        info!(peer = %connection.remote, connection = connection.id, online, "client closed");

        let notice = Notice::close(online);
        self.queue.submit(&self.options.close_topic, notice.clone());
        notice
    }

    fn expect_address(&self, address: Option<String>, expected: &str) -> Result<(), Rejection> {
        match address {
            Some(address) if address == expected => Ok(()),
            Some(address) => Err(Rejection::AddressMismatch(address)),
            None => Err(Rejection::Malformed("address")),
        }
    }
}
