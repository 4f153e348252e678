use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Upper bound on a chat message, in UTF-16 code units like browser clients count it.
pub const MAX_MESSAGE_CHARS: usize = 140;

const TIME_FORMAT: &str = "%a %b %d %H:%M:%S UTC %Y";

/// Payload broadcast to every client listening on an outbound topic.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    Publish {
        time: String,
        host: String,
        port: u16,
        message: String,
    },
    Register {
        online: i64,
    },
    Close {
        online: i64,
    },
}

impl Notice {
    /// Builds a publish notice stamped with the current UTC time.
    pub fn publish(remote: SocketAddr, message: impl Into<String>) -> Self {
        Self::publish_at(Utc::now(), remote, message)
    }

    pub fn publish_at(time: DateTime<Utc>, remote: SocketAddr, message: impl Into<String>) -> Self {
        Notice::Publish {
            time: time.format(TIME_FORMAT).to_string(),
            host: remote.ip().to_string(),
            port: remote.port(),
            message: message.into(),
        }
    }

    pub fn register(online: i64) -> Self {
        Notice::Register { online }
    }

    pub fn close(online: i64) -> Self {
        Notice::Close { online }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Length as a JavaScript client sees it: characters outside the basic
/// multilingual plane count twice.
pub fn message_length(message: &str) -> usize {
    message.encode_utf16().count()
}

/// Accepts messages of 1 to [`MAX_MESSAGE_CHARS`] UTF-16 code units.
///
/// Content is never inspected or escaped.
pub fn is_valid_message(message: &str) -> bool {
    let length = message.encode_utf16().take(MAX_MESSAGE_CHARS + 1).count();
    (1..=MAX_MESSAGE_CHARS).contains(&length)
}
