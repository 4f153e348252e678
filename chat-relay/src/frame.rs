use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames a client sends over the event bus socket.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Register {
        #[serde(default)]
        address: Option<String>,
    },
    #[serde(alias = "send")]
    Publish {
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        body: Option<Value>,
    },
    Unregister {
        #[serde(default)]
        address: Option<String>,
    },
    Ping,
}

/// Frames the relay sends back.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message received on a subscribed address. `body` is the notice as a JSON string.
    Rec { address: String, body: String },
    #[serde(rename = "err")]
    Error { body: String },
}

impl ServerFrame {
    pub fn access_denied() -> Self {
        ServerFrame::Error {
            body: "access_denied".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    InvalidJson,
    InvalidType,
}

impl FrameError {
    pub fn code(self) -> &'static str {
        match self {
            FrameError::InvalidJson => "invalid_json",
            FrameError::InvalidType => "invalid_type",
        }
    }

    pub fn to_frame(self) -> ServerFrame {
        ServerFrame::Error {
            body: self.code().to_string(),
        }
    }
}

pub fn decode_client_frame(text: &str) -> Result<ClientFrame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(|_| FrameError::InvalidJson)?;
    if !value.is_object() {
        return Err(FrameError::InvalidJson);
    }
    serde_json::from_value(value).map_err(|_| FrameError::InvalidType)
}

pub fn encode_server_frame(frame: &ServerFrame) -> serde_json::Result<String> {
    serde_json::to_string(frame)
}
