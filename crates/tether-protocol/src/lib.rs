//! Wire messages exchanged with the session backend over the duplex channel.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "session:data", "payload": {...}}`.

use serde::{Deserialize, Serialize};
use tether_common::types::{ResizeRequest, SessionId};
use thiserror::Error;
use tracing::trace;

/// Messages sent from the client to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientMessage {
    /// Join (or re-join) the PTY behind a session
    #[serde(rename = "session:create")]
    Create { id: SessionId },

    #[serde(rename = "session:input")]
    Input { id: SessionId, data: String },

    #[serde(rename = "session:resize")]
    Resize { id: SessionId, cols: u16, rows: u16 },

    #[serde(rename = "session:leave")]
    Leave { id: SessionId },
}

impl ClientMessage {
    pub fn resize(id: SessionId, request: ResizeRequest) -> Self {
        ClientMessage::Resize {
            id,
            cols: request.cols,
            rows: request.rows,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Create { .. } => "session:create",
            ClientMessage::Input { .. } => "session:input",
            ClientMessage::Resize { .. } => "session:resize",
            ClientMessage::Leave { .. } => "session:leave",
        }
    }
}

/// Messages sent from the backend to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerMessage {
    /// Join acknowledgement
    #[serde(rename = "session:created")]
    Created { id: SessionId },

    #[serde(rename = "session:data")]
    Data { id: SessionId, data: String },

    #[serde(rename = "session:error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Created { .. } => "session:created",
            ServerMessage::Data { .. } => "session:data",
            ServerMessage::Error { .. } => "session:error",
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// JSON framing for the duplex channel
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_client(message: &ClientMessage) -> Result<String> {
        trace!("Encoding {}", message.event_name());
        Ok(serde_json::to_string(message)?)
    }

    pub fn decode_server(frame: &str) -> Result<ServerMessage> {
        let message: ServerMessage = serde_json::from_str(frame)?;
        trace!("Decoded {}", message.event_name());
        Ok(message)
    }

    /// Backend side of the codec, used by loopback servers and tests
    pub fn encode_server(message: &ServerMessage) -> Result<String> {
        Ok(serde_json::to_string(message)?)
    }

    /// Backend side of the codec, used by loopback servers and tests
    pub fn decode_client(frame: &str) -> Result<ClientMessage> {
        Ok(serde_json::from_str(frame)?)
    }
}
