//! Signaling wire protocol between peers and the relay.
//!
//! Frames are JSON text. A peer sends [`ClientMessage`]s:
//!
//! ```json
//! {"cmd": "register", "roomid": "abc", "clientid": "123"}
//! {"cmd": "send", "msg": "<opaque payload>"}
//! ```
//!
//! and receives [`ServerMessage`]s, either `{"msg": ...}` carrying a payload
//! relayed from the other peer of the room, or `{"error": ...}`.

use serde::{Deserialize, Serialize};

/// Errors raised while decoding or validating an inbound frame.
///
/// Every variant is a protocol violation: the relay reports it to the peer
/// and closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not a JSON object of the expected shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The `cmd` field is missing or names an unknown command.
    #[error("Invalid message: unexpected 'cmd'")]
    UnexpectedCommand(String),
    /// A `register` command without a room id or client id.
    #[error("Invalid register request: missing 'clientid' or 'roomid'")]
    MissingIds,
    /// A `send` command with an empty or missing `msg`.
    #[error("Invalid send request: missing 'msg'")]
    EmptyMessage,
}

/// A validated command received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Binds the connection to a (room, client) slot. Sent once, first.
    Register {
        /// Room to join.
        room_id: String,
        /// Identity of the peer within the room.
        client_id: String,
    },
    /// Forwards an opaque payload to the other peer of the room.
    Send {
        /// Non-empty payload.
        msg: String,
    },
}

/// Raw JSON shape of an inbound frame. All fields are optional on the wire.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawClientMessage {
    #[serde(default)]
    cmd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    roomid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    clientid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    msg: String,
}

impl TryFrom<RawClientMessage> for ClientMessage {
    type Error = ProtocolError;

    fn try_from(raw: RawClientMessage) -> Result<Self, Self::Error> {
        match raw.cmd.as_str() {
            "register" => {
                if raw.roomid.is_empty() || raw.clientid.is_empty() {
                    return Err(ProtocolError::MissingIds);
                }
                Ok(Self::Register {
                    room_id: raw.roomid,
                    client_id: raw.clientid,
                })
            }
            "send" => {
                if raw.msg.is_empty() {
                    return Err(ProtocolError::EmptyMessage);
                }
                Ok(Self::Send { msg: raw.msg })
            }
            _ => Err(ProtocolError::UnexpectedCommand(raw.cmd)),
        }
    }
}

impl From<&ClientMessage> for RawClientMessage {
    fn from(msg: &ClientMessage) -> Self {
        match msg {
            ClientMessage::Register { room_id, client_id } => Self {
                cmd: "register".to_string(),
                roomid: room_id.clone(),
                clientid: client_id.clone(),
                ..Self::default()
            },
            ClientMessage::Send { msg } => Self {
                cmd: "send".to_string(),
                msg: msg.clone(),
                ..Self::default()
            },
        }
    }
}

/// A frame sent by the relay to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Payload relayed on behalf of the other peer of the room.
    #[serde(rename = "msg")]
    Relay(String),
    /// Human-readable description of a failed request.
    #[serde(rename = "error")]
    Error(String),
}

/// Decodes and validates an inbound text frame.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the frame is not valid JSON, names an unknown
/// command, or lacks the fields its command requires.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
    let raw: RawClientMessage = serde_json::from_str(text)?;
    ClientMessage::try_from(raw)
}

/// Encodes a [`ClientMessage`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if serialization fails.
pub fn encode_client(msg: &ClientMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&RawClientMessage::from(msg))?)
}

/// Encodes a [`ServerMessage`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if serialization fails.
pub fn encode_server(msg: &ServerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decodes a JSON text frame sent by the relay.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the frame is neither a relay nor
/// an error message.
pub fn decode_server(text: &str) -> Result<ServerMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
