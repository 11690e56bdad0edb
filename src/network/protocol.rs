use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio_util::codec::LengthDelimitedCodec;

use super::identity::PeerIdentity;

/// Protocol versioning
pub const PROTOCOL_VERSION: u8 = 1;

/// Separates the target user from the port in a `StartChatClient` payload
///
/// ':' is the passwd field separator, so it never appears in a user name.
pub const INVITE_SEPARATOR: char = ':';

/// Upper bound on a decoded message, independent of the transport
const MAX_MESSAGE_LENGTH: u64 = 1024 * 1024;

/// Error types for protocol operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unsupported protocol version. Expected {expected}, got {found}")]
    UnsupportedVersion { expected: u8, found: u8 },

    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Message kinds understood by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Presence announcement
    Ehlo = 0,
    /// Ask the addressed peer to open a chat server
    StartChatServer = 1,
    /// Tell the addressed peer which port to connect to
    StartChatClient = 2,
    /// Chat text, only valid on a session stream
    Chat = 3,
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(MessageKind::Ehlo),
            1 => Ok(MessageKind::StartChatServer),
            2 => Ok(MessageKind::StartChatClient),
            3 => Ok(MessageKind::Chat),
            _ => Err(ProtocolError::UnknownKind(value)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        kind as u8
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Ehlo => write!(f, "Ehlo"),
            MessageKind::StartChatServer => write!(f, "StartChatServer"),
            MessageKind::StartChatClient => write!(f, "StartChatClient"),
            MessageKind::Chat => write!(f, "Chat"),
        }
    }
}

/// A single protocol message, as sent over UDP or inside a TCP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_user: String,
    pub sender_host: String,
    pub kind: MessageKind,
    pub payload: String,
}

impl Message {
    pub fn new(sender: &PeerIdentity, kind: MessageKind, payload: impl Into<String>) -> Self {
        Self {
            sender_user: sender.user.clone(),
            sender_host: sender.host.clone(),
            kind,
            payload: payload.into(),
        }
    }

    /// Identity of the peer that built this message
    pub fn sender(&self) -> PeerIdentity {
        PeerIdentity::new(self.sender_user.clone(), self.sender_host.clone())
    }
}

/// Borrowed form used when encoding
#[derive(Serialize)]
struct WireMessageRef<'a> {
    version: u8,
    kind: u8,
    sender_user: &'a str,
    sender_host: &'a str,
    payload: &'a str,
}

/// Owned form produced when decoding
#[derive(Deserialize)]
struct WireMessage {
    version: u8,
    kind: u8,
    sender_user: String,
    sender_host: String,
    payload: String,
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .with_limit(MAX_MESSAGE_LENGTH)
        .reject_trailing_bytes()
}

/// Encode a message to bytes
///
/// The first byte is always the protocol version, so a receiver can reject
/// a foreign version before attempting to parse the rest.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let wire = WireMessageRef {
        version: PROTOCOL_VERSION,
        kind: message.kind.into(),
        sender_user: &message.sender_user,
        sender_host: &message.sender_host,
        payload: &message.payload,
    };

    wire_options()
        .serialize(&wire)
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Decode bytes to a message
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    let found = *data
        .first()
        .ok_or_else(|| ProtocolError::MalformedMessage("empty buffer".to_string()))?;

    if found != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            expected: PROTOCOL_VERSION,
            found,
        });
    }

    let wire: WireMessage = wire_options()
        .deserialize(data)
        .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;

    debug_assert_eq!(wire.version, PROTOCOL_VERSION);

    Ok(Message {
        kind: MessageKind::try_from(wire.kind)?,
        sender_user: wire.sender_user,
        sender_host: wire.sender_host,
        payload: wire.payload,
    })
}

/// Frame codec for session streams: a 4-byte big-endian length prefix
/// followed by one encoded message.
pub fn stream_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Payload of a `StartChatClient` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInvite {
    /// User expected to connect
    pub target_user: String,
    /// Port the inviting peer is listening on
    pub port: u16,
}

impl ClientInvite {
    pub fn new(target_user: impl Into<String>, port: u16) -> Self {
        Self {
            target_user: target_user.into(),
            port,
        }
    }

    pub fn to_payload(&self) -> String {
        format!("{}{}{}", self.target_user, INVITE_SEPARATOR, self.port)
    }

    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let (target_user, port) = payload.split_once(INVITE_SEPARATOR).ok_or_else(|| {
            ProtocolError::MalformedMessage(format!("invite without separator: {:?}", payload))
        })?;

        if target_user.is_empty() {
            return Err(ProtocolError::MalformedMessage(
                "invite without target user".to_string(),
            ));
        }

        let port = port.parse::<u16>().map_err(|_| {
            ProtocolError::MalformedMessage(format!("invalid invite port: {:?}", port))
        })?;

        Ok(Self::new(target_user, port))
    }
}
