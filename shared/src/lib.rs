use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod cache;
pub mod sequence;

pub use cache::GameDataCache;
pub use sequence::{is_newer, MessageSequence};

pub const PROTOCOL_VERSION: u32 = 1;
/// Slots per game data cache; a cache key must fit in one byte on the wire.
pub const CACHE_CAPACITY: usize = 256;
/// Message numbers are 16-bit on the wire.
pub const MESSAGE_NUMBER_MODULUS: u32 = 0x1_0000;
pub const MAX_GAME_DATA_LEN: usize = 1024;
pub const DATAGRAM_BUFFER_SIZE: usize = 2048;

/// One unit of relayed game state.
///
/// Blocks are compared by content, never by identity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct DataBlock(Vec<u8>);

impl DataBlock {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// A block of `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0; len])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for DataBlock {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for DataBlock {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Full game data payload.
    GameData(DataBlock),
    /// Reference to a payload the receiver already holds in its mirrored cache.
    CachedGameData { key: u8 },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::GameData(_) => MessageKind::GameData,
            MessageBody::CachedGameData { .. } => MessageKind::CachedGameData,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    GameData,
    CachedGameData,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::GameData => write!(f, "GameData"),
            MessageKind::CachedGameData => write!(f, "CachedGameData"),
        }
    }
}

/// A numbered, data-carrying protocol message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub number: u16,
    pub body: MessageBody,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect { client_version: u32 },
    Disconnect,
    /// Enter the game session; game data is only relayed between members.
    JoinGame,
    QuitGame,

    Connected { client_id: u32 },
    Disconnected { reason: String },
    GameJoined { members: u32 },

    Message(ProtocolMessage),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("game data payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("cache index {0} does not fit in a cache key")]
    CacheKeyOutOfRange(usize),
    #[error("failed to serialize packet: {0}")]
    Serialize(#[from] bincode::Error),
}

#[derive(Debug, Error)]
#[error("failed to decode packet: {0}")]
pub struct DecodeError(#[from] bincode::Error);

/// Converts a cache index into the one-byte key carried by `CachedGameData`.
pub fn cache_key(index: usize) -> Result<u8, EncodeError> {
    u8::try_from(index).map_err(|_| EncodeError::CacheKeyOutOfRange(index))
}

/// Serializes a packet, enforcing the wire limits.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    if let Packet::Message(ProtocolMessage {
        body: MessageBody::GameData(block),
        ..
    }) = packet
    {
        if block.len() > MAX_GAME_DATA_LEN {
            return Err(EncodeError::PayloadTooLarge {
                len: block.len(),
                max: MAX_GAME_DATA_LEN,
            });
        }
    }

    Ok(bincode::serialize(packet)?)
}

pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    Ok(bincode::deserialize(bytes)?)
}
