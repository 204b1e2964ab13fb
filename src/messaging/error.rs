use serde_json::Error as SerdeError;
use thiserror::Error;

/// 傳輸層錯誤
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish failed on channel {channel}: {reason}")]
    Publish { channel: String, reason: String },

    #[error("Transport closed")]
    Closed,
}

/// 封包解碼錯誤
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Unknown envelope kind: {0}")]
    UnknownKind(String),

    #[error("Invalid packet id: {0}")]
    UnknownPacket(i32),

    #[error("Missing field #{index} for packet {packet_id}")]
    MissingField { packet_id: i32, index: usize },

    #[error("Invalid field #{index} for packet {packet_id}: {reason}")]
    InvalidField {
        packet_id: i32,
        index: usize,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerdeError),
}
