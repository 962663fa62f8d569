//! Exchange wire messages and the inbound sanity gate.
//!
//! Messages travel over the fabric transport as MsgPack
//! (`rmp_serde::to_vec_named()`), the same envelope format as the rest of the
//! inter-node protocol family. Field order is fixed for wire compatibility:
//! protocol id, type, cluster key, optional payload. Only `Data` carries a
//! payload; its bytes use the packed binary layout in [`super::codec`].

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use strata_core::{ClusterKey, NodeId};

/// Protocol identifier carried by every exchange message.
pub const PROTOCOL_ID: u32 = 1;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Exchange message type tag.
///
/// Serialized as its `u32` wire code. `DataNack` is reserved in the tag space
/// but never sent or accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum MessageKind {
    Data,
    DataAck,
    DataNack,
    ReadyToCommit,
    Commit,
}

impl From<MessageKind> for u32 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Data => 0,
            MessageKind::DataAck => 1,
            MessageKind::DataNack => 2,
            MessageKind::ReadyToCommit => 3,
            MessageKind::Commit => 4,
        }
    }
}

impl TryFrom<u32> for MessageKind {
    type Error = String;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MessageKind::Data),
            1 => Ok(MessageKind::DataAck),
            2 => Ok(MessageKind::DataNack),
            3 => Ok(MessageKind::ReadyToCommit),
            4 => Ok(MessageKind::Commit),
            other => Err(format!("unknown exchange message kind {other}")),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Data => "data",
            MessageKind::DataAck => "data-ack",
            MessageKind::DataNack => "data-nack",
            MessageKind::ReadyToCommit => "ready-to-commit",
            MessageKind::Commit => "commit",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ExchangeMessage
// ---------------------------------------------------------------------------

/// One exchange protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeMessage {
    pub protocol_id: u32,
    pub kind: MessageKind,
    pub cluster_key: ClusterKey,
    /// Namespaces payload; present only on `Data`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<ByteBuf>,
}

impl ExchangeMessage {
    /// Builds a `Data` message carrying an encoded namespaces payload.
    #[must_use]
    pub fn data(cluster_key: ClusterKey, payload: Vec<u8>) -> Self {
        Self {
            protocol_id: PROTOCOL_ID,
            kind: MessageKind::Data,
            cluster_key,
            payload: Some(ByteBuf::from(payload)),
        }
    }

    /// Builds a payload-less message of the given kind.
    #[must_use]
    pub fn control(kind: MessageKind, cluster_key: ClusterKey) -> Self {
        Self {
            protocol_id: PROTOCOL_ID,
            kind,
            cluster_key,
            payload: None,
        }
    }

    /// Borrows the payload bytes, or an empty slice for control messages.
    #[must_use]
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_ref().map_or(&[], |buf| buf.as_ref())
    }

    /// Serializes for the fabric transport.
    pub fn to_wire(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserializes from fabric transport bytes.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

// ---------------------------------------------------------------------------
// Sanity gate
// ---------------------------------------------------------------------------

/// Reason an inbound message was dropped before reaching a state handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateRejection {
    #[error("protocol id {got} does not match {PROTOCOL_ID}")]
    ProtocolMismatch { got: u32 },
    #[error("message kind {kind} is not accepted")]
    UnsupportedKind { kind: MessageKind },
    #[error("sender {sender} is not in the current succession list")]
    UnknownSender { sender: NodeId },
    #[error("cluster key {got} does not match current key {current}")]
    ClusterKeyMismatch { got: ClusterKey, current: ClusterKey },
}

/// Checks an inbound message against the current round before any state
/// handler sees it.
///
/// Rejections are silently dropped by the caller (logged at debug). A null
/// current key rejects everything, so an orphaned node accepts no messages.
pub fn sanity_check(
    message: &ExchangeMessage,
    from: NodeId,
    current_key: ClusterKey,
    succession: &[NodeId],
) -> Result<(), GateRejection> {
    if message.protocol_id != PROTOCOL_ID {
        return Err(GateRejection::ProtocolMismatch {
            got: message.protocol_id,
        });
    }
    if message.kind == MessageKind::DataNack {
        return Err(GateRejection::UnsupportedKind { kind: message.kind });
    }
    if !succession.contains(&from) {
        return Err(GateRejection::UnknownSender { sender: from });
    }
    if message.cluster_key.is_null() || message.cluster_key != current_key {
        return Err(GateRejection::ClusterKeyMismatch {
            got: message.cluster_key,
            current: current_key,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
