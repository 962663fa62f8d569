//! Cluster-change exchange protocol module.
//!
//! After every cluster membership change, every member must learn every other
//! member's per-partition version information and commit the result in
//! lockstep before partition rebalancing proceeds. This module provides the
//! exchange state machine, its wire messages and payload codec, the per-peer
//! tracking table, the commit engine, and the timer/publisher workers.

pub mod codec;
pub mod messages;
pub mod peers;
pub mod publisher;
pub mod service;
pub mod traits;
pub mod types;

mod commit;
mod machine;
mod timer;

// ---------------------------------------------------------------------------
// Re-exports — flat public API
// ---------------------------------------------------------------------------

// service
pub use service::Exchange;

// types
pub use types::{
    ClusterChangedEvent, ClusteringEvent, CommittedSnapshot, ExchangeConfig, ExchangeHealth,
    ExchangeState, ExchangeTimeouts, MAX_LISTENERS, SEND_MAX_TIMEOUT_MS, TIMER_TICK_MS,
};

// messages
pub use messages::{ExchangeMessage, GateRejection, MessageKind, PROTOCOL_ID};

// codec
pub use codec::{
    build_payload, decode_payload, validate_payload, NamespacePayload, NamespacesPayload,
    PayloadError, VersionGroup,
};

// peers
pub use peers::{PeerState, PeerTable};

// publisher
pub use publisher::{ClusterChangedListener, EventPublisher};

// traits
pub use traits::{
    ExchangeMessageHandler, FabricTransport, HeartbeatMonitor, ManagedSubsystem, PartitionBalance,
};

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
