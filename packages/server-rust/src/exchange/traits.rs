//! Exchange collaborator contracts.
//!
//! The exchange depends on three external subsystems: the fabric messaging
//! transport, the partition-balance engine, and the heartbeat subsystem.
//! These are trait-only definitions; production wiring and test fakes both
//! implement them.

use std::sync::Arc;

use strata_core::NodeId;

use super::messages::ExchangeMessage;

// ---------------------------------------------------------------------------
// ExchangeMessageHandler
// ---------------------------------------------------------------------------

/// Inbound delivery target registered with the fabric transport.
///
/// The exchange registers itself under this trait at construction; the
/// transport invokes it for every exchange-typed message it receives.
pub trait ExchangeMessageHandler: Send + Sync {
    /// Delivers one inbound exchange message from a remote node.
    fn on_message(&self, from: NodeId, message: ExchangeMessage);
}

// ---------------------------------------------------------------------------
// FabricTransport
// ---------------------------------------------------------------------------

/// Reliable per-peer messaging transport.
///
/// `send` must be non-blocking or bounded-latency: it is called while the
/// exchange lock is held and is expected to queue internally and return
/// promptly. A send failure is logged and dropped; the exchange timer
/// retransmits.
pub trait FabricTransport: Send + Sync {
    /// Queues one message for delivery to a peer.
    fn send(&self, to: NodeId, message: &ExchangeMessage) -> anyhow::Result<()>;

    /// Registers the handler that receives inbound exchange messages.
    fn register_exchange_handler(&self, handler: Arc<dyn ExchangeMessageHandler>);
}

// ---------------------------------------------------------------------------
// PartitionBalance
// ---------------------------------------------------------------------------

/// Partition-balance engine hooks invoked on cluster transitions.
pub trait PartitionBalance: Send + Sync {
    /// Stops new migrations from starting. Invoked on orphan entry.
    fn disallow_migrations(&self);

    /// Waits out in-flight migrations. Invoked on orphan entry after
    /// migrations are disallowed.
    fn synchronize_migrations(&self);

    /// Rebalances partitions from the freshly committed cluster view.
    fn balance(&self);

    /// Blocks client transactions after prolonged orphan state.
    fn revert_to_orphan(&self);
}

// ---------------------------------------------------------------------------
// ManagedSubsystem
// ---------------------------------------------------------------------------

/// Lifecycle contract for long-running subsystems with background workers.
#[async_trait::async_trait]
pub trait ManagedSubsystem: Send + Sync {
    /// Spawns the subsystem's workers. Fails if already started.
    async fn start(&self) -> anyhow::Result<()>;

    /// Signals shutdown and joins the workers. Idempotent.
    async fn stop(&self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// HeartbeatMonitor
// ---------------------------------------------------------------------------

/// Read-only view of the heartbeat subsystem.
///
/// Only the transmit interval is consulted, for retransmission timer sizing.
pub trait HeartbeatMonitor: Send + Sync {
    /// The configured heartbeat transmit interval in milliseconds.
    fn tx_interval_ms(&self) -> u64;
}
