//! Exchange domain types: configuration, states, events, and timeouts.

use serde::{Deserialize, Serialize};
use strata_core::{ClusterKey, NodeId, PARTITION_COUNT};

/// Period of the exchange timer worker in milliseconds.
pub const TIMER_TICK_MS: u64 = 75;

/// Upper bound on the data retransmission timeout in milliseconds.
pub const SEND_MAX_TIMEOUT_MS: u64 = 30_000;

/// Maximum number of cluster-changed listeners.
pub const MAX_LISTENERS: usize = 7;

// ---------------------------------------------------------------------------
// ExchangeState
// ---------------------------------------------------------------------------

/// Exchange round state for the local node.
///
/// State machine: Orphaned -> Exchanging -> ReadyToCommit -> Rest, with any
/// state falling back to Exchanging on a new membership or to Orphaned when
/// the clustering layer reports the node clusterless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExchangeState {
    /// Not part of any cluster; the cluster key is null.
    Orphaned,
    /// A round is committed and no new membership has arrived.
    Rest,
    /// Data messages are in flight for the current round.
    Exchanging,
    /// All data exchanged; waiting for the principal's commit.
    ReadyToCommit,
}

impl std::fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExchangeState::Orphaned => "orphaned",
            ExchangeState::Rest => "rest",
            ExchangeState::Exchanging => "exchanging",
            ExchangeState::ReadyToCommit => "ready-to-commit",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Membership event produced by the external clustering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusteringEvent {
    /// The local node is no longer part of any cluster.
    Orphaned,
    /// A new membership was formed. Element 0 of the succession list is the
    /// principal.
    Changed {
        cluster_key: ClusterKey,
        succession: Vec<NodeId>,
    },
}

/// Committed-cluster-changed event delivered to registered listeners.
///
/// The succession list is an owned snapshot: the exchange may start a new
/// round and overwrite its live membership while listeners still hold this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterChangedEvent {
    pub cluster_key: ClusterKey,
    pub succession: Vec<NodeId>,
}

// ---------------------------------------------------------------------------
// CommittedSnapshot
// ---------------------------------------------------------------------------

/// Membership most recently applied by a successful exchange round.
///
/// Swapped atomically once per round; accessors observe either the previous
/// or the new snapshot, never intermediate round state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommittedSnapshot {
    pub cluster_key: ClusterKey,
    pub succession: Vec<NodeId>,
}

impl CommittedSnapshot {
    /// The committed cluster size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.succession.len()
    }

    /// The committed principal, if any membership is committed.
    #[must_use]
    pub fn principal(&self) -> Option<NodeId> {
        self.succession.first().copied()
    }
}

// ---------------------------------------------------------------------------
// ExchangeConfig
// ---------------------------------------------------------------------------

/// Configuration for the exchange subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeConfig {
    /// The local node's identifier.
    pub node_id: NodeId,
    /// Clustering quantum interval in milliseconds; drives the orphan
    /// transaction-block timeout.
    pub quantum_interval_ms: u64,
    /// Number of partitions. Configurable for testing; defaults to
    /// `strata_core::PARTITION_COUNT` (4096) in production.
    pub partition_count: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(0),
            quantum_interval_ms: 1000,
            partition_count: PARTITION_COUNT,
        }
    }
}

// ---------------------------------------------------------------------------
// ExchangeTimeouts
// ---------------------------------------------------------------------------

/// Timeouts derived from the heartbeat transmit interval and the clustering
/// quantum. Recomputed per event so heartbeat reconfiguration takes effect
/// without a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeTimeouts {
    pub send_min_ms: u64,
    pub send_step_interval_ms: u64,
    pub ready_to_commit_ms: u64,
    pub orphan_block_ms: u64,
}

impl ExchangeTimeouts {
    /// Derives the timeout set for the given intervals.
    #[must_use]
    pub fn derive(heartbeat_tx_interval_ms: u64, quantum_interval_ms: u64) -> Self {
        let send_min_ms = TIMER_TICK_MS.max(heartbeat_tx_interval_ms / 2);
        Self {
            send_min_ms,
            send_step_interval_ms: send_min_ms.max(heartbeat_tx_interval_ms),
            ready_to_commit_ms: send_min_ms,
            orphan_block_ms: quantum_interval_ms
                .saturating_mul(5)
                .div_ceil(5000)
                .saturating_mul(5000),
        }
    }

    /// Data retransmission timeout as a step function of the time already
    /// spent waiting: `max(min, min(max, min * floor(elapsed / step)))`.
    #[must_use]
    pub fn send_timeout_ms(&self, elapsed_ms: u64) -> u64 {
        let stepped = self
            .send_min_ms
            .saturating_mul(elapsed_ms / self.send_step_interval_ms);
        self.send_min_ms.max(SEND_MAX_TIMEOUT_MS.min(stepped))
    }
}

// ---------------------------------------------------------------------------
// ExchangeHealth
// ---------------------------------------------------------------------------

/// Diagnostic summary of the exchange for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeHealth {
    pub state: ExchangeState,
    pub cluster_key: ClusterKey,
    pub succession_size: usize,
    pub is_principal: bool,
    pub peers_send_acked: usize,
    pub peers_received: usize,
    pub peers_ready_to_commit: usize,
    pub committed_cluster_key: ClusterKey,
    pub committed_size: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_min_floors_at_timer_tick() {
        // Heartbeat of 100ms halves to 50ms, below the 75ms tick floor.
        let t = ExchangeTimeouts::derive(100, 1000);
        assert_eq!(t.send_min_ms, 75);
        assert_eq!(t.send_step_interval_ms, 100);
        assert_eq!(t.ready_to_commit_ms, 75);
    }

    #[test]
    fn send_min_tracks_large_heartbeat() {
        let t = ExchangeTimeouts::derive(400, 1000);
        assert_eq!(t.send_min_ms, 200);
        assert_eq!(t.send_step_interval_ms, 400);
    }

    #[test]
    fn orphan_block_rounds_up_to_five_seconds() {
        assert_eq!(ExchangeTimeouts::derive(150, 1000).orphan_block_ms, 5000);
        assert_eq!(ExchangeTimeouts::derive(150, 1001).orphan_block_ms, 10_000);
        assert_eq!(ExchangeTimeouts::derive(150, 7000).orphan_block_ms, 35_000);
    }

    #[test]
    fn send_timeout_steps_up_and_saturates() {
        let t = ExchangeTimeouts::derive(150, 1000);
        assert_eq!(t.send_min_ms, 75);
        assert_eq!(t.send_step_interval_ms, 150);

        // Below one step interval the floor applies.
        assert_eq!(t.send_timeout_ms(0), 75);
        assert_eq!(t.send_timeout_ms(149), 75);
        // Two steps elapsed: 75 * 2.
        assert_eq!(t.send_timeout_ms(300), 150);
        // Far in the future the cap applies.
        assert_eq!(t.send_timeout_ms(u64::MAX / 2), SEND_MAX_TIMEOUT_MS);
    }

    #[test]
    fn committed_snapshot_accessors() {
        let empty = CommittedSnapshot::default();
        assert_eq!(empty.size(), 0);
        assert_eq!(empty.principal(), None);

        let snap = CommittedSnapshot {
            cluster_key: ClusterKey(0x10),
            succession: vec![NodeId(1), NodeId(2)],
        };
        assert_eq!(snap.size(), 2);
        assert_eq!(snap.principal(), Some(NodeId(1)));
    }

    #[test]
    fn state_display_names() {
        assert_eq!(ExchangeState::Orphaned.to_string(), "orphaned");
        assert_eq!(ExchangeState::ReadyToCommit.to_string(), "ready-to-commit");
    }
}
