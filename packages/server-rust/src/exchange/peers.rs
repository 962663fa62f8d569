//! Per-peer exchange tracking table.
//!
//! One entry per node in the current succession list. Entries carry the round
//! flags and an owned buffer holding the peer's last accepted payload. The
//! table is only ever touched under the exchange lock.

use std::collections::HashMap;

use strata_core::NodeId;

/// Payload buffers grow in steps of this many bytes.
const BUFFER_STEP: usize = 1024;

// ---------------------------------------------------------------------------
// PeerState
// ---------------------------------------------------------------------------

/// Round-tracking state for one succession member.
#[derive(Debug, Default)]
pub struct PeerState {
    /// Our data message to this peer has been acked.
    pub send_acked: bool,
    /// This peer's payload has arrived and passed validation.
    pub received: bool,
    /// This peer reported ready-to-commit. Meaningful only at the principal.
    pub is_ready_to_commit: bool,
    data: Vec<u8>,
}

impl PeerState {
    /// Clears the flags and truncates the payload buffer, keeping its
    /// capacity for the next round.
    fn reset_round(&mut self) {
        self.send_acked = false;
        self.received = false;
        self.is_ready_to_commit = false;
        self.data.clear();
    }

    /// Stores a validated payload, growing the buffer to the next 1 KiB
    /// multiple when it does not fit.
    pub fn store_payload(&mut self, bytes: &[u8]) {
        self.data.clear();
        let needed = bytes.len().next_multiple_of(BUFFER_STEP);
        if self.data.capacity() < needed {
            self.data.reserve_exact(needed);
        }
        self.data.extend_from_slice(bytes);
    }

    /// The peer's stored payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// PeerTable
// ---------------------------------------------------------------------------

/// Node-keyed peer state, kept in sync with the succession list on every
/// round reset.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<NodeId, PeerState>,
}

impl PeerTable {
    /// Synchronizes the key set with a new succession list: departed members
    /// are dropped (freeing their buffers), retained members keep their
    /// buffers with flags reset, and new members start zeroed.
    pub fn reset_to_membership(&mut self, succession: &[NodeId]) {
        self.peers.retain(|id, _| succession.contains(id));
        for &id in succession {
            self.peers
                .entry(id)
                .and_modify(PeerState::reset_round)
                .or_default();
        }
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&PeerState> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut PeerState> {
        self.peers.get_mut(&id)
    }

    /// All tracked node ids, in no particular order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.peers.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Nodes whose data message we have not seen acked yet.
    #[must_use]
    pub fn send_unacked(&self) -> Vec<NodeId> {
        self.scan(|p| !p.send_acked)
    }

    /// Nodes whose payload has not arrived yet.
    #[must_use]
    pub fn not_received(&self) -> Vec<NodeId> {
        self.scan(|p| !p.received)
    }

    /// Nodes that have not reported ready-to-commit yet.
    #[must_use]
    pub fn not_ready_to_commit(&self) -> Vec<NodeId> {
        self.scan(|p| !p.is_ready_to_commit)
    }

    fn scan(&self, pred: impl Fn(&PeerState) -> bool) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|(_, state)| pred(state))
            .map(|(&id, _)| id)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut nodes: Vec<NodeId>) -> Vec<NodeId> {
        nodes.sort_unstable();
        nodes
    }

    #[test]
    fn reset_builds_membership_entries() {
        let mut table = PeerTable::default();
        table.reset_to_membership(&[NodeId(1), NodeId(2), NodeId(3)]);

        assert_eq!(table.len(), 3);
        assert_eq!(
            sorted(table.node_ids()),
            vec![NodeId(1), NodeId(2), NodeId(3)]
        );
        assert_eq!(sorted(table.send_unacked()), sorted(table.node_ids()));
        assert_eq!(sorted(table.not_received()), sorted(table.node_ids()));
    }

    #[test]
    fn reset_drops_departed_and_clears_retained() {
        let mut table = PeerTable::default();
        table.reset_to_membership(&[NodeId(1), NodeId(2)]);

        let peer = table.get_mut(NodeId(1)).expect("present");
        peer.send_acked = true;
        peer.received = true;
        peer.store_payload(&[1, 2, 3]);

        table.reset_to_membership(&[NodeId(1), NodeId(3)]);

        assert!(table.get(NodeId(2)).is_none());
        let retained = table.get(NodeId(1)).expect("retained");
        assert!(!retained.send_acked);
        assert!(!retained.received);
        assert!(retained.payload().is_empty());
        assert!(table.get(NodeId(3)).is_some());
    }

    #[test]
    fn reset_to_empty_clears_table() {
        let mut table = PeerTable::default();
        table.reset_to_membership(&[NodeId(1)]);
        table.reset_to_membership(&[]);
        assert!(table.is_empty());
    }

    #[test]
    fn scans_track_flags() {
        let mut table = PeerTable::default();
        table.reset_to_membership(&[NodeId(1), NodeId(2)]);

        table.get_mut(NodeId(1)).expect("present").send_acked = true;
        table.get_mut(NodeId(2)).expect("present").received = true;

        assert_eq!(table.send_unacked(), vec![NodeId(2)]);
        assert_eq!(table.not_received(), vec![NodeId(1)]);
        assert_eq!(sorted(table.not_ready_to_commit()), vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn store_payload_grows_in_kib_steps() {
        let mut state = PeerState::default();

        state.store_payload(&[7; 10]);
        assert_eq!(state.payload(), &[7; 10]);
        assert_eq!(state.data.capacity(), 1024);

        state.store_payload(&[8; 1025]);
        assert_eq!(state.payload().len(), 1025);
        assert_eq!(state.data.capacity(), 2048);

        // Shrinking payloads keep the grown buffer.
        state.store_payload(&[9; 4]);
        assert_eq!(state.payload(), &[9; 4]);
        assert_eq!(state.data.capacity(), 2048);
    }
}
