//! Commit engine: applies accumulated peer payloads into namespace views.

use strata_core::{NamespaceRegistry, NodeId};
use tracing::warn;

use super::codec;
use super::peers::PeerTable;

/// Rebuilds every namespace's cluster view from the stored peer payloads.
///
/// Nodes are applied in succession order. A node joins a namespace's
/// succession only if its payload carries that namespace, so per-namespace
/// successions can be shorter than the cluster succession. Namespaces a peer
/// reports that are not configured locally are skipped with a warning.
pub(crate) fn apply(
    namespaces: &NamespaceRegistry,
    succession: &[NodeId],
    peers: &PeerTable,
    partition_count: usize,
) {
    for ns in namespaces.iter() {
        ns.cluster_view_mut().clear();
    }

    for &node in succession {
        let Some(peer) = peers.get(node) else {
            warn!(%node, "no stored payload for succession member at commit");
            continue;
        };
        // Payloads were validated on receipt; a decode failure here means the
        // buffer was corrupted in memory, so skipping the node is the only
        // recovery.
        let payload = match codec::decode_payload(peer.payload(), partition_count) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%node, %error, "undecodable stored payload at commit, skipping node");
                continue;
            }
        };

        for entry in &payload.namespaces {
            let Some(ns) = namespaces.get(&entry.name) else {
                warn!(%node, namespace = %entry.name, "skipping unknown namespace in peer payload");
                continue;
            };
            let mut view = ns.cluster_view_mut();
            let node_index = view.append_node(node, partition_count);
            for group in &entry.groups {
                for &pid in &group.pids {
                    view.cluster_versions[node_index][usize::from(pid)] = group.version;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
