//! Namespace structures shared by the exchange and partition-balance engines.
//!
//! A namespace owns one current [`PartitionVersion`] per partition slot, plus
//! a per-cluster view (`succession`, `cluster_versions`, `cluster_size`)
//! rebuilt by the exchange commit engine after every membership change. The
//! current versions are written by the storage/partition subsystem; the
//! cluster view is written only at commit and read by the balance engine.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::partition::{PartitionVersion, PARTITION_COUNT};
use crate::types::NodeId;

/// Maximum number of configured namespaces.
pub const MAX_NAMESPACES: usize = 32;

/// Fixed width of a namespace name on the wire, including the NUL terminator.
pub const NAMESPACE_NAME_WIRE_LEN: usize = 32;

// ---------------------------------------------------------------------------
// NamespaceClusterView
// ---------------------------------------------------------------------------

/// Per-namespace cluster view rebuilt at exchange commit.
///
/// `cluster_versions[node_index][pid]` holds the version the node at
/// `succession[node_index]` reported for partition `pid`, or the null version
/// if the node reported nothing for that slot. `cluster_size` equals
/// `succession.len()` and is the next append index during a commit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamespaceClusterView {
    pub succession: Vec<NodeId>,
    pub cluster_versions: Vec<Vec<PartitionVersion>>,
    pub cluster_size: usize,
}

impl NamespaceClusterView {
    /// Discards all per-cluster data. Called at the start of a commit.
    pub fn clear(&mut self) {
        self.succession.clear();
        self.cluster_versions.clear();
        self.cluster_size = 0;
    }

    /// Appends a node to the view and returns its node index.
    ///
    /// The new node's version row starts out all-null; the caller fills in
    /// the slots the node actually reported.
    pub fn append_node(&mut self, node: NodeId, partition_count: usize) -> usize {
        let index = self.cluster_size;
        self.succession.push(node);
        self.cluster_versions
            .push(vec![PartitionVersion::NULL; partition_count]);
        self.cluster_size += 1;
        index
    }

    /// Looks up the version a node reported for a partition.
    #[must_use]
    pub fn version_at(&self, node_index: usize, pid: usize) -> Option<PartitionVersion> {
        self.cluster_versions
            .get(node_index)
            .and_then(|row| row.get(pid))
            .copied()
    }
}

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// A named data scope owning one version record per partition slot.
#[derive(Debug)]
pub struct Namespace {
    name: String,
    partitions: RwLock<Vec<PartitionVersion>>,
    cluster_view: RwLock<NamespaceClusterView>,
}

impl Namespace {
    /// Creates a namespace with all partition slots at the null version.
    ///
    /// # Panics
    ///
    /// Panics if the name is empty, does not fit the fixed wire array with
    /// its NUL terminator, or contains an interior NUL byte.
    #[must_use]
    pub fn new(name: &str, partition_count: usize) -> Self {
        assert!(
            !name.is_empty() && name.len() < NAMESPACE_NAME_WIRE_LEN,
            "namespace name '{name}' must be 1..{} bytes",
            NAMESPACE_NAME_WIRE_LEN - 1
        );
        assert!(
            !name.as_bytes().contains(&0),
            "namespace name must not contain NUL"
        );
        Self {
            name: name.to_string(),
            partitions: RwLock::new(vec![PartitionVersion::NULL; partition_count]),
            cluster_view: RwLock::new(NamespaceClusterView::default()),
        }
    }

    /// The namespace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of partition slots.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    /// Returns the current version for one partition slot.
    ///
    /// # Panics
    ///
    /// Panics if `pid` is out of range.
    #[must_use]
    pub fn version(&self, pid: usize) -> PartitionVersion {
        self.partitions.read()[pid]
    }

    /// Sets the current version for one partition slot.
    ///
    /// # Panics
    ///
    /// Panics if `pid` is out of range.
    pub fn set_version(&self, pid: usize, version: PartitionVersion) {
        self.partitions.write()[pid] = version;
    }

    /// Clones the current versions of all partition slots.
    ///
    /// The exchange payload builder works from this snapshot so the storage
    /// subsystem can keep mutating live slots during a round.
    #[must_use]
    pub fn snapshot_versions(&self) -> Vec<PartitionVersion> {
        self.partitions.read().clone()
    }

    /// Read access to the per-cluster view.
    pub fn cluster_view(&self) -> RwLockReadGuard<'_, NamespaceClusterView> {
        self.cluster_view.read()
    }

    /// Write access to the per-cluster view. Used by the commit engine only.
    pub fn cluster_view_mut(&self) -> RwLockWriteGuard<'_, NamespaceClusterView> {
        self.cluster_view.write()
    }
}

// ---------------------------------------------------------------------------
// NamespaceRegistry
// ---------------------------------------------------------------------------

/// All configured namespaces, in configuration order.
///
/// The registry is built once at startup and never mutated afterwards, so
/// lookups need no locking. Exchange payloads list namespaces in registry
/// order.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    namespaces: Vec<Arc<Namespace>>,
}

impl NamespaceRegistry {
    /// Builds a registry from namespaces in configuration order.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_NAMESPACES`] namespaces are given or two
    /// namespaces share a name.
    #[must_use]
    pub fn new(namespaces: Vec<Arc<Namespace>>) -> Self {
        assert!(
            namespaces.len() <= MAX_NAMESPACES,
            "at most {MAX_NAMESPACES} namespaces are supported"
        );
        for (i, ns) in namespaces.iter().enumerate() {
            assert!(
                !namespaces[..i].iter().any(|other| other.name() == ns.name()),
                "duplicate namespace name '{}'",
                ns.name()
            );
        }
        Self { namespaces }
    }

    /// Convenience constructor for namespaces with [`PARTITION_COUNT`] slots.
    #[must_use]
    pub fn with_names(names: &[&str]) -> Self {
        Self::new(
            names
                .iter()
                .map(|name| Arc::new(Namespace::new(name, PARTITION_COUNT)))
                .collect(),
        )
    }

    /// Looks up a namespace by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Namespace>> {
        self.namespaces.iter().find(|ns| ns.name() == name)
    }

    /// Iterates namespaces in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Namespace>> {
        self.namespaces.iter()
    }

    /// The number of configured namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    /// Returns `true` if no namespaces are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn version(tag: u8) -> PartitionVersion {
        let mut bytes = [0u8; crate::partition::PARTITION_VERSION_SIZE];
        bytes[0] = tag;
        PartitionVersion::from_bytes(bytes)
    }

    #[test]
    fn new_namespace_starts_all_null() {
        let ns = Namespace::new("users", 64);
        assert_eq!(ns.name(), "users");
        assert_eq!(ns.partition_count(), 64);
        for pid in 0..64 {
            assert!(ns.version(pid).is_null());
        }
    }

    #[test]
    #[should_panic(expected = "must be 1..")]
    fn overlong_name_panics() {
        let _ = Namespace::new(&"n".repeat(NAMESPACE_NAME_WIRE_LEN), 4);
    }

    #[test]
    #[should_panic(expected = "must be 1..")]
    fn empty_name_panics() {
        let _ = Namespace::new("", 4);
    }

    #[test]
    fn set_and_snapshot_versions() {
        let ns = Namespace::new("users", 8);
        ns.set_version(3, version(9));

        let snapshot = ns.snapshot_versions();
        assert_eq!(snapshot.len(), 8);
        assert_eq!(snapshot[3], version(9));
        assert!(snapshot[0].is_null());
    }

    #[test]
    fn cluster_view_append_and_lookup() {
        let mut view = NamespaceClusterView::default();
        assert_eq!(view.append_node(NodeId(0xA), 16), 0);
        assert_eq!(view.append_node(NodeId(0xB), 16), 1);

        view.cluster_versions[1][5] = version(2);

        assert_eq!(view.cluster_size, 2);
        assert_eq!(view.succession, vec![NodeId(0xA), NodeId(0xB)]);
        assert_eq!(view.version_at(1, 5), Some(version(2)));
        assert_eq!(view.version_at(0, 5), Some(PartitionVersion::NULL));
        assert_eq!(view.version_at(2, 0), None);
    }

    #[test]
    fn cluster_view_clear_resets_everything() {
        let mut view = NamespaceClusterView::default();
        view.append_node(NodeId(1), 4);
        view.clear();
        assert_eq!(view, NamespaceClusterView::default());
    }

    #[test]
    fn registry_preserves_configuration_order() {
        let registry = NamespaceRegistry::with_names(&["ns1", "ns2", "ns3"]);
        let names: Vec<&str> = registry.iter().map(|ns| ns.name()).collect();
        assert_eq!(names, vec!["ns1", "ns2", "ns3"]);
        assert_eq!(registry.len(), 3);
        assert!(registry.get("ns2").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    #[should_panic(expected = "duplicate namespace name")]
    fn registry_rejects_duplicate_names() {
        let _ = NamespaceRegistry::with_names(&["ns1", "ns1"]);
    }

    proptest::proptest! {
        /// The view's parallel arrays never diverge, whatever gets appended.
        #[test]
        fn appends_keep_view_arrays_consistent(
            ids in proptest::collection::vec(0u64..1000, 0..40)
        ) {
            let mut view = NamespaceClusterView::default();
            for &id in &ids {
                view.append_node(NodeId(id), 8);
            }
            proptest::prop_assert_eq!(view.cluster_size, ids.len());
            proptest::prop_assert_eq!(view.succession.len(), ids.len());
            proptest::prop_assert_eq!(view.cluster_versions.len(), ids.len());
            for row in &view.cluster_versions {
                proptest::prop_assert_eq!(row.len(), 8);
            }
        }
    }
}
