//! `Strata` Core -- cluster identity, partition versions, and namespace structures.
//!
//! This crate provides the shared data model for the `Strata` distributed
//! database:
//!
//! - **Types** ([`types`]): `NodeId` and `ClusterKey` identity newtypes
//! - **Partition** ([`partition`]): partition count and the opaque per-partition
//!   version record exchanged after every cluster membership change
//! - **Namespace** ([`namespace`]): namespace structures owning current partition
//!   versions plus the per-cluster version table written at exchange commit
//! - **Clock** ([`clock`]): `ClockSource` abstraction for deterministic testing

pub mod clock;
pub mod namespace;
pub mod partition;
pub mod types;

// Types
pub use types::{ClusterKey, NodeId, SUCCESSION_SOFT_CAPACITY};

// Partition
pub use partition::{PartitionVersion, PARTITION_COUNT, PARTITION_VERSION_SIZE};

// Namespace
pub use namespace::{
    Namespace, NamespaceClusterView, NamespaceRegistry, MAX_NAMESPACES, NAMESPACE_NAME_WIRE_LEN,
};

// Clock
pub use clock::{ClockSource, SystemClock};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
