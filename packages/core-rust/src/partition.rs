//! Partition constants and the opaque per-partition version record.
//!
//! `Strata` distributes every namespace across a fixed set of hash
//! partitions. Each partition slot carries one version record describing the
//! lineage of the data it holds. The exchange subsystem treats the record as
//! opaque bytes: it only ever copies, compares, and groups them. The
//! partition-balance engine is the sole interpreter of the contents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of partitions per namespace, fixed system-wide.
pub const PARTITION_COUNT: usize = 4096;

/// Size in bytes of one partition version record on the wire.
pub const PARTITION_VERSION_SIZE: usize = 16;

// ---------------------------------------------------------------------------
// PartitionVersion
// ---------------------------------------------------------------------------

/// Fixed-size opaque version record for one partition slot.
///
/// The all-zero record is the distinguished null version: it marks a
/// partition slot for which this node holds no data. Null slots are omitted
/// from exchange payloads entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PartitionVersion(#[serde(with = "serde_bytes")] pub [u8; PARTITION_VERSION_SIZE]);

impl PartitionVersion {
    /// The distinguished null version (no data for this partition).
    pub const NULL: PartitionVersion = PartitionVersion([0; PARTITION_VERSION_SIZE]);

    /// Returns `true` for the distinguished null version.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == [0; PARTITION_VERSION_SIZE]
    }

    /// Borrows the raw record bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PARTITION_VERSION_SIZE] {
        &self.0
    }

    /// Builds a version from raw record bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; PARTITION_VERSION_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PartitionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
