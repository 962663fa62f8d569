//! Cluster identity newtypes shared by the exchange and balance subsystems.
//!
//! Node and cluster-key identifiers are opaque 64-bit values assigned by the
//! clustering layer. They are rendered as lowercase hex in logs and info
//! output, matching the administrative tooling format.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Soft capacity of a succession list. Larger memberships are handled but the
/// exchange makes no latency promises beyond this size.
pub const SUCCESSION_SOFT_CAPACITY: usize = 200;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Opaque 64-bit node identifier assigned by the clustering layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// ClusterKey
// ---------------------------------------------------------------------------

/// Opaque 64-bit identifier of a membership generation.
///
/// A fresh key is issued by the clustering layer on every membership change.
/// The zero key is reserved and means "no cluster" (orphaned).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ClusterKey(pub u64);

impl ClusterKey {
    /// The reserved "no cluster" key.
    pub const NULL: ClusterKey = ClusterKey(0);

    /// Returns `true` for the reserved "no cluster" key.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl From<u64> for ClusterKey {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
