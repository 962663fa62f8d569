//! Namespaces payload codec.
//!
//! The payload of a `Data` message is a packed stream of little-endian
//! records with trailing flexible arrays:
//!
//! ```text
//! namespaces_payload := u32 num_namespaces, namespace_payload * num_namespaces
//! namespace_payload  := u8[32] name (NUL-terminated), u32 num_vinfos, vinfo_payload * num_vinfos
//! vinfo_payload      := u8[16] vinfo, u32 num_pids, u16 pid * num_pids
//! ```
//!
//! Decoding is an explicit bounds-checked reader over the byte slice, and
//! validation is decoding with the result discarded, so the two cannot drift
//! apart. An empty buffer decodes as zero namespaces.

use ahash::AHashMap;
use bytes::{Buf, BufMut};
use strata_core::{
    NamespaceRegistry, PartitionVersion, MAX_NAMESPACES, NAMESPACE_NAME_WIRE_LEN,
    PARTITION_VERSION_SIZE,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reason a namespaces payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload truncated at offset {offset}: {needed} bytes needed, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("namespace count {count} exceeds maximum {MAX_NAMESPACES}")]
    TooManyNamespaces { count: usize },
    #[error("namespace name is not NUL-terminated")]
    UnterminatedName,
    #[error("namespace name is not valid UTF-8")]
    MalformedName,
    #[error("vinfo count {count} exceeds partition count {partition_count}")]
    TooManyVersions {
        count: usize,
        partition_count: usize,
    },
    #[error("pid count {count} exceeds partition count {partition_count}")]
    TooManyPids {
        count: usize,
        partition_count: usize,
    },
    #[error("pid {pid} out of range [0, {partition_count})")]
    PidOutOfRange { pid: u16, partition_count: usize },
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

// ---------------------------------------------------------------------------
// Decoded representation
// ---------------------------------------------------------------------------

/// One vinfo and the partitions currently at that version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGroup {
    pub version: PartitionVersion,
    pub pids: Vec<u16>,
}

/// One namespace entry of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePayload {
    pub name: String,
    pub groups: Vec<VersionGroup>,
}

/// A fully decoded namespaces payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamespacesPayload {
    pub namespaces: Vec<NamespacePayload>,
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Encodes the local namespaces payload into `out`, reusing its capacity.
///
/// Namespaces appear in registry (configuration) order. Within a namespace,
/// partitions are grouped by their current version; null-version slots are
/// omitted entirely. Group order is first-seen partition order.
pub fn build_payload_into(out: &mut Vec<u8>, registry: &NamespaceRegistry) {
    out.clear();
    out.put_u32_le(u32::try_from(registry.len()).unwrap_or(u32::MAX));

    for ns in registry.iter() {
        let versions = ns.snapshot_versions();

        // Transient grouping map: version -> index into `groups`.
        let mut index: AHashMap<PartitionVersion, usize> = AHashMap::new();
        let mut groups: Vec<VersionGroup> = Vec::new();
        for (pid, version) in versions.iter().enumerate() {
            if version.is_null() {
                continue;
            }
            let pid = u16::try_from(pid).unwrap_or(u16::MAX);
            match index.get(version) {
                Some(&i) => groups[i].pids.push(pid),
                None => {
                    index.insert(*version, groups.len());
                    groups.push(VersionGroup {
                        version: *version,
                        pids: vec![pid],
                    });
                }
            }
        }

        let mut name = [0u8; NAMESPACE_NAME_WIRE_LEN];
        name[..ns.name().len()].copy_from_slice(ns.name().as_bytes());
        out.put_slice(&name);

        out.put_u32_le(u32::try_from(groups.len()).unwrap_or(u32::MAX));
        for group in &groups {
            out.put_slice(group.version.as_bytes());
            out.put_u32_le(u32::try_from(group.pids.len()).unwrap_or(u32::MAX));
            for &pid in &group.pids {
                out.put_u16_le(pid);
            }
        }
    }
}

/// Encodes the local namespaces payload into a fresh buffer.
#[must_use]
pub fn build_payload(registry: &NamespaceRegistry) -> Vec<u8> {
    let mut out = Vec::new();
    build_payload_into(&mut out, registry);
    out
}

// ---------------------------------------------------------------------------
// Decode / validate
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over payload bytes.
struct PayloadReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], PayloadError> {
        if self.remaining() < needed {
            return Err(PayloadError::Truncated {
                offset: self.offset,
                needed,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, PayloadError> {
        Ok(self.take(4)?.get_u32_le())
    }

    fn read_u16(&mut self) -> Result<u16, PayloadError> {
        Ok(self.take(2)?.get_u16_le())
    }

    fn read_name(&mut self) -> Result<String, PayloadError> {
        let raw = self.take(NAMESPACE_NAME_WIRE_LEN)?;
        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or(PayloadError::UnterminatedName)?;
        std::str::from_utf8(&raw[..nul])
            .map(str::to_string)
            .map_err(|_| PayloadError::MalformedName)
    }

    fn read_version(&mut self) -> Result<PartitionVersion, PayloadError> {
        let raw = self.take(PARTITION_VERSION_SIZE)?;
        let mut bytes = [0u8; PARTITION_VERSION_SIZE];
        bytes.copy_from_slice(raw);
        Ok(PartitionVersion::from_bytes(bytes))
    }
}

/// Decodes and fully validates a namespaces payload.
///
/// An empty buffer is accepted as a zero-namespace payload. Any other
/// malformation yields a typed error and no partial result.
pub fn decode_payload(
    bytes: &[u8],
    partition_count: usize,
) -> Result<NamespacesPayload, PayloadError> {
    if bytes.is_empty() {
        return Ok(NamespacesPayload::default());
    }

    let mut reader = PayloadReader::new(bytes);

    let num_namespaces = reader.read_u32()? as usize;
    if num_namespaces > MAX_NAMESPACES {
        return Err(PayloadError::TooManyNamespaces {
            count: num_namespaces,
        });
    }

    let mut namespaces = Vec::with_capacity(num_namespaces);
    for _ in 0..num_namespaces {
        let name = reader.read_name()?;

        let num_vinfos = reader.read_u32()? as usize;
        if num_vinfos > partition_count {
            return Err(PayloadError::TooManyVersions {
                count: num_vinfos,
                partition_count,
            });
        }

        let mut groups = Vec::with_capacity(num_vinfos);
        for _ in 0..num_vinfos {
            let version = reader.read_version()?;

            let num_pids = reader.read_u32()? as usize;
            if num_pids > partition_count {
                return Err(PayloadError::TooManyPids {
                    count: num_pids,
                    partition_count,
                });
            }

            let mut pids = Vec::with_capacity(num_pids);
            for _ in 0..num_pids {
                let pid = reader.read_u16()?;
                if usize::from(pid) >= partition_count {
                    return Err(PayloadError::PidOutOfRange {
                        pid,
                        partition_count,
                    });
                }
                pids.push(pid);
            }
            groups.push(VersionGroup { version, pids });
        }
        namespaces.push(NamespacePayload { name, groups });
    }

    if reader.remaining() != 0 {
        return Err(PayloadError::TrailingBytes(reader.remaining()));
    }
    Ok(NamespacesPayload { namespaces })
}

/// Validates payload bytes without keeping the decoded form.
pub fn validate_payload(bytes: &[u8], partition_count: usize) -> Result<(), PayloadError> {
    decode_payload(bytes, partition_count).map(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use strata_core::Namespace;

    use super::*;

    const P: usize = 64;

    fn version(tag: u8) -> PartitionVersion {
        let mut bytes = [0u8; PARTITION_VERSION_SIZE];
        bytes[0] = tag;
        PartitionVersion::from_bytes(bytes)
    }

    fn registry(slots: &[(&str, &[(usize, u8)])]) -> NamespaceRegistry {
        NamespaceRegistry::new(
            slots
                .iter()
                .map(|(name, versions)| {
                    let ns = Namespace::new(name, P);
                    for &(pid, tag) in *versions {
                        ns.set_version(pid, version(tag));
                    }
                    std::sync::Arc::new(ns)
                })
                .collect(),
        )
    }

    /// Normalizes a decoded payload to namespace -> version -> sorted pids,
    /// since group order within a namespace is unspecified.
    fn normalize(payload: &NamespacesPayload) -> BTreeMap<String, BTreeMap<Vec<u8>, Vec<u16>>> {
        payload
            .namespaces
            .iter()
            .map(|ns| {
                let groups = ns
                    .groups
                    .iter()
                    .map(|g| {
                        let mut pids = g.pids.clone();
                        pids.sort_unstable();
                        (g.version.as_bytes().to_vec(), pids)
                    })
                    .collect();
                (ns.name.clone(), groups)
            })
            .collect()
    }

    #[test]
    fn empty_registry_encodes_to_count_only() {
        let bytes = build_payload(&registry(&[]));
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert_eq!(
            decode_payload(&bytes, P).expect("decode"),
            NamespacesPayload::default()
        );
    }

    #[test]
    fn empty_buffer_is_accepted_as_zero_namespaces() {
        assert_eq!(
            decode_payload(&[], P).expect("decode"),
            NamespacesPayload::default()
        );
        assert_eq!(validate_payload(&[], P), Ok(()));
    }

    #[test]
    fn null_slots_are_omitted() {
        let bytes = build_payload(&registry(&[("users", &[(3, 7)])]));
        let decoded = decode_payload(&bytes, P).expect("decode");

        assert_eq!(decoded.namespaces.len(), 1);
        assert_eq!(decoded.namespaces[0].name, "users");
        assert_eq!(
            decoded.namespaces[0].groups,
            vec![VersionGroup {
                version: version(7),
                pids: vec![3],
            }]
        );
    }

    #[test]
    fn grouping_collects_pids_per_version() {
        let bytes = build_payload(&registry(&[(
            "users",
            &[(0, 7), (1, 9), (2, 7), (5, 9), (6, 7)],
        )]));
        let decoded = decode_payload(&bytes, P).expect("decode");
        let norm = normalize(&decoded);

        let groups = &norm["users"];
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&version(7).as_bytes().to_vec()], vec![0, 2, 6]);
        assert_eq!(groups[&version(9).as_bytes().to_vec()], vec![1, 5]);
    }

    #[test]
    fn namespaces_appear_in_configuration_order() {
        let bytes = build_payload(&registry(&[("ns2", &[(0, 1)]), ("ns1", &[])]));
        let decoded = decode_payload(&bytes, P).expect("decode");
        let names: Vec<&str> = decoded.namespaces.iter().map(|ns| ns.name.as_str()).collect();
        assert_eq!(names, vec!["ns2", "ns1"]);
    }

    #[test]
    fn rejects_excessive_namespace_count() {
        let mut bytes = Vec::new();
        bytes.put_u32_le(u32::try_from(MAX_NAMESPACES + 1).expect("fits"));
        assert_eq!(
            decode_payload(&bytes, P),
            Err(PayloadError::TooManyNamespaces {
                count: MAX_NAMESPACES + 1
            })
        );
    }

    #[test]
    fn rejects_unterminated_name() {
        let mut bytes = Vec::new();
        bytes.put_u32_le(1);
        bytes.put_slice(&[b'x'; NAMESPACE_NAME_WIRE_LEN]);
        bytes.put_u32_le(0);
        assert_eq!(decode_payload(&bytes, P), Err(PayloadError::UnterminatedName));
    }

    #[test]
    fn rejects_excessive_vinfo_count() {
        let mut bytes = Vec::new();
        bytes.put_u32_le(1);
        let mut name = [0u8; NAMESPACE_NAME_WIRE_LEN];
        name[0] = b'n';
        bytes.put_slice(&name);
        bytes.put_u32_le(u32::try_from(P + 1).expect("fits"));
        assert_eq!(
            decode_payload(&bytes, P),
            Err(PayloadError::TooManyVersions {
                count: P + 1,
                partition_count: P
            })
        );
    }

    #[test]
    fn rejects_pid_out_of_range() {
        let mut bytes = Vec::new();
        bytes.put_u32_le(1);
        let mut name = [0u8; NAMESPACE_NAME_WIRE_LEN];
        name[0] = b'n';
        bytes.put_slice(&name);
        bytes.put_u32_le(1);
        bytes.put_slice(version(1).as_bytes());
        bytes.put_u32_le(1);
        bytes.put_u16_le(u16::try_from(P).expect("fits"));
        assert_eq!(
            decode_payload(&bytes, P),
            Err(PayloadError::PidOutOfRange {
                pid: u16::try_from(P).expect("fits"),
                partition_count: P
            })
        );
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = build_payload(&registry(&[("users", &[(3, 7)])]));
        bytes.push(0);
        assert_eq!(decode_payload(&bytes, P), Err(PayloadError::TrailingBytes(1)));
    }

    // -- Property tests --------------------------------------------------

    /// Arbitrary namespace configurations: up to 3 namespaces, sparse
    /// non-null versions drawn from a small tag set.
    fn arb_registry() -> impl Strategy<Value = NamespaceRegistry> {
        let slots = proptest::collection::vec((0..P, 1u8..5), 0..12);
        proptest::collection::vec(slots, 0..3).prop_map(|namespaces| {
            NamespaceRegistry::new(
                namespaces
                    .into_iter()
                    .enumerate()
                    .map(|(i, slots)| {
                        let ns = Namespace::new(&format!("ns{i}"), P);
                        for (pid, tag) in slots {
                            ns.set_version(pid, version(tag));
                        }
                        std::sync::Arc::new(ns)
                    })
                    .collect(),
            )
        })
    }

    proptest! {
        /// decode(encode(x)) = x up to vinfo-group ordering.
        #[test]
        fn round_trip_up_to_group_order(registry in arb_registry()) {
            let bytes = build_payload(&registry);
            let decoded = decode_payload(&bytes, P).expect("built payload must decode");

            let mut expected = BTreeMap::new();
            for ns in registry.iter() {
                let mut groups: BTreeMap<Vec<u8>, Vec<u16>> = BTreeMap::new();
                for (pid, v) in ns.snapshot_versions().iter().enumerate() {
                    if !v.is_null() {
                        groups
                            .entry(v.as_bytes().to_vec())
                            .or_default()
                            .push(u16::try_from(pid).expect("fits"));
                    }
                }
                expected.insert(ns.name().to_string(), groups);
            }
            prop_assert_eq!(normalize(&decoded), expected);
        }

        /// encode(x) always validates; any single-byte truncation fails.
        #[test]
        fn validator_soundness(registry in arb_registry()) {
            let bytes = build_payload(&registry);
            prop_assert_eq!(validate_payload(&bytes, P), Ok(()));
            if bytes.len() > 1 {
                prop_assert!(validate_payload(&bytes[..bytes.len() - 1], P).is_err());
            }
        }
    }
}
