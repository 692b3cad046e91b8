use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::flags::MbsFlags;

pub type TargetId = u32;

/// Logical object identifier (container-local). Modelled as the usual
/// two-word DAOS object id (high word carries type/shard bits, low word is
/// the sequence); opaque beyond ordering and equality here.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Oid {
    pub hi: u64,
    pub lo: u64,
}

impl Oid {
    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }
}

impl std::fmt::Debug for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "oid({:#x}.{:#x})", self.hi, self.lo)
    }
}

/// Distribution-key hash; together with `Oid` forms the CoS cache key.
pub type DkeyHash = u64;

/// A single participant target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDesc {
    pub target_id: TargetId,
}

/// A redundancy group: the subset of targets holding one replicated (or
/// erasure-coded) copy of the object's data for this transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDesc {
    /// Number of targets required for this group to be considered intact.
    pub redundancy: u32,
    pub tgt_cnt: u32,
    pub rdonly: bool,
    pub target_ids: Vec<TargetId>,
}

impl GroupDesc {
    /// Number of the group's declared targets that are *not* present in
    /// `healthy`, used by `verify_groups` (spec §8, invariant 4).
    pub fn lost_count(&self, healthy: impl Fn(TargetId) -> bool) -> u32 {
        self.target_ids
            .iter()
            .filter(|&&t| !healthy(t))
            .count() as u32
    }
}

/// Trailing block present only on a collective DTX's membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollTargetBlock {
    /// Bitmap of local VOS targets participating on the current engine.
    pub bitmap: Vec<u8>,
    pub target_ids_subset: Vec<TargetId>,
    pub fdom_lvl: u32,
    pub pda: u32,
    pub pdom_lvl: u32,
}

/// Opaque membership descriptor (`mbs`): who participates in a transaction,
/// grouped into redundancy groups, plus flags classifying the transaction.
/// Treated as an immutable, shareable, serializable blob once prepared
/// (invariant 2): callers pass it around as `SharedMbs = Arc<Mbs>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mbs {
    flags: MbsFlags,
    grp_cnt: u32,
    targets: Vec<TargetDesc>,
    groups: Vec<GroupDesc>,
    coll_target: Option<CollTargetBlock>,
}

pub type SharedMbs = Arc<Mbs>;

#[derive(Debug, thiserror::Error)]
pub enum MbsError {
    #[error("membership bytes are malformed: {0}")]
    Malformed(String),
    #[error("membership flags claim COLL_TARGET but no coll_target block is present")]
    MissingCollTarget,
}

impl Mbs {
    pub fn new(
        flags: MbsFlags,
        targets: Vec<TargetDesc>,
        groups: Vec<GroupDesc>,
        coll_target: Option<CollTargetBlock>,
    ) -> Result<Self, MbsError> {
        if flags.contains(MbsFlags::COLL_TARGET) && coll_target.is_none() {
            return Err(MbsError::MissingCollTarget);
        }
        let grp_cnt = groups.len() as u32;
        Ok(Self {
            flags,
            grp_cnt,
            targets,
            groups,
            coll_target,
        })
    }

    pub fn flags(&self) -> MbsFlags {
        self.flags
    }

    pub fn tgt_cnt(&self) -> u32 {
        self.targets.len() as u32
    }

    pub fn grp_cnt(&self) -> u32 {
        self.grp_cnt
    }

    pub fn targets(&self) -> &[TargetDesc] {
        &self.targets
    }

    pub fn groups(&self) -> &[GroupDesc] {
        &self.groups
    }

    pub fn coll_target(&self) -> Option<&CollTargetBlock> {
        self.coll_target.as_ref()
    }

    pub fn is_collective(&self) -> bool {
        self.flags.contains(MbsFlags::COLL_TARGET)
    }

    /// First target entry, which is the initial leader whenever
    /// `CONTAIN_LEADER` is set (invariant 4).
    pub fn first_target(&self) -> Option<TargetId> {
        self.targets.first().map(|t| t.target_id)
    }

    /// Serialized size of the membership; drives the inline-vs-loaded
    /// decision at `DTX_INLINE_MBS_SIZE` (owned by `dtx-config`, compared by
    /// the caller against this value).
    pub fn size_bytes(&self) -> usize {
        bcs::to_bytes(self).map(|b| b.len()).unwrap_or(0)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MbsError> {
        bcs::to_bytes(self).map_err(|e| MbsError::Malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MbsError> {
        bcs::from_bytes(bytes).map_err(|e| MbsError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Mbs {
        Mbs::new(
            MbsFlags::CONTAIN_LEADER | MbsFlags::SRDG_REP,
            vec![
                TargetDesc { target_id: 1 },
                TargetDesc { target_id: 2 },
                TargetDesc { target_id: 3 },
            ],
            vec![GroupDesc {
                redundancy: 3,
                tgt_cnt: 3,
                rdonly: false,
                target_ids: vec![1, 2, 3],
            }],
            None,
        )
        .unwrap()
    }

    #[test]
    fn byte_roundtrip_preserves_fields() {
        let mbs = sample();
        let bytes = mbs.to_bytes().unwrap();
        let back = Mbs::from_bytes(&bytes).unwrap();
        assert_eq!(mbs, back);
        assert_eq!(back.tgt_cnt(), 3);
        assert_eq!(back.grp_cnt(), 1);
        assert_eq!(back.flags(), mbs.flags());
    }

    #[test]
    fn collective_flag_requires_coll_target_block() {
        let err = Mbs::new(MbsFlags::COLL_TARGET, vec![], vec![], None).unwrap_err();
        assert!(matches!(err, MbsError::MissingCollTarget));
    }

    #[test]
    fn group_lost_count_counts_unhealthy_targets() {
        let group = GroupDesc {
            redundancy: 3,
            tgt_cnt: 3,
            rdonly: false,
            target_ids: vec![1, 2, 3],
        };
        let lost = group.lost_count(|t| t != 2);
        assert_eq!(lost, 1);
    }
}
