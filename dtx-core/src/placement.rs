use dtx_types::{Oid, TargetId};

use crate::error::DtxResult;
use crate::network::RankId;

/// Health/membership status of a pool-map target. Only `Up`, `UpIn` and
/// `Drain` are eligible DTX participants (spec §4.4, target classification).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetStatus {
    Up,
    UpIn,
    Drain,
    Down,
    Excluded,
}

impl TargetStatus {
    pub fn is_dispatch_eligible(self) -> bool {
        matches!(self, TargetStatus::Up | TargetStatus::UpIn | TargetStatus::Drain)
    }
}

/// A single resolved shard: which rank/target holds it, and what pool-map
/// version it joined at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardLocation {
    pub rank: RankId,
    pub target: TargetId,
    pub status: TargetStatus,
    /// Pool-map version this target joined the map at (`in_ver`).
    pub in_ver: u32,
}

/// An object's resolved layout: one shard per declared redundancy slot.
#[derive(Clone, Debug, Default)]
pub struct ObjectLayout {
    pub shards: Vec<ShardLocation>,
}

/// Pool-map / placement seam (spec §1, "the pool-map / placement service").
/// Mirrors `pl_map_find`/`pl_obj_place`/`pool_map_find_target` etc.
pub trait PlacementMap: Send + Sync {
    /// Resolves a target id to its current rank, status and join version.
    fn find_target(&self, target: TargetId) -> DtxResult<ShardLocation>;

    /// Places `oid` to obtain its current layout (used when `leader_get`
    /// can't find a qualifying target directly in the mbs, or for
    /// collective DTX remote resolution).
    fn place_object(&self, oid: Oid, pool_map_version: u32) -> DtxResult<ObjectLayout>;

    /// Total number of engine ranks known to the pool map, used to size
    /// collective DTX hint arrays.
    fn node_count(&self) -> u32;

    fn target_status(&self, target: TargetId) -> DtxResult<TargetStatus>;
}
