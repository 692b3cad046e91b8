use dtx_types::{Oid, SharedMbs, TargetId};

use crate::error::{DtxError, DtxResult};
use crate::placement::{PlacementMap, TargetStatus};

/// Deterministic leader election (spec §4.1, `leader_get`). Every
/// participant computes the same leader independently given `(mbs, oid,
/// version)`: testable property 11.
pub fn leader_get(
    mbs: &SharedMbs,
    oid: Oid,
    version: u32,
    placement: &dyn PlacementMap,
) -> DtxResult<TargetId> {
    for target in mbs.targets() {
        let location = placement.find_target(target.target_id)?;
        if location.status == TargetStatus::UpIn && location.in_ver <= version {
            return Ok(target.target_id);
        }
    }

    if !mbs.is_collective() {
        return Err(DtxError::NonExist);
    }

    let layout = placement.place_object(oid, version)?;
    layout
        .shards
        .iter()
        .find(|s| s.status.is_dispatch_eligible() && s.in_ver <= version)
        .map(|s| s.target)
        .ok_or(DtxError::NonExist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_types::{GroupDesc, Mbs, MbsFlags, TargetDesc};
    use std::sync::Arc;

    use crate::network::RankId;
    use crate::placement::{ObjectLayout, ShardLocation};

    struct FakePlacement {
        targets: Vec<(TargetId, ShardLocation)>,
    }

    impl PlacementMap for FakePlacement {
        fn find_target(&self, target: TargetId) -> DtxResult<ShardLocation> {
            self.targets
                .iter()
                .find(|(t, _)| *t == target)
                .map(|(_, loc)| *loc)
                .ok_or(DtxError::NonExist)
        }

        fn place_object(&self, _oid: Oid, _pool_map_version: u32) -> DtxResult<ObjectLayout> {
            Ok(ObjectLayout {
                shards: self.targets.iter().map(|(_, l)| *l).collect(),
            })
        }

        fn node_count(&self) -> u32 {
            self.targets.len() as u32
        }

        fn target_status(&self, target: TargetId) -> DtxResult<TargetStatus> {
            self.find_target(target).map(|l| l.status)
        }
    }

    fn loc(rank: RankId, target: TargetId, status: TargetStatus, in_ver: u32) -> ShardLocation {
        ShardLocation { rank, target, status, in_ver }
    }

    fn mbs_with_targets(ids: &[TargetId]) -> SharedMbs {
        Arc::new(
            Mbs::new(
                MbsFlags::CONTAIN_LEADER,
                ids.iter().map(|&t| TargetDesc { target_id: t }).collect(),
                vec![GroupDesc {
                    redundancy: ids.len() as u32,
                    tgt_cnt: ids.len() as u32,
                    rdonly: false,
                    target_ids: ids.to_vec(),
                }],
                None,
            )
            .unwrap(),
        )
    }

    #[test]
    fn first_upin_qualifying_target_is_leader() {
        let placement = FakePlacement {
            targets: vec![
                (1, loc(1, 1, TargetStatus::Down, 0)),
                (2, loc(2, 2, TargetStatus::UpIn, 1)),
            ],
        };
        let mbs = mbs_with_targets(&[1, 2]);
        let leader = leader_get(&mbs, Oid::new(1, 0), 5, &placement).unwrap();
        assert_eq!(leader, 2);
    }

    #[test]
    fn election_is_deterministic_across_calls() {
        let placement = FakePlacement {
            targets: vec![(1, loc(1, 1, TargetStatus::UpIn, 0))],
        };
        let mbs = mbs_with_targets(&[1]);
        let a = leader_get(&mbs, Oid::new(1, 0), 5, &placement).unwrap();
        let b = leader_get(&mbs, Oid::new(1, 0), 5, &placement).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn no_qualifying_target_and_non_collective_is_nonexist() {
        let placement = FakePlacement {
            targets: vec![(1, loc(1, 1, TargetStatus::Down, 0))],
        };
        let mbs = mbs_with_targets(&[1]);
        let err = leader_get(&mbs, Oid::new(1, 0), 5, &placement).unwrap_err();
        assert!(matches!(err, DtxError::NonExist));
    }
}
