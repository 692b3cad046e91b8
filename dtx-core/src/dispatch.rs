use std::collections::BTreeMap;

use dtx_types::{Dte, TargetId, Xid};

use crate::network::PeerTarget;
use crate::placement::PlacementMap;

/// Polymorphic sub-request target (spec §9, "Polymorphic sub-request
/// targets"): a classified batch is either a single peer (the common,
/// bypass-the-tree case) or a list gathered by classification.
#[derive(Clone, Debug)]
pub enum SubRequestBatch {
    Single(PeerTarget),
    Many(Vec<PeerTarget>),
}

impl SubRequestBatch {
    pub fn peers(&self) -> &[PeerTarget] {
        match self {
            SubRequestBatch::Single(p) => std::slice::from_ref(p),
            SubRequestBatch::Many(ps) => ps,
        }
    }
}

/// Classifies a set of DTX entries into per-`(rank,tag)` batches (spec
/// §4.4, "Target classification"). `local_target` is skipped as the
/// sender; `tag_of` maps a target id to its transport tag (the engine's
/// per-target execution-stream routing, external to this crate).
pub fn classify(
    entries: &[Dte],
    version: u32,
    local_target: TargetId,
    placement: &dyn PlacementMap,
    tag_of: impl Fn(TargetId) -> u32,
) -> BTreeMap<PeerTarget, Vec<Xid>> {
    let mut batches: BTreeMap<PeerTarget, Vec<Xid>> = BTreeMap::new();

    for dte in entries {
        let targets = dte.mbs.targets();
        let skip_first = dte.is_local_leader(local_target);
        for (i, target) in targets.iter().enumerate() {
            if skip_first && i == 0 {
                continue;
            }
            if target.target_id == local_target {
                continue;
            }
            let Ok(location) = placement.find_target(target.target_id) else {
                continue;
            };
            if location.in_ver > dte.version {
                continue;
            }
            if !location.status.is_dispatch_eligible() {
                continue;
            }
            let peer = PeerTarget {
                rank: location.rank,
                tag: tag_of(target.target_id),
            };
            let entry = batches.entry(peer).or_default();
            if entry.last() != Some(&dte.xid) {
                entry.push(dte.xid);
            }
        }
    }

    let _ = version;
    batches
}

/// Builds the single-entry bypass path used when there is exactly one
/// target and the tree classifier would be overkill (spec §4.4): callers
/// flag it `SYNC_COMMIT` themselves via `COMMIT_FLAG_SYNC` when `opc ==
/// COMMIT`.
pub fn single(peer: PeerTarget) -> SubRequestBatch {
    SubRequestBatch::Single(peer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_types::{GroupDesc, Mbs, MbsFlags, Oid, TargetDesc};
    use std::sync::Arc;

    use crate::error::{DtxError, DtxResult};
    use crate::placement::{ObjectLayout, ShardLocation, TargetStatus};

    struct FakePlacement {
        targets: Vec<(TargetId, ShardLocation)>,
    }

    impl PlacementMap for FakePlacement {
        fn find_target(&self, target: TargetId) -> DtxResult<ShardLocation> {
            self.targets
                .iter()
                .find(|(t, _)| *t == target)
                .map(|(_, l)| *l)
                .ok_or(DtxError::NonExist)
        }
        fn place_object(&self, _oid: Oid, _v: u32) -> DtxResult<ObjectLayout> {
            Ok(ObjectLayout::default())
        }
        fn node_count(&self) -> u32 {
            self.targets.len() as u32
        }
        fn target_status(&self, target: TargetId) -> DtxResult<TargetStatus> {
            self.find_target(target).map(|l| l.status)
        }
    }

    fn loc(rank: u32, target: TargetId) -> ShardLocation {
        ShardLocation {
            rank,
            target,
            status: TargetStatus::UpIn,
            in_ver: 0,
        }
    }

    fn sample_dte(xid: Xid, targets: &[TargetId]) -> Dte {
        let mbs = Arc::new(
            Mbs::new(
                MbsFlags::CONTAIN_LEADER,
                targets.iter().map(|&t| TargetDesc { target_id: t }).collect(),
                vec![GroupDesc {
                    redundancy: targets.len() as u32,
                    tgt_cnt: targets.len() as u32,
                    rdonly: false,
                    target_ids: targets.to_vec(),
                }],
                None,
            )
            .unwrap(),
        );
        Dte::new(xid, 1, mbs)
    }

    #[test]
    fn skips_leader_and_self_and_groups_by_rank_tag() {
        let placement = FakePlacement {
            targets: vec![(1, loc(1, 1)), (2, loc(2, 2)), (3, loc(3, 3))],
        };
        let dte = sample_dte(Xid::generate(1), &[1, 2, 3]);
        let batches = classify(&[dte], 1, 1, &placement, |_| 0);
        assert_eq!(batches.len(), 2);
        assert!(batches.contains_key(&PeerTarget { rank: 2, tag: 0 }));
        assert!(batches.contains_key(&PeerTarget { rank: 3, tag: 0 }));
    }

    #[test]
    fn stale_version_target_is_skipped() {
        let mut stale = loc(2, 2);
        stale.in_ver = 10;
        let placement = FakePlacement {
            targets: vec![(1, loc(1, 1)), (2, stale)],
        };
        let dte = sample_dte(Xid::generate(1), &[1, 2]);
        let batches = classify(&[dte], 1, 1, &placement, |_| 0);
        assert!(batches.is_empty());
    }

    #[test]
    fn duplicate_consecutive_xid_not_reinserted() {
        let placement = FakePlacement {
            targets: vec![(1, loc(1, 1)), (2, loc(2, 2))],
        };
        let xid = Xid::generate(1);
        let dte_a = sample_dte(xid, &[1, 2]);
        let dte_b = sample_dte(xid, &[1, 2]);
        let batches = classify(&[dte_a, dte_b], 1, 1, &placement, |_| 0);
        let peer = PeerTarget { rank: 2, tag: 0 };
        assert_eq!(batches[&peer].len(), 1);
    }
}
