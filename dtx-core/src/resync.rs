use std::collections::HashMap;
use std::sync::Arc;

use dtx_config::DTX_THRESHOLD_COUNT;
use dtx_types::{DtxState, Hlc, Mbs, Oid, TargetId, Xid};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::election::leader_get;
use crate::error::{DtxResult, ResendSignal};
use crate::handles::ContainerHandle;
use crate::network::{CheckState, DtxTransport, PeerTarget};
use crate::placement::{PlacementMap, TargetStatus};
use crate::vos::VosDtxOps;

/// One row of a DTX-table scan, reduced to what resync needs to classify it
/// (spec §4.5.4 step 2).
#[derive(Clone, Copy, Debug)]
pub struct ResyncEntry {
    pub xid: Xid,
    pub version: u32,
    pub state: DtxState,
    pub oid: Oid,
    pub epoch: Hlc,
}

/// `true` iff the entry is even a candidate for resync attention: not
/// terminal-off-path (`CORRUPTED`/`ORPHAN`), not still unprepared, and not
/// newer than the resyncing engine's own pool-map version (spec §4.5.4 step
/// 2).
pub fn is_resync_candidate(entry: &ResyncEntry, self_version: u32) -> bool {
    !matches!(entry.state, DtxState::Corrupted | DtxState::Orphan | DtxState::Inited | DtxState::Preparing)
        && entry.version <= self_version
}

/// What to do with one candidate entry, post-classification (spec §4.5.4
/// steps 3-4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncAction {
    /// `dte.ver < discard_version`: abort unconditionally (idempotent).
    Discard,
    /// Leader is this engine: resolve via local VOS state.
    Local(TargetId),
    /// Leader is remote: forward `CHECK`/`REFRESH`.
    Forward(TargetId, PeerTarget),
}

pub fn classify(
    entry: &ResyncEntry,
    discard_version: u32,
    self_target: TargetId,
    placement: &dyn PlacementMap,
    mbs: &dtx_types::SharedMbs,
    peer_of: impl Fn(TargetId) -> PeerTarget,
) -> DtxResult<ResyncAction> {
    if entry.version < discard_version {
        return Ok(ResyncAction::Discard);
    }
    let leader = leader_get(mbs, entry.oid, entry.version, placement)?;
    if leader == self_target {
        Ok(ResyncAction::Local(leader))
    } else {
        Ok(ResyncAction::Forward(leader, peer_of(leader)))
    }
}

/// `true` iff every non-read-only redundancy group in `mbs` still has fewer
/// lost targets than its own `redundancy` (spec §8 invariant 4, "No false
/// corruption"): a group only condemns the DTX once it has lost at least
/// `redundancy` of its targets, never for a merely degraded group.
pub fn verify_groups(mbs: &Mbs, healthy: impl Fn(TargetId) -> bool) -> bool {
    mbs.groups()
        .iter()
        .filter(|g| !g.rdonly)
        .all(|g| g.lost_count(&healthy) < g.redundancy)
}

/// Maps a remote `CHECK` reply onto the 5-way resend signal (spec §7,
/// §4.5.4 step 5, `status_handle_one`): a group loss that fails
/// `verify_groups` always wins as `Corrupt` regardless of what the remote
/// reported (spec §8 scenario 6); otherwise committed/committable entries
/// need a local commit, a remote that has no record of the entry needs a
/// local abort (`NeedRetry`, idempotent per spec §7's RPC note), and
/// anything still in flux is ignored.
pub fn status_handle_one(state: CheckState, mbs: &Mbs, healthy: impl Fn(TargetId) -> bool) -> ResendSignal {
    if !verify_groups(mbs, healthy) {
        return ResendSignal::Corrupt;
    }
    match state {
        CheckState::Committed | CheckState::Committable => ResendSignal::NeedCommit,
        CheckState::NonExist => ResendSignal::NeedRetry,
        CheckState::Corrupted => ResendSignal::Corrupt,
        CheckState::Prepared | CheckState::Excluded | CheckState::InProgress => ResendSignal::Ignore,
    }
}

/// Per-container single-flight guard (spec §4.5.4, "Only one resync may be
/// running per container"): `block == true` callers wait for the in-flight
/// run via `Notify`; `block == false` callers return immediately.
#[derive(Default)]
pub struct ResyncGuard {
    inner: Mutex<HashMap<ContainerHandle, Arc<Notify>>>,
}

impl ResyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to start a resync run for `coh`. Returns `None` if one is
    /// already in flight and `block` is `false`; otherwise returns a guard
    /// whose `Drop` releases the slot and wakes waiters.
    pub async fn enter(&self, coh: ContainerHandle, block: bool) -> Option<ResyncLease<'_>> {
        loop {
            let existing = {
                let mut map = self.inner.lock();
                if map.contains_key(&coh) {
                    map.get(&coh).cloned()
                } else {
                    map.insert(coh, Arc::new(Notify::new()));
                    None
                }
            };
            match existing {
                None => {
                    return Some(ResyncLease { guard: self, coh });
                }
                Some(notify) => {
                    if !block {
                        return None;
                    }
                    notify.notified().await;
                }
            }
        }
    }
}

pub struct ResyncLease<'a> {
    guard: &'a ResyncGuard,
    coh: ContainerHandle,
}

impl Drop for ResyncLease<'_> {
    fn drop(&mut self) {
        if let Some(notify) = self.guard.inner.lock().remove(&self.coh) {
            notify.notify_waiters();
        }
    }
}

/// Runs one resync pass over a pre-scanned entry list (spec §4.5.4). The
/// DTX-table iteration itself is `vos`'s concern (out of this crate's
/// scope); the caller supplies the scan as `entries`. Returns the number of
/// entries committed, aborted, and marked corrupted.
#[allow(clippy::too_many_arguments)]
pub async fn resync_pass(
    vos: &dyn VosDtxOps,
    transport: &dyn DtxTransport,
    placement: &dyn PlacementMap,
    coh: ContainerHandle,
    entries: &[ResyncEntry],
    self_target: TargetId,
    self_version: u32,
    discard_version: u32,
    load_mbs: impl Fn(Xid) -> DtxResult<dtx_types::SharedMbs>,
    peer_of: impl Fn(TargetId) -> PeerTarget,
) -> DtxResult<(usize, usize, usize)> {
    let mut to_commit = Vec::new();
    let mut to_abort: Vec<(Xid, Hlc)> = Vec::new();
    let mut to_corrupt: Vec<Xid> = Vec::new();

    let healthy_target = |placement: &dyn PlacementMap, t: TargetId| {
        placement.target_status(t).map(|s| s.is_dispatch_eligible()).unwrap_or(false)
    };

    for entry in entries {
        if !is_resync_candidate(entry, self_version) {
            continue;
        }

        let mbs = match load_mbs(entry.xid) {
            Ok(mbs) => mbs,
            Err(_) => continue,
        };

        let action = match classify(entry, discard_version, self_target, placement, &mbs, &peer_of) {
            Ok(a) => a,
            Err(_) => continue,
        };

        match action {
            ResyncAction::Discard => to_abort.push((entry.xid, entry.epoch)),
            ResyncAction::Local(_) => {
                if !verify_groups(&mbs, |t| healthy_target(placement, t)) {
                    to_corrupt.push(entry.xid);
                    continue;
                }
                match vos.check(coh, entry.xid).await {
                    Ok(DtxState::Committed) | Ok(DtxState::Committable) => to_commit.push(entry.xid),
                    Ok(DtxState::Aborted) | Err(_) => to_abort.push((entry.xid, entry.epoch)),
                    _ => {}
                }
            }
            ResyncAction::Forward(_, peer) => {
                let req = crate::network::CheckReq {
                    coh,
                    version: entry.version,
                    dtx_id: entry.xid,
                };
                match transport.check(peer, req).await {
                    Ok(state) => match status_handle_one(state, &mbs, |t| healthy_target(placement, t)) {
                        ResendSignal::NeedCommit => to_commit.push(entry.xid),
                        ResendSignal::NeedRetry => to_abort.push((entry.xid, entry.epoch)),
                        ResendSignal::Corrupt => to_corrupt.push(entry.xid),
                        ResendSignal::Ignore | ResendSignal::AbortFailed => {}
                    },
                    Err(_) => {}
                }
            }
        }
    }

    let mut committed = 0;
    for chunk in to_commit.chunks(DTX_THRESHOLD_COUNT) {
        committed += vos.commit(coh, chunk, 0).await?.committed;
    }
    let mut aborted = 0;
    for (xid, epoch) in &to_abort {
        match vos.abort(coh, *xid, *epoch).await {
            Ok(()) => aborted += 1,
            Err(e) => tracing::warn!(xid = ?xid, error = %e, signal = ?ResendSignal::AbortFailed, "resync abort failed"),
        }
    }
    let mut corrupted = 0;
    for xid in &to_corrupt {
        // epoch=0 marks the entry CORRUPTED rather than aborting it for real
        // (spec §7, "Corrupted result ... abort with epoch=0").
        match vos.abort(coh, *xid, 0).await {
            Ok(()) => corrupted += 1,
            Err(e) => tracing::warn!(xid = ?xid, error = %e, signal = ?ResendSignal::AbortFailed, "resync corrupt-mark failed"),
        }
    }

    Ok((committed, aborted, corrupted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{AbortReq, CheckReq, CollReply, CollReq, CommitReply, CommitReq, RefreshReply, RefreshReq};
    use crate::placement::{ObjectLayout, ShardLocation, TargetStatus};
    use crate::vos::tests_support::FakeVos;
    use async_trait::async_trait;
    use dtx_types::{GroupDesc, Mbs, MbsFlags, TargetDesc};
    use std::sync::Arc as StdArc;

    struct FakePlacement;
    impl PlacementMap for FakePlacement {
        fn find_target(&self, target: TargetId) -> DtxResult<ShardLocation> {
            Ok(ShardLocation {
                rank: target,
                target,
                status: TargetStatus::UpIn,
                in_ver: 0,
            })
        }
        fn place_object(&self, _oid: Oid, _pool_map_version: u32) -> DtxResult<ObjectLayout> {
            Ok(ObjectLayout { shards: vec![] })
        }
        fn node_count(&self) -> u32 {
            1
        }
        fn target_status(&self, target: TargetId) -> DtxResult<TargetStatus> {
            self.find_target(target).map(|l| l.status)
        }
    }

    struct NoopTransport;
    #[async_trait]
    impl DtxTransport for NoopTransport {
        async fn commit(&self, _peer: PeerTarget, _req: CommitReq) -> DtxResult<CommitReply> {
            unreachable!()
        }
        async fn abort(&self, _peer: PeerTarget, _req: AbortReq) -> DtxResult<()> {
            unreachable!()
        }
        async fn check(&self, _peer: PeerTarget, _req: CheckReq) -> DtxResult<crate::network::CheckState> {
            Ok(crate::network::CheckState::Committed)
        }
        async fn refresh(&self, _peer: PeerTarget, _req: RefreshReq) -> DtxResult<RefreshReply> {
            unreachable!()
        }
        async fn coll_commit(&self, _req: CollReq) -> DtxResult<CollReply> {
            unreachable!()
        }
        async fn coll_abort(&self, _req: CollReq) -> DtxResult<CollReply> {
            unreachable!()
        }
        async fn coll_check(&self, _req: CollReq) -> DtxResult<CollReply> {
            unreachable!()
        }
    }

    fn mbs() -> dtx_types::SharedMbs {
        StdArc::new(
            Mbs::new(
                MbsFlags::CONTAIN_LEADER,
                vec![TargetDesc { target_id: 1 }],
                vec![GroupDesc {
                    redundancy: 1,
                    tgt_cnt: 1,
                    rdonly: false,
                    target_ids: vec![1],
                }],
                None,
            )
            .unwrap(),
        )
    }

    #[test]
    fn discard_applies_below_discard_version() {
        let entry = ResyncEntry {
            xid: Xid::generate(1),
            version: 1,
            state: DtxState::Prepared,
            oid: Oid::new(1, 0),
            epoch: 1,
        };
        let placement = FakePlacement;
        let action = classify(&entry, 5, 1, &placement, &mbs(), |t| PeerTarget { rank: t, tag: 0 }).unwrap();
        assert_eq!(action, ResyncAction::Discard);
    }

    #[test]
    fn local_leader_resolves_to_local_action() {
        let entry = ResyncEntry {
            xid: Xid::generate(1),
            version: 5,
            state: DtxState::Prepared,
            oid: Oid::new(1, 0),
            epoch: 1,
        };
        let placement = FakePlacement;
        let action = classify(&entry, 0, 1, &placement, &mbs(), |t| PeerTarget { rank: t, tag: 0 }).unwrap();
        assert_eq!(action, ResyncAction::Local(1));
    }

    #[test]
    fn inited_entries_are_not_resync_candidates() {
        let entry = ResyncEntry {
            xid: Xid::generate(1),
            version: 1,
            state: DtxState::Inited,
            oid: Oid::new(1, 0),
            epoch: 1,
        };
        assert!(!is_resync_candidate(&entry, 10));
    }

    #[test]
    fn newer_than_self_is_not_a_candidate() {
        let entry = ResyncEntry {
            xid: Xid::generate(1),
            version: 20,
            state: DtxState::Prepared,
            oid: Oid::new(1, 0),
            epoch: 1,
        };
        assert!(!is_resync_candidate(&entry, 10));
    }

    #[tokio::test]
    async fn resync_pass_commits_locally_resolvable_entries() {
        let vos = FakeVos::new();
        let coh = ContainerHandle(1);
        let xid = Xid::generate(1);
        vos.mark_committable(coh, xid).await.unwrap();

        let entries = vec![ResyncEntry {
            xid,
            version: 5,
            state: DtxState::Committable,
            oid: Oid::new(1, 0),
            epoch: 1,
        }];
        let placement = FakePlacement;
        let transport = NoopTransport;
        let (committed, aborted, corrupted) = resync_pass(
            &vos,
            &transport,
            &placement,
            coh,
            &entries,
            1,
            5,
            0,
            |_| Ok(mbs()),
            |t| PeerTarget { rank: t, tag: 0 },
        )
        .await
        .unwrap();
        assert_eq!(committed, 1);
        assert_eq!(aborted, 0);
        assert_eq!(corrupted, 0);
    }

    #[test]
    fn group_with_no_losses_verifies() {
        assert!(verify_groups(&mbs(), |_| true));
    }

    #[test]
    fn group_losing_at_least_redundancy_targets_fails_verification() {
        let mbs = Mbs::new(
            MbsFlags::CONTAIN_LEADER,
            vec![TargetDesc { target_id: 1 }, TargetDesc { target_id: 2 }],
            vec![GroupDesc {
                redundancy: 2,
                tgt_cnt: 2,
                rdonly: false,
                target_ids: vec![1, 2],
            }],
            None,
        )
        .unwrap();
        assert!(!verify_groups(&mbs, |t| t != 1 && t != 2));
    }

    #[test]
    fn status_handle_one_reports_corrupt_regardless_of_check_state() {
        let mbs = Mbs::new(
            MbsFlags::CONTAIN_LEADER,
            vec![TargetDesc { target_id: 1 }, TargetDesc { target_id: 2 }],
            vec![GroupDesc {
                redundancy: 2,
                tgt_cnt: 2,
                rdonly: false,
                target_ids: vec![1, 2],
            }],
            None,
        )
        .unwrap();
        let signal = status_handle_one(CheckState::Prepared, &mbs, |_| false);
        assert_eq!(signal, ResendSignal::Corrupt);
    }

    #[tokio::test]
    async fn resync_pass_marks_corrupted_entry_when_group_is_unrecoverable() {
        let vos = FakeVos::new();
        let coh = ContainerHandle(1);
        let xid = Xid::generate(1);
        vos.mark_committable(coh, xid).await.unwrap();

        let entries = vec![ResyncEntry {
            xid,
            version: 5,
            state: DtxState::Committable,
            oid: Oid::new(1, 0),
            epoch: 1,
        }];

        struct AllExcludedPlacement;
        impl PlacementMap for AllExcludedPlacement {
            fn find_target(&self, target: TargetId) -> DtxResult<ShardLocation> {
                Ok(ShardLocation {
                    rank: target,
                    target,
                    status: TargetStatus::Excluded,
                    in_ver: 0,
                })
            }
            fn place_object(&self, _oid: Oid, _pool_map_version: u32) -> DtxResult<ObjectLayout> {
                Ok(ObjectLayout { shards: vec![] })
            }
            fn node_count(&self) -> u32 {
                1
            }
            fn target_status(&self, _target: TargetId) -> DtxResult<TargetStatus> {
                Ok(TargetStatus::Excluded)
            }
        }

        let corrupt_mbs = Mbs::new(
            MbsFlags::CONTAIN_LEADER,
            vec![TargetDesc { target_id: 1 }, TargetDesc { target_id: 2 }],
            vec![GroupDesc {
                redundancy: 2,
                tgt_cnt: 2,
                rdonly: false,
                target_ids: vec![1, 2],
            }],
            None,
        )
        .unwrap();

        let placement = AllExcludedPlacement;
        let transport = NoopTransport;
        let (committed, aborted, corrupted) = resync_pass(
            &vos,
            &transport,
            &placement,
            coh,
            &entries,
            1,
            5,
            0,
            |_| Ok(StdArc::new(corrupt_mbs.clone())),
            |t| PeerTarget { rank: t, tag: 0 },
        )
        .await
        .unwrap();
        assert_eq!(committed, 0);
        assert_eq!(aborted, 0);
        assert_eq!(corrupted, 1);
        assert_eq!(vos.state_of(coh, xid), Some(DtxState::Corrupted));
    }

    #[tokio::test]
    async fn guard_blocks_second_entrant_until_first_drops() {
        let guard = ResyncGuard::new();
        let coh = ContainerHandle(1);
        let lease = guard.enter(coh, false).await.unwrap();
        assert!(guard.enter(coh, false).await.is_none());
        drop(lease);
        assert!(guard.enter(coh, false).await.is_some());
    }
}
