use dtx_types::{SharedMbs, TargetId, Xid};

use crate::chore::{ChoreStep, DispatchCursor};
use crate::error::{DtxError, DtxResult};
use crate::handle::{Dth, HandleFlags};
use crate::handles::ContainerHandle;
use crate::network::{CommitReq, DtxTransport, PeerTarget};

/// Per-target completion slot (spec §3, `dtx_sub_status`). `complete` and
/// `result` are written exactly once, by the completion of that target's
/// RPC — the single-writer-per-slot invariant from spec §5.
#[derive(Clone, Debug)]
pub struct SubStatus {
    pub target: TargetId,
    pub peer: PeerTarget,
    pub complete: bool,
    pub result: DtxResult<()>,
    pub version: u32,
    /// Forwarded via the delayed/priority phase rather than phase 1.
    pub delayed: bool,
}

/// Leader-side state for an in-flight or just-finished transaction (spec
/// §3, `dlh`). Embeds a non-leader `Dth` plus the per-target fan-out
/// bookkeeping.
pub struct LeaderHandle {
    pub handle: Dth,
    pub subs: Vec<SubStatus>,
    pub allow_failure: Option<DtxError>,
    pub coll: bool,
    pub need_agg: bool,
    pub agg_done: bool,
}

impl LeaderHandle {
    pub fn new(handle: Dth, subs: Vec<SubStatus>) -> Self {
        Self {
            handle,
            subs,
            allow_failure: None,
            coll: false,
            need_agg: false,
            agg_done: false,
        }
    }

    pub fn normal_sub_cnt(&self) -> usize {
        self.subs.iter().filter(|s| !s.delayed).count()
    }

    pub fn delay_sub_cnt(&self) -> usize {
        self.subs.iter().filter(|s| s.delayed).count()
    }

    /// Leader fan-out (spec §4.4, `leader_exec_ops`): phase 1 sends to all
    /// non-delayed targets in `DTX_REG_RPC_STEP_LENGTH` chunks; phase 2
    /// sends delayed targets in `DTX_PRI_RPC_STEP_LENGTH` chunks. The local
    /// sub-op (not modelled as an RPC here) is assumed to have already run
    /// before this is called, matching "runs exactly once at the start of
    /// phase 1".
    pub async fn leader_exec_ops(
        &mut self,
        transport: &dyn DtxTransport,
        coh: ContainerHandle,
        mbs: SharedMbs,
    ) -> DtxResult<()> {
        let epoch = self.handle.epoch;
        let version = self.handle.version;
        let xid = self.handle.xid;

        let regular: Vec<PeerTarget> = self
            .subs
            .iter()
            .filter(|s| !s.delayed)
            .map(|s| s.peer)
            .collect();
        let mut replies = Vec::new();
        let mut cursor = DispatchCursor::regular(regular);
        loop {
            let step = cursor
                .advance(|peer| {
                    let replies = &mut replies;
                    async move {
                        let req = CommitReq {
                            coh,
                            epoch,
                            version,
                            dtx_array: vec![xid],
                            flags: vec![0],
                        };
                        let reply = transport.commit(peer, req).await;
                        replies.push((peer, reply));
                    }
                })
                .await;
            if step == ChoreStep::Done {
                break;
            }
        }
        for (peer, reply) in replies.drain(..) {
            self.apply_reply(peer, reply);
        }

        let _ = mbs;

        let delayed: Vec<PeerTarget> = self
            .subs
            .iter()
            .filter(|s| s.delayed)
            .map(|s| s.peer)
            .collect();
        if !delayed.is_empty() {
            let mut replies = Vec::new();
            let mut cursor = DispatchCursor::priority(delayed);
            loop {
                let step = cursor
                    .advance(|peer| {
                        let replies = &mut replies;
                        async move {
                            let req = CommitReq {
                                coh,
                                epoch,
                                version,
                                dtx_array: vec![xid],
                                flags: vec![0],
                            };
                            let reply = transport.commit(peer, req).await;
                            replies.push((peer, reply));
                        }
                    })
                    .await;
                if step == ChoreStep::Done {
                    break;
                }
            }
            for (peer, reply) in replies.drain(..) {
                self.apply_reply(peer, reply);
            }
        }

        self.check_completeness()
    }

    fn apply_reply(&mut self, peer: PeerTarget, reply: DtxResult<crate::network::CommitReply>) {
        if let Some(sub) = self.subs.iter_mut().find(|s| s.peer == peer) {
            debug_assert!(!sub.complete, "completion slot written twice");
            sub.complete = true;
            sub.result = match reply {
                Ok(r) => r.status,
                Err(e) if e.is_benign_on_commit() => Ok(()),
                Err(e) => Err(e),
            };
        }
    }

    /// Testable property 12: after `leader_exec_ops` returns, every
    /// non-ignored target is either complete or within `allow_failure`.
    fn check_completeness(&self) -> DtxResult<()> {
        for sub in &self.subs {
            if !sub.complete {
                return Err(DtxError::InProgress);
            }
            if let Err(e) = &sub.result {
                if self.allow_failure.as_ref() != Some(e) {
                    return Err(e.clone());
                }
            }
        }
        Ok(())
    }
}

/// `leader_begin` (spec §4.3): allocates `subs[]` sized to `mbs.tgt_cnt -
/// 1` (the leader itself never gets a slot), wiring each remaining target
/// to its resolved peer. Regular flows populate up-front; collective flows
/// leave this empty and populate lazily (handled by `crate::collective`).
pub fn leader_begin(handle: Dth, mbs: &SharedMbs, local_target: TargetId, peer_of: impl Fn(TargetId) -> PeerTarget) -> LeaderHandle {
    let subs = mbs
        .targets()
        .iter()
        .filter(|t| t.target_id != local_target)
        .map(|t| SubStatus {
            target: t.target_id,
            peer: peer_of(t.target_id),
            complete: false,
            result: Ok(()),
            version: handle.version,
            delayed: false,
        })
        .collect();
    LeaderHandle::new(handle, subs)
}

pub fn default_handle_flags() -> HandleFlags {
    HandleFlags {
        dist: true,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{AbortReq, CheckReq, CheckState, CollReply, CollReq, CommitReply, RefreshReply, RefreshReq};
    use crate::vos::tests_support::FakeVos;
    use async_trait::async_trait;
    use dtx_types::{GroupDesc, Mbs, MbsFlags, Oid, TargetDesc};
    use std::sync::Arc;

    struct FailingTransport {
        fail_rank: u32,
    }

    #[async_trait]
    impl DtxTransport for FailingTransport {
        async fn commit(&self, peer: PeerTarget, _req: CommitReq) -> DtxResult<CommitReply> {
            if peer.rank == self.fail_rank {
                Err(DtxError::Hg)
            } else {
                Ok(CommitReply::ok(1, vec![Ok(())]))
            }
        }
        async fn abort(&self, _peer: PeerTarget, _req: AbortReq) -> DtxResult<()> {
            Ok(())
        }
        async fn check(&self, _peer: PeerTarget, _req: CheckReq) -> DtxResult<CheckState> {
            Ok(CheckState::Committed)
        }
        async fn refresh(&self, _peer: PeerTarget, _req: RefreshReq) -> DtxResult<RefreshReply> {
            Ok(RefreshReply { sub_rets: vec![] })
        }
        async fn coll_commit(&self, _req: CollReq) -> DtxResult<CollReply> {
            Ok(CollReply { status: Ok(()), misc: 0 })
        }
        async fn coll_abort(&self, _req: CollReq) -> DtxResult<CollReply> {
            Ok(CollReply { status: Ok(()), misc: 0 })
        }
        async fn coll_check(&self, _req: CollReq) -> DtxResult<CollReply> {
            Ok(CollReply { status: Ok(()), misc: 0 })
        }
    }

    fn sample_mbs(targets: &[TargetId]) -> SharedMbs {
        Arc::new(
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
        )
    }

    async fn make_handle(vos: &FakeVos, mbs: SharedMbs) -> Dth {
        Dth::begin(
            vos,
            ContainerHandle(1),
            Xid::generate(1),
            1,
            0,
            3,
            1,
            Some(Oid::new(1, 0)),
            vec![],
            mbs,
            default_handle_flags(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn all_targets_succeed_is_complete() {
        let vos = FakeVos::new();
        let mbs = sample_mbs(&[1, 2, 3]);
        let handle = make_handle(&vos, mbs.clone()).await;
        let mut leader = leader_begin(handle, &mbs, 1, |t| PeerTarget { rank: t, tag: 0 });
        let transport = FailingTransport { fail_rank: 999 };
        let result = leader.leader_exec_ops(&transport, ContainerHandle(1), mbs).await;
        assert!(result.is_ok());
        assert!(leader.subs.iter().all(|s| s.complete));
    }

    #[tokio::test]
    async fn one_failing_target_surfaces_its_error() {
        let vos = FakeVos::new();
        let mbs = sample_mbs(&[1, 2, 3]);
        let handle = make_handle(&vos, mbs.clone()).await;
        let mut leader = leader_begin(handle, &mbs, 1, |t| PeerTarget { rank: t, tag: 0 });
        let transport = FailingTransport { fail_rank: 2 };
        let result = leader.leader_exec_ops(&transport, ContainerHandle(1), mbs).await;
        assert!(matches!(result, Err(DtxError::Hg)));
    }

    #[tokio::test]
    async fn allow_failure_tolerates_matching_error() {
        let vos = FakeVos::new();
        let mbs = sample_mbs(&[1, 2, 3]);
        let handle = make_handle(&vos, mbs.clone()).await;
        let mut leader = leader_begin(handle, &mbs, 1, |t| PeerTarget { rank: t, tag: 0 });
        leader.allow_failure = Some(DtxError::Hg);
        let transport = FailingTransport { fail_rank: 2 };
        let result = leader.leader_exec_ops(&transport, ContainerHandle(1), mbs).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn leader_begin_excludes_local_target() {
        let vos = FakeVos::new();
        let mbs = sample_mbs(&[1, 2, 3]);
        let handle = make_handle(&vos, mbs.clone()).await;
        let leader = leader_begin(handle, &mbs, 1, |t| PeerTarget { rank: t, tag: 0 });
        assert_eq!(leader.subs.len(), 2);
        assert!(leader.subs.iter().all(|s| s.target != 1));
    }
}
