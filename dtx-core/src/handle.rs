use std::sync::Arc;

use dtx_config::{SUB_MOD_MAX, VOS_SUB_OP_MAX};
use dtx_types::{DkeyHash, DtxState, Hlc, Oid, SharedMbs, Xid};

use crate::cos::{CosCache, CosKey};
use crate::error::{DtxError, DtxResult};
use crate::handles::{ContainerHandle, PoolHandle};
use crate::vos::{ReservationArena, VosDtxOps};

/// Per-attempt mutable flags carried by a handle (spec §3, `dth` flag list).
/// Kept as plain `bool`s rather than a packed bitset: they are read far more
/// often than serialized, and nothing here crosses the wire.
#[derive(Clone, Copy, Debug, Default)]
pub struct HandleFlags {
    /// Single-target DTX; skips `vos_dtx_validation` on `end`.
    pub solo: bool,
    /// Spans more than one target; drives CoS vs. sync-commit choice.
    pub dist: bool,
    /// Forced synchronous commit (caller asked for it, or config disabled
    /// batching).
    pub sync: bool,
    pub drop_cmt: bool,
    pub for_migration: bool,
    pub ignore_uncommitted: bool,
    /// Set once the on-disk entry has reached `PREPARED`.
    pub prepared: bool,
    /// This handle, not some earlier attempt, owns the chosen epoch.
    pub epoch_owner: bool,
    /// Single-engine transaction: no mbs, no dispatch, no CoS.
    pub local: bool,
    pub active: bool,
    pub cos_done: bool,
    pub pinned: bool,
    pub modify_shared: bool,
    pub aborted: bool,
    pub already: bool,
    pub need_validation: bool,
    pub shares_inited: bool,
}

/// Resolution states for an observed share-peer DTX (spec §4.5.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareState {
    Committed,
    Aborted,
    Active,
    /// Still to be determined; drained by `refresh`.
    Tbd,
}

/// A peer DTX this handle discovered it shares an `(oid, dkey)` with,
/// together with what is currently known about its fate. `epoch` is
/// carried so a later `refresh` can issue a real (non-corrupt-marking)
/// local abort without re-reading the peer's on-disk entry.
#[derive(Clone, Copy, Debug)]
pub struct SharePeer {
    pub xid: Xid,
    pub epoch: Hlc,
    pub state: ShareState,
}

/// Per-transaction DRAM state shared by leader and non-leader handles (spec
/// §3, `dth`). `LeaderHandle` (in `crate::leader`) embeds one of these.
pub struct Dth {
    pub xid: Xid,
    pub leader_oid: Option<Oid>,
    pub coh: Option<ContainerHandle>,
    pub poh: Option<PoolHandle>,
    pub version: u32,
    pub epoch: Hlc,
    pub epoch_bound: Hlc,
    pub mbs: Option<SharedMbs>,
    /// DTX ids to piggyback onto the next dispatched RPC as already
    /// committable (`dti_cos[]`).
    pub dti_cos: Vec<Xid>,
    pub modification_cnt: u32,
    sub_cnt: u32,
    oid_array: Vec<Oid>,
    pub touched_leader_oid: bool,
    pub dkey_hash: DkeyHash,
    pub op_seq: u32,
    share_list: Vec<SharePeer>,
    pub flags: HandleFlags,
    rsrvd: Option<ReservationArena>,
}

impl Dth {
    /// Non-leader `begin` (spec §4.3). `sub_cnt > 0` persistently attaches
    /// the DTX via VOS so a later resync can find it even if the handle is
    /// never explicitly ended.
    pub async fn begin(
        vos: &dyn VosDtxOps,
        coh: ContainerHandle,
        xid: Xid,
        epoch: Hlc,
        epoch_bound: Hlc,
        sub_cnt: u32,
        version: u32,
        leader_oid: Option<Oid>,
        dti_cos: Vec<Xid>,
        mbs: SharedMbs,
        flags: HandleFlags,
    ) -> DtxResult<Self> {
        if sub_cnt > 0 {
            vos.attach(coh, xid, epoch, mbs.clone()).await?;
        }
        Ok(Self {
            xid,
            leader_oid,
            coh: Some(coh),
            poh: None,
            version,
            epoch,
            epoch_bound,
            mbs: Some(mbs),
            dti_cos,
            modification_cnt: 0,
            sub_cnt,
            oid_array: Vec::new(),
            touched_leader_oid: false,
            dkey_hash: 0,
            op_seq: 0,
            share_list: Vec::new(),
            flags,
            rsrvd: Some(vos.rsrvd_init()),
        })
    }

    /// Single-engine `begin` (spec §4.3, "local transactions"): no mbs, no
    /// dispatch, epoch/epoch_bound are unused.
    pub async fn local_begin(vos: &dyn VosDtxOps, poh: PoolHandle) -> DtxResult<Self> {
        let xid = vos.local_begin(poh).await?;
        Ok(Self {
            xid,
            leader_oid: None,
            coh: None,
            poh: Some(poh),
            version: 0,
            epoch: 0,
            epoch_bound: 0,
            mbs: None,
            dti_cos: Vec::new(),
            modification_cnt: 0,
            sub_cnt: 0,
            oid_array: Vec::new(),
            touched_leader_oid: false,
            dkey_hash: 0,
            op_seq: 0,
            share_list: Vec::new(),
            flags: HandleFlags {
                local: true,
                ..Default::default()
            },
            rsrvd: None,
        })
    }

    /// `sub_init` (spec §4.3): bumps `op_seq`, records `dkey_hash`, and
    /// inserts `oid` into the sorted, de-duplicated `oid_array`. Returns
    /// `NO_PERM` once `op_seq` would exceed `VOS_SUB_OP_MAX` (invariant 3).
    pub fn sub_init(&mut self, oid: Oid, dkey_hash: DkeyHash) -> DtxResult<()> {
        if self.op_seq as u64 + 1 > VOS_SUB_OP_MAX as u64 {
            return Err(DtxError::NoPerm("op_seq exceeds VOS_SUB_OP_MAX".into()));
        }
        self.op_seq += 1;
        self.dkey_hash = dkey_hash;
        if Some(oid) == self.leader_oid {
            self.touched_leader_oid = true;
        } else {
            self.insert_oid(oid);
        }
        Ok(())
    }

    /// Binary-search insert, de-duplicated (invariant 9). Doubles capacity
    /// from 4 as a documented growth policy; `Vec` itself handles the actual
    /// reallocation, this just preserves insertion-order sortedness.
    fn insert_oid(&mut self, oid: Oid) {
        match self.oid_array.binary_search(&oid) {
            Ok(_) => {}
            Err(pos) => self.oid_array.insert(pos, oid),
        }
    }

    pub fn oid_array(&self) -> &[Oid] {
        &self.oid_array
    }

    /// Records one committed sub-modification against the handle's budget
    /// (invariant 3 / testable property 8): the `(sub_cnt+1)`-th call past
    /// the declared budget fails with `NOMEM`.
    pub fn record_modification(&mut self) -> DtxResult<()> {
        if self.modification_cnt >= SUB_MOD_MAX as u32 {
            return Err(DtxError::Overflow("modification_cnt exceeds SUB_MOD_MAX".into()));
        }
        if self.sub_cnt != 0 && self.modification_cnt >= self.sub_cnt {
            return Err(DtxError::NoMem);
        }
        self.modification_cnt += 1;
        Ok(())
    }

    pub fn push_share(&mut self, xid: Xid, epoch: Hlc, state: ShareState) {
        self.share_list.push(SharePeer { xid, epoch, state });
        self.flags.shares_inited = true;
    }

    pub fn share_tbd(&self) -> impl Iterator<Item = &SharePeer> {
        self.share_list.iter().filter(|s| s.state == ShareState::Tbd)
    }

    pub fn share_tbd_count(&self) -> usize {
        self.share_tbd().count()
    }

    /// Drains all four share-peer sublists (spec §4.3, `shares_fini`).
    pub fn shares_fini(&mut self) -> Vec<SharePeer> {
        self.flags.shares_inited = false;
        std::mem::take(&mut self.share_list)
    }

    pub fn set_share_state(&mut self, xid: Xid, state: ShareState) {
        if let Some(peer) = self.share_list.iter_mut().find(|p| p.xid == xid) {
            peer.state = state;
        }
    }

    /// Resets per-attempt mutable state between client retries that share
    /// the same on-disk entry (spec §4.3, `handle_reinit`). Preserves `mbs`,
    /// `modification_cnt`, `pinned`, and — per the recorded Open Question
    /// decision — `epoch_bound`.
    pub fn handle_reinit(&mut self, vos: &dyn VosDtxOps) {
        self.op_seq = 0;
        self.dkey_hash = 0;
        self.oid_array.clear();
        self.touched_leader_oid = false;
        self.share_list.clear();
        self.flags.active = false;
        self.flags.cos_done = false;
        self.flags.already = false;
        self.flags.aborted = false;
        self.flags.need_validation = false;
        self.flags.shares_inited = false;
        if let Some(old) = self.rsrvd.take() {
            vos.rsrvd_fini(old);
        }
        self.rsrvd = Some(vos.rsrvd_init());
    }

    /// Non-leader `end` (spec §4.3). Returns `Ok(())` on a successful
    /// terminal resolution, or the client-facing error to surface.
    ///
    /// `result` is the caller's own outcome for the transaction (e.g. an
    /// application error that should trigger an abort) independent of any
    /// VOS-observed race.
    pub async fn end(
        mut self,
        vos: &dyn VosDtxOps,
        cos: &CosCache,
        batched_ult_max: u32,
        result: DtxResult<()>,
    ) -> DtxResult<()> {
        if self.xid.is_nil() || self.flags.already {
            return Ok(());
        }

        let coh = self.coh.expect("non-local handle always carries a container handle");

        let mut result = result;
        if !self.flags.solo {
            let state = vos.validation(coh, self.xid).await?;
            if state == DtxState::Committed {
                self.flags.already = true;
                result = Ok(());
            }
            result = Self::translate_state(state, result);
        }

        match &result {
            Ok(()) => {
                if !self.flags.active && !self.flags.prepared && (self.flags.dist || self.modification_cnt > 0) {
                    let mbs = self.mbs.clone().expect("distributed handle always carries mbs");
                    vos.attach(coh, self.xid, self.epoch, mbs).await?;
                }

                let force_sync = (self.flags.prepared && !self.flags.dist) || batched_ult_max == 0;
                if force_sync {
                    vos.mark_sync(coh, self.xid).await?;
                } else {
                    vos.mark_committable(coh, self.xid).await?;
                    if let Some(oid) = self.oid_array.first().copied() {
                        let key = CosKey {
                            oid,
                            dkey_hash: self.dkey_hash,
                        };
                        cos.cos_add(coh, key, self.xid, self.version, false);
                    }
                }
            }
            Err(_) if !self.flags.solo => {
                vos.cleanup(coh, self.xid).await?;
                vos.abort(coh, self.xid, self.epoch).await?;
            }
            Err(_) => {}
        }

        cos.put_piggyback(coh, &std::mem::take(&mut self.dti_cos), result.is_ok());
        if let Some(arena) = self.rsrvd.take() {
            vos.rsrvd_fini(arena);
        }
        vos.detach(coh, self.xid).await?;

        result
    }

    /// Local single-engine `end` (spec §4.3, "local transactions"): no CoS
    /// or dispatch interaction of any kind.
    pub async fn local_end(self, vos: &dyn VosDtxOps, result: DtxResult<()>) -> DtxResult<()> {
        let poh = self.poh.expect("local handle always carries a pool handle");
        vos.local_end(poh, self.xid, result.clone()).await?;
        result
    }

    /// Translates a VOS-observed state into the caller's result per the
    /// table in spec §4.3 step 3.
    fn translate_state(state: DtxState, result: DtxResult<()>) -> DtxResult<()> {
        match state {
            DtxState::Prepared if result.is_err() => Err(DtxError::Again),
            DtxState::Inited | DtxState::Preparing => Err(DtxError::Again),
            DtxState::Aborted | DtxState::Aborting => Err(DtxError::InProgress),
            _ => result,
        }
    }
}

/// Convenience so call sites don't need `Arc<Dth>` boilerplate for the
/// read-mostly fields shared with `crate::leader::LeaderHandle`.
pub type SharedDth = Arc<parking_lot::Mutex<Dth>>;
