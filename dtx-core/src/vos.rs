use std::time::SystemTime;

use async_trait::async_trait;
use dtx_types::{Hlc, MbsFlags, SharedMbs, Xid};

use crate::error::{DtxError, DtxResult};
use crate::handles::{ContainerHandle, PoolHandle};

/// Snapshot of `dtx_stat` (spec §3): queried from VOS plus the CoS cache by
/// the caller, who combines `VosDtxOps::stat`'s fields with
/// `CosCache::committable_count`/`committable_coll_count`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DtxStat {
    pub cont_cmt_count: u64,
    pub pool_cmt_count: u64,
    pub first_cmt_blob_time_lo: u64,
    pub first_cmt_blob_time_up: u64,
    pub oldest_active_time: u64,
    pub oldest_committable_time: u64,
    pub newest_aggregated: u64,
}

/// Outcome of a `VosDtxOps::commit` call over a batch of ids: which
/// succeeded locally, and (per spec §4.4, opcode table) a `rm_bitmap`
/// indicating whether each CoS entry should be removed or demoted to the
/// tail for retry.
#[derive(Clone, Debug, Default)]
pub struct CommitOutcome {
    pub committed: usize,
    /// `rm_bitmap[i] == true` means the i-th input xid may be removed from
    /// CoS; `false` means it must be demoted (kept, moved to tail) because
    /// this target did not actually commit it (partial commit).
    pub rm_bitmap: Vec<bool>,
}

/// A reservation arena handed out by `rsrvd_init`, owned by the handle for
/// its lifetime and released by `rsrvd_fini` (spec §3, "VOS reservation
/// slots").
#[derive(Debug, Default)]
pub struct ReservationArena {
    pub slots: u32,
}

/// The local VOS DTX-table operations the engine depends on. Out of scope
/// per spec §1 ("the underlying versioned object store"); modelled here as
/// a narrow async trait so the engine logic in this crate never assumes a
/// concrete storage backend, mirroring `NetworkClient`/`NetworkService` in
/// the teacher's `authority_service.rs`.
#[async_trait]
pub trait VosDtxOps: Send + Sync {
    /// Persistently attaches an in-flight DTX so a subsequent `resync` can
    /// find it, even if the handle is never explicitly ended.
    async fn attach(&self, coh: ContainerHandle, xid: Xid, epoch: Hlc, mbs: SharedMbs) -> DtxResult<()>;

    /// Detaches bookkeeping for a handle that is ending; always called,
    /// success or failure (spec §4.3, `end`/`leader_end` step 7).
    async fn detach(&self, coh: ContainerHandle, xid: Xid) -> DtxResult<()>;

    /// Drops a failed, non-`solo` DTX's on-disk traces before `abort`/
    /// `coll_abort` is issued (spec §4.3, `end` step 6).
    async fn cleanup(&self, coh: ContainerHandle, xid: Xid) -> DtxResult<()>;

    /// Commits a batch of DTX ids locally at the given epoch.
    async fn commit(
        &self,
        coh: ContainerHandle,
        xids: &[Xid],
        epoch: Hlc,
    ) -> DtxResult<CommitOutcome>;

    /// Aborts one DTX. `epoch == 0` means "mark corrupted" rather than a
    /// real abort (spec §6, `DTX_ABORT` notes).
    async fn abort(&self, coh: ContainerHandle, xid: Xid, epoch: Hlc) -> DtxResult<()>;

    /// Local state check used by `CHECK` handling and resync.
    async fn check(&self, coh: ContainerHandle, xid: Xid) -> DtxResult<dtx_types::DtxState>;

    /// Runs one aggregation pass, reclaiming committed entries older than
    /// `DTX_AGG_AGE_PRESERVE`. Returns how many were reclaimed.
    async fn aggregate(&self, coh: ContainerHandle) -> DtxResult<usize>;

    /// Rebuilds the in-memory committed-entry index after container open.
    async fn cmt_reindex(&self, coh: ContainerHandle) -> DtxResult<()>;

    async fn mark_committable(&self, coh: ContainerHandle, xid: Xid) -> DtxResult<()>;

    /// Forces a DTX that would otherwise be CoS-cached to go through the
    /// synchronous commit path (spec §4.3, `end` step 5).
    async fn mark_sync(&self, coh: ContainerHandle, xid: Xid) -> DtxResult<()>;

    async fn stat(&self, coh: ContainerHandle) -> DtxResult<DtxStat>;

    async fn set_flags(&self, coh: ContainerHandle, xid: Xid, flags: MbsFlags) -> DtxResult<()>;

    /// Loads an out-of-line `Mbs` (size above `DTX_INLINE_MBS_SIZE`).
    async fn load_mbs(&self, coh: ContainerHandle, xid: Xid) -> DtxResult<SharedMbs>;

    fn rsrvd_init(&self) -> ReservationArena;
    fn rsrvd_fini(&self, arena: ReservationArena);

    /// Begins a single-engine (local) transaction; no mbs, no dispatch.
    async fn local_begin(&self, poh: PoolHandle) -> DtxResult<Xid>;
    async fn local_end(&self, poh: PoolHandle, xid: Xid, result: DtxResult<()>) -> DtxResult<()>;

    /// Re-validates a handle about to end, possibly upgrading its result to
    /// `Already` if the DTX was committed by a race (spec §4.3, `end` step 2).
    async fn validation(&self, coh: ContainerHandle, xid: Xid) -> DtxResult<dtx_types::DtxState>;

    async fn cache_reset(&self, coh: ContainerHandle) -> DtxResult<()>;

    /// Only legal when the entry is not yet `prepared` (spec invariant 2).
    async fn renew_epoch(&self, coh: ContainerHandle, xid: Xid, new_epoch: Hlc) -> DtxResult<()>;
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
