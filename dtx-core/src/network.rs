use async_trait::async_trait;
use dtx_types::{Hlc, Xid};

use crate::error::DtxResult;
use crate::handles::ContainerHandle;

pub type RankId = u32;
/// Transport-level sub-context within a rank (an execution-stream tag);
/// together with `RankId` this is the dispatch classification key
/// `(rank << 32) | tag` from spec §4.4.
pub type Tag = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerTarget {
    pub rank: RankId,
    pub tag: Tag,
}

/// `SYNC_COMMIT` flag on a single-entry `COMMIT` dispatch (spec §4.4,
/// "Target classification": bypasses the classification tree and is
/// flagged for metrics).
pub const COMMIT_FLAG_SYNC: u32 = 1 << 0;
/// `INITIAL_LEADER` flag on a `REFRESH` request: suppresses abort on
/// `NONEXIST` at the replier (spec §6).
pub const REFRESH_FLAG_INITIAL_LEADER: u32 = 1 << 0;

#[derive(Clone, Debug)]
pub struct CommitReq {
    pub coh: ContainerHandle,
    pub epoch: Hlc,
    pub version: u32,
    pub dtx_array: Vec<Xid>,
    pub flags: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct CommitReply {
    pub status: DtxResult<()>,
    pub committed_count: usize,
    pub sub_rets: Vec<DtxResult<()>>,
}

impl CommitReply {
    pub fn ok(committed_count: usize, sub_rets: Vec<DtxResult<()>>) -> Self {
        Self {
            status: Ok(()),
            committed_count,
            sub_rets,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AbortReq {
    pub coh: ContainerHandle,
    /// `0` means "mark corrupted" rather than abort an active epoch.
    pub epoch: Hlc,
    pub version: u32,
    pub dtx_id: Xid,
}

#[derive(Clone, Debug)]
pub struct CheckReq {
    pub coh: ContainerHandle,
    pub version: u32,
    pub dtx_id: Xid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckState {
    Committed,
    Committable,
    Prepared,
    Corrupted,
    NonExist,
    Excluded,
    InProgress,
}

#[derive(Clone, Debug)]
pub struct RefreshReq {
    pub coh: ContainerHandle,
    pub dtx_array: Vec<Xid>,
    pub flags: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshState {
    Committed,
    Committable,
    Prepared,
    NonExist,
    TxUncertain,
    InProgress,
}

#[derive(Clone, Debug)]
pub struct RefreshReply {
    pub sub_rets: Vec<DtxResult<RefreshState>>,
}

#[derive(Clone, Debug)]
pub struct CollReq {
    pub coh: ContainerHandle,
    pub xid: Xid,
    pub version: u32,
    pub min_rank: RankId,
    pub max_rank: RankId,
    pub epoch: Hlc,
    /// Sparse, one byte per rank in `[min_rank, max_rank]`.
    pub hints: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct CollReply {
    pub status: DtxResult<()>,
    pub misc: u32,
}

/// Transport seam: the engine issues `COMMIT`/`ABORT`/`CHECK`/`REFRESH` and
/// collective variants through this trait rather than a concrete RPC crate
/// (spec §1, "the RPC transport ... consumed through narrow interfaces").
/// Mirrors `NetworkClient` in the teacher's `broadcaster.rs`.
#[async_trait]
pub trait DtxTransport: Send + Sync {
    async fn commit(&self, peer: PeerTarget, req: CommitReq) -> DtxResult<CommitReply>;
    async fn abort(&self, peer: PeerTarget, req: AbortReq) -> DtxResult<()>;
    async fn check(&self, peer: PeerTarget, req: CheckReq) -> DtxResult<CheckState>;
    async fn refresh(&self, peer: PeerTarget, req: RefreshReq) -> DtxResult<RefreshReply>;

    /// KNOMIAL(`DTX_COLL_TREE_WIDTH`) tree broadcast across `[min_rank,
    /// max_rank]`, `CRT_RPC_FLAG_FILTER_INVERT` semantics (spec §4.4).
    async fn coll_commit(&self, req: CollReq) -> DtxResult<CollReply>;
    async fn coll_abort(&self, req: CollReq) -> DtxResult<CollReply>;
    async fn coll_check(&self, req: CollReq) -> DtxResult<CollReply>;
}
