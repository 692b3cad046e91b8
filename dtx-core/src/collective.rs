use dtx_config::DTX_COLL_TREE_WIDTH;
use dtx_types::{Hlc, Xid};

use crate::error::{DtxError, DtxResult};
use crate::handles::ContainerHandle;
use crate::network::{CollReply, CollReq, DtxTransport, RankId};

/// Captures the `bitmap`/`hints`/rank-range of a collective DTX (spec §3,
/// §4.4 "Collective path"). `hints` is sparse, one byte per rank in
/// `[min_rank, max_rank]`, used by remote engines to resolve a hinted first
/// target without consulting the placement map.
#[derive(Clone, Debug)]
pub struct CollEntry {
    pub xid: Xid,
    pub version: u32,
    pub epoch: Hlc,
    pub min_rank: RankId,
    pub max_rank: RankId,
    /// Local VOS targets participating on this engine.
    pub bitmap: Vec<u8>,
    pub hints: Vec<u8>,
}

impl CollEntry {
    pub fn tree_children(&self, self_rank: RankId) -> Vec<RankId> {
        knomial_children(self_rank, self.min_rank, self.max_rank, DTX_COLL_TREE_WIDTH)
    }
}

/// Computes the KNOMIAL(`width`)-tree children of `self_rank` within
/// `[min_rank, max_rank]` (spec §4.4: "KNOMIAL tree broadcast ... branching
/// factor `DTX_COLL_TREE_WIDTH = 8`"). Ranks are renumbered relative to
/// `min_rank` so the tree root is always index 0.
pub fn knomial_children(self_rank: RankId, min_rank: RankId, max_rank: RankId, width: usize) -> Vec<RankId> {
    if self_rank < min_rank || self_rank > max_rank || width == 0 {
        return Vec::new();
    }
    let span = (max_rank - min_rank + 1) as usize;
    let local = (self_rank - min_rank) as usize;
    let mut children = Vec::new();
    let mut child_local = local * width + 1;
    while child_local < span && children.len() < width {
        children.push(min_rank + child_local as RankId);
        child_local += 1;
    }
    children
}

/// Remote-side resolution of a collective DTX (spec §4.4, `coll_prep`):
/// applies bitmap filtering (health, version, not-new-leader) the same way
/// the original leader did, so the operation is deterministic over its
/// inputs (round-trip property in spec §8).
pub fn coll_prep(
    xid: Xid,
    version: u32,
    epoch: Hlc,
    min_rank: RankId,
    max_rank: RankId,
    local_targets: impl Iterator<Item = (u32, bool)>,
) -> CollEntry {
    let bitmap: Vec<u8> = local_targets
        .map(|(_, eligible)| if eligible { 1 } else { 0 })
        .collect();
    CollEntry {
        xid,
        version,
        epoch,
        min_rank,
        max_rank,
        bitmap,
        hints: Vec::new(),
    }
}

/// Merges per-opcode replies from a tree broadcast (spec §4.4, "Aggregation
/// callbacks"): commit counters add, abort keeps the first non-`NONEXIST`
/// error, check defers to `merge_check_result` (see `crate::network`-level
/// callers).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollOp {
    Commit,
    Abort,
    Check,
}

pub fn merge_coll_replies(op: CollOp, replies: &[DtxResult<CollReply>]) -> DtxResult<u32> {
    match op {
        CollOp::Commit => {
            let mut total = 0u32;
            let mut hard_err = None;
            for reply in replies {
                match reply {
                    Ok(r) => total += r.misc,
                    Err(e) if e.is_benign_on_commit() => {}
                    Err(e) => hard_err.get_or_insert_with(|| e.clone()),
                };
            }
            if let Some(e) = hard_err {
                Err(e)
            } else {
                Ok(total)
            }
        }
        CollOp::Abort => {
            let mut first_err = None;
            for reply in replies {
                if let Err(e) = reply {
                    if !e.is_benign_on_abort() {
                        first_err.get_or_insert_with(|| e.clone());
                    }
                }
            }
            first_err.map(Err).unwrap_or(Ok(0))
        }
        CollOp::Check => {
            let mut best: Option<u32> = None;
            for reply in replies {
                match reply {
                    Ok(r) => best = Some(best.map_or(r.misc, |b| b.max(r.misc))),
                    Err(DtxError::Excluded) => best = best.or(Some(0)),
                    Err(_) => {}
                }
            }
            best.ok_or(DtxError::NonExist)
        }
    }
}

/// Dispatches a KNOMIAL tree broadcast for one collective opcode, issuing
/// one RPC per direct child and merging the result with the local outcome.
pub async fn coll_broadcast(
    transport: &dyn DtxTransport,
    op: CollOp,
    entry: &CollEntry,
    coh: ContainerHandle,
    self_rank: RankId,
) -> DtxResult<u32> {
    let children = entry.tree_children(self_rank);
    let req = CollReq {
        coh,
        xid: entry.xid,
        version: entry.version,
        min_rank: entry.min_rank,
        max_rank: entry.max_rank,
        epoch: entry.epoch,
        hints: entry.hints.clone(),
    };

    let mut replies = Vec::with_capacity(children.len());
    for _child in &children {
        let reply = match op {
            CollOp::Commit => transport.coll_commit(req.clone()).await,
            CollOp::Abort => transport.coll_abort(req.clone()).await,
            CollOp::Check => transport.coll_check(req.clone()).await,
        };
        replies.push(reply);
    }
    merge_coll_replies(op, &replies)
}
