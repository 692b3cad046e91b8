use std::collections::BTreeMap;

use dtx_config::DTX_REFRESH_MAX;
use dtx_types::{DtxState, Hlc, MbsFlags, TargetId, Xid};

use crate::error::{DtxError, DtxResult};
use crate::handle::{Dth, ShareState};
use crate::handles::ContainerHandle;
use crate::network::{DtxTransport, PeerTarget, RefreshReq, RefreshState, REFRESH_FLAG_INITIAL_LEADER};
use crate::vos::VosDtxOps;

/// Resolves every `share_tbd` peer on `dth` by batching `REFRESH` RPCs
/// grouped by leader (spec §4.5.5): testable property 10, an empty
/// `share_tbd` list returns `Ok(0)` and touches nothing.
///
/// On full success (no `TX_UNCERTAIN` survivors) this returns `Err(Again)`
/// — "retry the original op" — unless `dth.flags.need_validation` is set, in
/// which case it returns `Ok(resolved_count)` instead, matching callers that
/// only wanted the side-effects (local commits/aborts) and not a retry
/// signal.
pub async fn refresh(
    dth: &mut Dth,
    vos: &dyn VosDtxOps,
    transport: &dyn DtxTransport,
    coh: ContainerHandle,
    leader_of: impl Fn(Xid) -> DtxResult<(TargetId, PeerTarget)>,
    initial_leader: bool,
) -> DtxResult<usize> {
    let tbd: Vec<(Xid, Hlc)> = dth.share_tbd().map(|p| (p.xid, p.epoch)).collect();
    if tbd.is_empty() {
        return Ok(0);
    }

    let mut by_peer: BTreeMap<PeerTarget, Vec<(Xid, Hlc)>> = BTreeMap::new();
    for (xid, epoch) in &tbd {
        match leader_of(*xid) {
            Ok((_, peer)) => by_peer.entry(peer).or_default().push((*xid, *epoch)),
            Err(_) => dth.set_share_state(*xid, ShareState::Active),
        }
    }

    let mut resolved = 0usize;
    let mut uncertain = false;

    for (peer, xids) in by_peer {
        for chunk in xids.chunks(DTX_REFRESH_MAX) {
            let flags = vec![if initial_leader { REFRESH_FLAG_INITIAL_LEADER } else { 0 }; chunk.len()];
            let req = RefreshReq {
                coh,
                dtx_array: chunk.iter().map(|(xid, _)| *xid).collect(),
                flags,
            };

            match transport.refresh(peer, req).await {
                Ok(reply) => {
                    for ((xid, epoch), ret) in chunk.iter().zip(reply.sub_rets) {
                        resolve_one(dth, vos, coh, *xid, *epoch, ret, initial_leader, &mut resolved, &mut uncertain).await;
                    }
                }
                Err(_) => {
                    // Bulk network failure: the whole batch migrates to the
                    // active list, surfaced as `INPROGRESS`.
                    for (xid, _) in chunk {
                        dth.set_share_state(*xid, ShareState::Active);
                    }
                }
            }
        }
    }

    if uncertain {
        return Err(DtxError::TxUncertain);
    }
    if dth.flags.need_validation {
        return Ok(resolved);
    }
    Err(DtxError::Again)
}

async fn resolve_one(
    dth: &mut Dth,
    vos: &dyn VosDtxOps,
    coh: ContainerHandle,
    xid: Xid,
    epoch: Hlc,
    ret: DtxResult<RefreshState>,
    initial_leader: bool,
    resolved: &mut usize,
    uncertain: &mut bool,
) {
    match ret {
        Ok(RefreshState::Committed) | Ok(RefreshState::Committable) => {
            let _ = vos.commit(coh, &[xid], 0).await;
            dth.set_share_state(xid, ShareState::Committed);
            *resolved += 1;
        }
        Ok(RefreshState::NonExist) => {
            if initial_leader {
                // The replier is the transaction's original leader and
                // claims ignorance; this is never treated as a hard abort
                // signal from the authoritative source (spec §6 notes).
                dth.set_share_state(xid, ShareState::Active);
                return;
            }
            // Race check: the entry may have committed locally between our
            // read of `share_tbd` and this reply landing.
            if let Ok(DtxState::Committed) = vos.check(coh, xid).await {
                dth.set_share_state(xid, ShareState::Committed);
                *resolved += 1;
                return;
            }
            let _ = vos.abort(coh, xid, epoch).await;
            dth.set_share_state(xid, ShareState::Aborted);
            *resolved += 1;
        }
        Err(DtxError::TxUncertain) => {
            let _ = vos.set_flags(coh, xid, MbsFlags::ORPHAN).await;
            dth.set_share_state(xid, ShareState::Active);
            *uncertain = true;
        }
        Ok(RefreshState::InProgress) | Ok(RefreshState::Prepared) | Err(_) => {
            dth.set_share_state(xid, ShareState::Active);
        }
    }
}
