use std::sync::Arc;
use std::time::Duration;

use dtx_config::{DtxConfig, DTX_THRESHOLD_COUNT};
use tokio::time::sleep;

use crate::collective::{coll_broadcast, CollEntry, CollOp};
use crate::container::ContainerRegistry;
use crate::cos::{CollRouting, CosCache, CosEntry, CosKey};
use crate::error::DtxResult;
use crate::handles::ContainerHandle;
use crate::metrics::Metrics;
use crate::network::{DtxTransport, RankId};
use crate::scheduler::ShutdownToken;
use crate::vos::VosDtxOps;

const IDLE_SLEEP: Duration = Duration::from_millis(500);
const ACTIVE_SLEEP: Duration = Duration::from_millis(50);

/// Decides whether a container is due for a batched-commit pass (spec
/// §4.5.1): count threshold, any collective entry, or age threshold.
pub fn is_due(cos: &CosCache, coh: ContainerHandle, age_threshold: Duration) -> bool {
    if cos.committable_count(coh) > DTX_THRESHOLD_COUNT as u64 {
        return true;
    }
    if cos.committable_coll_count(coh) > 0 {
        return true;
    }
    if let Some((_, oldest)) = cos.cos_oldest(coh) {
        let age = crate::vos::now_secs().saturating_sub(oldest.inserted_at);
        if age >= age_threshold.as_secs() {
            return true;
        }
    }
    false
}

fn coll_entry_of(entry: &CosEntry, routing: &CollRouting) -> CollEntry {
    CollEntry {
        xid: entry.xid,
        version: entry.version,
        epoch: routing.epoch,
        min_rank: routing.min_rank,
        max_rank: routing.max_rank,
        bitmap: routing.bitmap.clone(),
        hints: routing.hints.clone(),
    }
}

/// Runs one commit pass over a single container: drains up to
/// `DTX_THRESHOLD_COUNT` entries. Regular entries are committed together
/// through a single VOS `commit` call; collective entries are committed one
/// at a time through `coll_broadcast` (spec §4.5.1 "for collective entries
/// (one at a time)", invariant 8 — a collective DTX never shares a commit
/// batch with another entry). Returns the number of entries committed.
pub async fn commit_pass(
    vos: &dyn VosDtxOps,
    cos: &CosCache,
    transport: &dyn DtxTransport,
    self_rank: RankId,
    coh: ContainerHandle,
) -> DtxResult<usize> {
    let drained = cos.batched_del(coh, DTX_THRESHOLD_COUNT);
    if drained.is_empty() {
        return Ok(0);
    }

    let (collective, regular): (Vec<_>, Vec<_>) = drained.into_iter().partition(|(_, e)| e.is_collective());
    let mut committed = 0usize;

    for (key, entry) in &collective {
        let routing = entry.coll.clone().expect("partitioned as collective");
        let coll_entry = coll_entry_of(entry, &routing);
        match coll_broadcast(transport, CollOp::Commit, &coll_entry, coh, self_rank).await {
            Ok(_) => committed += 1,
            Err(e) => {
                tracing::warn!(xid = ?entry.xid, error = %e, "collective commit failed, re-queuing");
                cos.cos_add_collective(coh, *key, entry.xid, entry.version, routing);
            }
        }
    }

    if !regular.is_empty() {
        let xids: Vec<_> = regular.iter().map(|(_, e)| e.xid).collect();
        let outcome = vos.commit(coh, &xids, 0).await?;
        committed += outcome.committed;

        for ((key, entry), &removed) in regular.iter().zip(outcome.rm_bitmap.iter()) {
            if !removed {
                // Partial commit: demote back into the cache for retry next cycle.
                cos.cos_add(coh, *key, entry.xid, entry.version, false);
            }
        }
    }

    Ok(committed)
}

/// Long-running per-engine batched-commit service (spec §4.5.1). Iterates
/// the registry's eligible containers round-robin with 50ms sleeps (500ms
/// when nothing was due), mirroring the teacher's `Broadcaster` task loop
/// shape (`broadcaster.rs`).
pub async fn run(
    vos: Arc<dyn VosDtxOps>,
    cos: Arc<CosCache>,
    transport: Arc<dyn DtxTransport>,
    self_rank: RankId,
    registry: Arc<ContainerRegistry>,
    config: Arc<DtxConfig>,
    metrics: Arc<Metrics>,
    shutdown: ShutdownToken,
) {
    if config.batched_commit_disabled() {
        tracing::info!("batched commit disabled (DAOS_DTX_BATCHED_ULT_MAX=0)");
        return;
    }

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let mut did_work = false;
        for coh in registry.eligible_for_commit() {
            if !is_due(&cos, coh, config.agg_thd_age_up) {
                continue;
            }
            registry.set_commit_in_flight(coh, true);
            match commit_pass(vos.as_ref(), &cos, transport.as_ref(), self_rank, coh).await {
                Ok(n) if n > 0 => {
                    did_work = true;
                    metrics.committable.set(cos.committable_count(coh) as i64);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "batched commit pass failed"),
            }
            registry.set_commit_in_flight(coh, false);
            tokio::task::yield_now().await;
        }

        sleep(if did_work { ACTIVE_SLEEP } else { IDLE_SLEEP }).await;
    }
}
