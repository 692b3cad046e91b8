use std::time::Duration;

use dtx_config::{DTX_COMMIT_THRESHOLD_AGE, DTX_REFRESH_MAX};
use dtx_types::{DtxState, Xid};

use crate::error::DtxResult;
use crate::handles::ContainerHandle;
use crate::vos::VosDtxOps;

/// Default cleanup age threshold (spec §4.5.3): RPC timeout + `2 ×
/// DTX_COMMIT_THRESHOLD_AGE`. There is no RPC-timeout knob in this crate's
/// scope, so the timeout term is folded into the constant directly.
pub const DEFAULT_CLEANUP_THRESHOLD: Duration = Duration::from_secs(10 + 2 * DTX_COMMIT_THRESHOLD_AGE.as_secs());

/// One scanned entry, enough to classify it (spec §4.5.3: "partitioning
/// them by whether they are `PARTIAL_COMMITTED` or merely old").
#[derive(Clone, Copy, Debug)]
pub struct ScannedEntry {
    pub xid: Xid,
    pub state: DtxState,
    pub start_time: u64,
}

#[derive(Default, Debug, PartialEq, Eq)]
pub struct Partition {
    pub partial_committed: Vec<Xid>,
    pub stale: Vec<Xid>,
}

/// Partitions a container scan into retry-commit vs. refresh work (spec
/// §4.5.3). A `Committing` entry is VOS's on-disk representation of
/// "partially committed": some but not all redundancy-group members saw the
/// commit land, so it is retried rather than refreshed. `stale` is only
/// populated for entries older than `cleanup_thd - 10s`; entries that are
/// neither partial-committed nor old enough are dropped (not yet due for
/// cleanup attention).
pub fn partition(entries: &[ScannedEntry], now: u64, cleanup_thd: Duration) -> Partition {
    let stale_cutoff = cleanup_thd.as_secs().saturating_sub(10);
    let mut out = Partition::default();
    for entry in entries {
        if entry.state == DtxState::Committing {
            out.partial_committed.push(entry.xid);
        } else if now.saturating_sub(entry.start_time) >= stale_cutoff {
            out.stale.push(entry.xid);
        }
    }
    out
}

/// Retries a commit for every partially-committed entry found by the scan
/// (spec §4.5.3: "Partial committed entries are retried").
pub async fn retry_partial_commits(vos: &dyn VosDtxOps, coh: ContainerHandle, xids: &[Xid]) -> DtxResult<usize> {
    if xids.is_empty() {
        return Ok(0);
    }
    let outcome = vos.commit(coh, xids, 0).await?;
    Ok(outcome.committed)
}

/// Runs `refresh_internal` (here: the caller-supplied `refresh_batch`
/// closure) over the stale set in chunks of `DTX_REFRESH_MAX` (spec
/// §4.5.3).
pub async fn refresh_stale<F, Fut>(xids: &[Xid], mut refresh_batch: F) -> DtxResult<usize>
where
    F: FnMut(Vec<Xid>) -> Fut,
    Fut: std::future::Future<Output = DtxResult<usize>>,
{
    let mut total = 0;
    for chunk in xids.chunks(DTX_REFRESH_MAX) {
        total += refresh_batch(chunk.to_vec()).await?;
    }
    Ok(total)
}

/// Full cleanup pass for one container: scan, partition, retry-commit the
/// partial-committed set, and refresh the stale set.
pub async fn cleanup_pass<F, Fut>(
    vos: &dyn VosDtxOps,
    coh: ContainerHandle,
    entries: &[ScannedEntry],
    now: u64,
    cleanup_thd: Duration,
    refresh_batch: F,
) -> DtxResult<(usize, usize)>
where
    F: FnMut(Vec<Xid>) -> Fut,
    Fut: std::future::Future<Output = DtxResult<usize>>,
{
    let part = partition(entries, now, cleanup_thd);
    let committed = retry_partial_commits(vos, coh, &part.partial_committed).await?;
    let refreshed = refresh_stale(&part.stale, refresh_batch).await?;
    Ok((committed, refreshed))
}
