use std::sync::Arc;
use std::time::Duration;

use dtx_config::{DtxConfig, DTX_AGG_AGE_PRESERVE};
use tokio::time::sleep;

use crate::container::ContainerRegistry;
use crate::handles::ContainerHandle;
use crate::scheduler::ShutdownToken;
use crate::vos::{DtxStat, VosDtxOps};

const TICK: Duration = Duration::from_millis(500);

/// Picks the aggregation victim among a pool's containers (spec §4.5.2):
/// any container at or above `agg_thd_cnt_up`, or above `agg_thd_cnt_lo`
/// (or the pool itself above `agg_thd_cnt_up`) and old enough, wins
/// outright; otherwise, if the pool still exceeds `agg_thd_cnt_up`, fall
/// back to the container with the oldest first-commit-blob time (ties
/// broken by commit count).
pub fn pick_victim(stats: &[(ContainerHandle, DtxStat)], pool_cmt_count: u64, config: &DtxConfig) -> Option<ContainerHandle> {
    for (coh, stat) in stats {
        if stat.cont_cmt_count >= config.agg_thd_cnt_up as u64 {
            return Some(*coh);
        }
        let age = crate::vos::now_secs().saturating_sub(stat.first_cmt_blob_time_lo);
        let over_lo = stat.cont_cmt_count > config.agg_thd_cnt_lo as u64 || pool_cmt_count >= config.agg_thd_cnt_up as u64;
        if over_lo && age >= config.agg_thd_age_up.as_secs() {
            return Some(*coh);
        }
    }

    if pool_cmt_count <= config.agg_thd_cnt_up as u64 {
        return None;
    }

    stats
        .iter()
        .min_by(|(_, a), (_, b)| {
            a.first_cmt_blob_time_lo
                .cmp(&b.first_cmt_blob_time_lo)
                .then(a.cont_cmt_count.cmp(&b.cont_cmt_count))
        })
        .map(|(coh, _)| *coh)
}

/// Runs aggregation passes on `coh` until thresholds fall below
/// `agg_thd_cnt_lo`/`agg_thd_age_lo`, or the oldest commit is younger than
/// `DTX_AGG_AGE_PRESERVE` (the load-bearing floor: non-leaders must still
/// be able to `REFRESH` against a freshly committed DTX).
pub async fn aggregate_until_below_threshold(vos: &dyn VosDtxOps, coh: ContainerHandle, config: &DtxConfig) -> crate::error::DtxResult<usize> {
    let mut total = 0;
    loop {
        let stat = vos.stat(coh).await?;
        let age = crate::vos::now_secs().saturating_sub(stat.first_cmt_blob_time_lo);
        if stat.cont_cmt_count < config.agg_thd_cnt_lo as u64 && age < config.agg_thd_age_lo.as_secs() {
            break;
        }
        if age < DTX_AGG_AGE_PRESERVE.as_secs() {
            break;
        }
        let reclaimed = vos.aggregate(coh).await?;
        if reclaimed == 0 {
            break;
        }
        total += reclaimed;
        tokio::task::yield_now().await;
    }
    Ok(total)
}

/// Long-running per-engine aggregation service (spec §4.5.2): one pass
/// every 500ms, fair round-robin across pools, one victim container per
/// tick.
pub async fn run(vos: Arc<dyn VosDtxOps>, registry: Arc<ContainerRegistry>, config: Arc<DtxConfig>, shutdown: ShutdownToken) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let mut stats = Vec::new();
        for coh in registry.open_containers() {
            if let Ok(stat) = vos.stat(coh).await {
                stats.push((coh, stat));
            }
        }

        let pool_cmt_count = stats.iter().map(|(_, s)| s.pool_cmt_count).max().unwrap_or(0);
        if let Some(victim) = pick_victim(&stats, pool_cmt_count, &config) {
            if let Err(e) = aggregate_until_below_threshold(vos.as_ref(), victim, &config).await {
                tracing::warn!(error = %e, "aggregation pass failed");
            }
        }

        sleep(TICK).await;
    }
}
