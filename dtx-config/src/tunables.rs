use std::time::Duration;

use crate::env::{read_u32_env, DTX_AGG_THD_AGE_ENV, DTX_AGG_THD_CNT_ENV, DTX_BATCHED_ULT_MAX_ENV};

/// VOS reserves its two highest minor-epoch values for internal use, so the
/// number of sub-modifications a single DTX may record is capped just below
/// `u16::MAX`.
pub const SUB_MOD_MAX: u16 = u16::MAX - 2;

/// Per-handle bound on `op_seq` (the sub-op minor epoch counter). Distinct
/// from `SUB_MOD_MAX`: it bounds how many *ordered* sub-ops a single handle
/// can record, independent of how many target-modifications it has.
pub const VOS_SUB_OP_MAX: u32 = 4096;

/// Batch size used both for draining the CoS cache into a `COMMIT` RPC and
/// for fetching committable entries for a sync-commit attempt.
pub const DTX_THRESHOLD_COUNT: usize = 32;

/// Age (wall-clock) after which a committable-but-not-yet-committed DTX
/// becomes eligible for immediate (rather than batched) commit.
pub const DTX_COMMIT_THRESHOLD_AGE: Duration = Duration::from_secs(10);

/// Max DTX ids resolved by a single `REFRESH` RPC / cleanup batch.
pub const DTX_REFRESH_MAX: usize = 32;

/// Above this serialized size, `Mbs` is stored out-of-line and loaded lazily
/// (`vos_dtx_load_mbs`) instead of being carried inline in the RPC body.
pub const DTX_INLINE_MBS_SIZE: usize = 512;

/// Branching factor of the KNOMIAL tree used to broadcast collective DTX
/// RPCs across engine ranks.
pub const DTX_COLL_TREE_WIDTH: usize = 8;

/// Chunk size for non-delayed ("regular") sub-request fan-out.
pub const DTX_REG_RPC_STEP_LENGTH: usize = 512;

/// Chunk size for delayed ("priority") sub-request fan-out.
pub const DTX_PRI_RPC_STEP_LENGTH: usize = 64;

/// Cooperative yield cadence: the dispatch chore yields every this-many RPC
/// sends within a step.
pub const DTX_RPC_YIELD_THD: usize = 32;

/// No DTX younger than this (by `first_cmt_blob_time_lo`) is ever
/// aggregated; this is the only guaranteed temporal offset between commit
/// and reclaim, and is load-bearing for `REFRESH` correctness.
pub const DTX_AGG_AGE_PRESERVE: Duration = Duration::from_secs(3);

const DTX_AGG_THD_CNT_MIN: u32 = 1 << 20;
const DTX_AGG_THD_CNT_MAX: u32 = 1 << 24;
const DTX_AGG_THD_CNT_DEF: u32 = (1 << 19) * 7;

const DTX_AGG_THD_AGE_MIN: u32 = 210;
const DTX_AGG_THD_AGE_MAX: u32 = 1830;
const DTX_AGG_THD_AGE_DEF: u32 = 630;

const DTX_BATCHED_ULT_DEF: u32 = 32;

/// Process-wide DTX tunables. Loaded once (`from_env`) and shared as
/// `Arc<DtxConfig>` through `dtx_core::Context`; there is no SIGHUP re-read,
/// matching the C engine's process-init statics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DtxConfig {
    /// Upper threshold of committed entries per pool before aggregation
    /// starts (`DAOS_DTX_AGG_THD_CNT`, range `[2^20, 2^24]`, default `7*2^19`).
    pub agg_thd_cnt_up: u32,
    /// Lower threshold (aggregation runs until the count falls back below
    /// this). Auto-derived as `agg_thd_cnt_up * 19 / 20`.
    pub agg_thd_cnt_lo: u32,
    /// Age threshold in seconds (`DAOS_DTX_AGG_THD_AGE`, range `[210, 1830]`,
    /// default `630`).
    pub agg_thd_age_up: Duration,
    /// Auto-derived as `agg_thd_age_up * 19 / 20`.
    pub agg_thd_age_lo: Duration,
    /// Max number of concurrently in-flight batched-commit tasks per engine.
    /// `0` disables batched commit entirely: all commits go synchronous.
    pub batched_ult_max: u32,
}

impl Default for DtxConfig {
    fn default() -> Self {
        Self::from_values(DTX_AGG_THD_CNT_DEF, DTX_AGG_THD_AGE_DEF, DTX_BATCHED_ULT_DEF)
    }
}

impl DtxConfig {
    fn from_values(agg_thd_cnt_up: u32, agg_thd_age_up_secs: u32, batched_ult_max: u32) -> Self {
        let agg_thd_cnt_lo = agg_thd_cnt_up * 19 / 20;
        let agg_thd_age_up = Duration::from_secs(agg_thd_age_up_secs as u64);
        let agg_thd_age_lo = Duration::from_secs((agg_thd_age_up_secs * 19 / 20) as u64);
        Self {
            agg_thd_cnt_up,
            agg_thd_cnt_lo,
            agg_thd_age_up,
            agg_thd_age_lo,
            batched_ult_max,
        }
    }

    /// Loads tunables from the environment, falling back to documented
    /// defaults for anything unset, out of range, or unparseable. Matches
    /// `dtx_init()` in the C engine: a bad value is logged and replaced with
    /// the default rather than failing the process.
    pub fn from_env() -> Self {
        let agg_thd_cnt_up = match read_u32_env(DTX_AGG_THD_CNT_ENV) {
            Ok(Some(v)) if (DTX_AGG_THD_CNT_MIN..=DTX_AGG_THD_CNT_MAX).contains(&v) => v,
            Ok(Some(v)) => {
                tracing::warn!(
                    value = v,
                    min = DTX_AGG_THD_CNT_MIN,
                    max = DTX_AGG_THD_CNT_MAX,
                    default = DTX_AGG_THD_CNT_DEF,
                    "{DTX_AGG_THD_CNT_ENV} out of range, using default"
                );
                DTX_AGG_THD_CNT_DEF
            }
            Ok(None) => DTX_AGG_THD_CNT_DEF,
            Err(e) => {
                tracing::warn!(error = %e, default = DTX_AGG_THD_CNT_DEF, "failed to parse {DTX_AGG_THD_CNT_ENV}, using default");
                DTX_AGG_THD_CNT_DEF
            }
        };

        let agg_thd_age_up = match read_u32_env(DTX_AGG_THD_AGE_ENV) {
            Ok(Some(v)) if (DTX_AGG_THD_AGE_MIN..=DTX_AGG_THD_AGE_MAX).contains(&v) => v,
            Ok(Some(v)) => {
                tracing::warn!(
                    value = v,
                    min = DTX_AGG_THD_AGE_MIN,
                    max = DTX_AGG_THD_AGE_MAX,
                    default = DTX_AGG_THD_AGE_DEF,
                    "{DTX_AGG_THD_AGE_ENV} out of range, using default"
                );
                DTX_AGG_THD_AGE_DEF
            }
            Ok(None) => DTX_AGG_THD_AGE_DEF,
            Err(e) => {
                tracing::warn!(error = %e, default = DTX_AGG_THD_AGE_DEF, "failed to parse {DTX_AGG_THD_AGE_ENV}, using default");
                DTX_AGG_THD_AGE_DEF
            }
        };

        let batched_ult_max = match read_u32_env(DTX_BATCHED_ULT_MAX_ENV) {
            Ok(Some(v)) => v,
            Ok(None) => DTX_BATCHED_ULT_DEF,
            Err(e) => {
                tracing::warn!(error = %e, default = DTX_BATCHED_ULT_DEF, "failed to parse {DTX_BATCHED_ULT_MAX_ENV}, using default");
                DTX_BATCHED_ULT_DEF
            }
        };

        Self::from_values(agg_thd_cnt_up, agg_thd_age_up, batched_ult_max)
    }

    /// `true` iff batched commit is disabled and every commit must go
    /// through the synchronous fallback path.
    pub fn batched_commit_disabled(&self) -> bool {
        self.batched_ult_max == 0
    }
}
