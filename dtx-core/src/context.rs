use std::sync::Arc;

use dtx_config::DtxConfig;
use dtx_types::TargetId;

use crate::metrics::Metrics;

/// Per-engine configuration and metrics shared by every DTX component,
/// mirroring `consensus/core::Context` in the teacher crate.
pub struct Context {
    /// Local target id of this VOS target; used to decide leadership and
    /// self-skip rules during dispatch classification.
    pub local_target: TargetId,
    pub config: Arc<DtxConfig>,
    pub metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(local_target: TargetId, config: Arc<DtxConfig>, metrics: Arc<Metrics>) -> Self {
        Self {
            local_target,
            config,
            metrics,
        }
    }

    #[cfg(test)]
    pub fn new_for_test(local_target: TargetId) -> Arc<Self> {
        Arc::new(Self::new(
            local_target,
            Arc::new(DtxConfig::default()),
            Arc::new(Metrics::new_for_test()),
        ))
    }
}
