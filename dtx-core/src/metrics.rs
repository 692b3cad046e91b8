use prometheus::{
    HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// Per-engine DTX metrics, registered once against a `prometheus::Registry`
/// and shared as `Arc<Metrics>` via `Context`, the way the teacher threads
/// `context.metrics.node_metrics.*` through every component instead of
/// using thread-locals (spec §9, "Thread-local storage").
pub struct Metrics {
    /// Current size of the CoS committable set, summed over containers.
    pub committable: IntGauge,
    /// Total DTXs for which this engine acted as leader.
    pub leader_total: IntCounter,
    /// Latency of the asynchronous (batched) commit path.
    pub async_cmt_lat: HistogramVec,
    /// Number of times the dispatch chore retried after `-AGAIN`.
    pub chore_retry: IntCounter,
    /// Per-opcode RPC batch degree (targets per RPC) and totals issued.
    pub batched_degree: HistogramVec,
    pub rpc_totals: IntCounterVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Self {
        let committable = IntGauge::new(
            "dtx_committable",
            "Number of committable DTX entries cached in DRAM",
        )
        .unwrap();
        let leader_total = IntCounter::new(
            "dtx_leader_total",
            "Total DTX transactions driven as leader",
        )
        .unwrap();
        let async_cmt_lat = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dtx_async_commit_latency_seconds",
                "Latency of the asynchronous batched-commit path",
            ),
            &["opcode"],
        )
        .unwrap();
        let chore_retry = IntCounter::new(
            "dtx_chore_retry_total",
            "Number of dispatch-chore retries after -DER_AGAIN",
        )
        .unwrap();
        let batched_degree = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dtx_rpc_batched_degree",
                "Number of targets carried by a single dispatched RPC",
            ),
            &["opcode"],
        )
        .unwrap();
        let rpc_totals = IntCounterVec::new(
            Opts::new("dtx_rpc_total", "Total DTX RPCs issued"),
            &["opcode"],
        )
        .unwrap();

        registry.register(Box::new(committable.clone())).ok();
        registry.register(Box::new(leader_total.clone())).ok();
        registry.register(Box::new(async_cmt_lat.clone())).ok();
        registry.register(Box::new(chore_retry.clone())).ok();
        registry.register(Box::new(batched_degree.clone())).ok();
        registry.register(Box::new(rpc_totals.clone())).ok();

        Self {
            committable,
            leader_total,
            async_cmt_lat,
            chore_retry,
            batched_degree,
            rpc_totals,
        }
    }

    /// A `Metrics` registered against a private, throwaway registry; used
    /// by unit tests that don't care about global metric names colliding.
    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Self::new(&Registry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let m = Metrics::new_for_test();
        assert_eq!(m.leader_total.get(), 0);
        m.leader_total.inc();
        assert_eq!(m.leader_total.get(), 1);
        m.rpc_totals.with_label_values(&["COMMIT"]).inc();
        assert_eq!(m.rpc_totals.with_label_values(&["COMMIT"]).get(), 1);
    }
}
