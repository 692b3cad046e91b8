use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::handles::ContainerHandle;

/// Pool id a container belongs to; opaque beyond grouping containers for
/// shared aggregation bookkeeping (spec §3, "Batched containers").
pub type PoolId = u64;

/// Per-pool aggregation bookkeeping shared by every container of that pool
/// (spec §3, `batched_pool`): `aggregating` tracks in-flight aggregation
/// tasks so the aggregation service (§4.5.2) can round-robin fairly across
/// pools without starting more than one worker per container.
#[derive(Default)]
pub struct BatchedPool {
    pub aggregating: parking_lot::Mutex<u32>,
}

/// Per-container bookkeeping the background services consult (spec §3,
/// "Batched containers"): which list (`open`/`close`) the container is in,
/// and whether a batched-commit worker is currently in flight for it.
pub struct BatchedCont {
    pub coh: ContainerHandle,
    pub pool: PoolId,
    pub open: bool,
    pub flush_pending: bool,
    pub commit_in_flight: bool,
}

impl BatchedCont {
    pub fn new(coh: ContainerHandle, pool: PoolId) -> Self {
        Self {
            coh,
            pool,
            open: true,
            flush_pending: false,
            commit_in_flight: false,
        }
    }
}

/// Per-engine registry of open/closing containers and their pools (spec
/// §3). Guarded by a single `RwLock`: lookups are expected to be rare
/// relative to steady-state commit traffic, which goes through `CosCache`
/// instead.
#[derive(Default)]
pub struct ContainerRegistry {
    containers: RwLock<HashMap<ContainerHandle, BatchedCont>>,
    pools: RwLock<HashMap<PoolId, Arc<BatchedPool>>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, coh: ContainerHandle, pool: PoolId) {
        self.pools.write().entry(pool).or_insert_with(|| Arc::new(BatchedPool::default()));
        self.containers.write().insert(coh, BatchedCont::new(coh, pool));
    }

    /// Moves a container from `open` to `close`; it keeps its pending CoS
    /// work until background services drain it (spec §5, "Shutdown path").
    pub fn begin_close(&self, coh: ContainerHandle) {
        if let Some(cont) = self.containers.write().get_mut(&coh) {
            cont.open = false;
            cont.flush_pending = true;
        }
    }

    pub fn remove(&self, coh: ContainerHandle) {
        self.containers.write().remove(&coh);
    }

    /// Containers eligible for a batched-commit pass: open, or closed with
    /// pending work, and not already running a worker (spec §4.5.1).
    pub fn eligible_for_commit(&self) -> Vec<ContainerHandle> {
        self.containers
            .read()
            .values()
            .filter(|c| (c.open || c.flush_pending) && !c.commit_in_flight)
            .map(|c| c.coh)
            .collect()
    }

    pub fn pool_of(&self, coh: ContainerHandle) -> Option<PoolId> {
        self.containers.read().get(&coh).map(|c| c.pool)
    }

    pub fn pool_handle(&self, pool: PoolId) -> Option<Arc<BatchedPool>> {
        self.pools.read().get(&pool).cloned()
    }

    pub fn set_commit_in_flight(&self, coh: ContainerHandle, in_flight: bool) {
        if let Some(cont) = self.containers.write().get_mut(&coh) {
            cont.commit_in_flight = in_flight;
        }
    }

    pub fn open_containers(&self) -> Vec<ContainerHandle> {
        self.containers.read().values().filter(|c| c.open).map(|c| c.coh).collect()
    }
}
