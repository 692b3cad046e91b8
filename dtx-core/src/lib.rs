// Engine-side implementation of the Distributed Transaction (DTX) protocol:
// leader election, RPC dispatch/classification, the Commit-on-Share cache,
// collective-DTX tree broadcast, and the background services that keep a
// container's DTX table bounded (batched commit, aggregation, cleanup,
// resync, refresh).
//
// Laid out the way the teacher crate splits `consensus/core`: narrow async
// traits at every external seam (`vos`, `network`, `placement`), plain
// value types carrying protocol state, and background services as
// `Arc`-shared, `CancellationToken`-driven tasks rather than free-running
// threads.

pub mod aggregation;
pub mod batched_commit;
pub mod chore;
pub mod cleanup;
pub mod collective;
pub mod container;
pub mod context;
pub mod cos;
pub mod dispatch;
pub mod election;
pub mod error;
pub mod handle;
pub mod handles;
pub mod leader;
pub mod metrics;
pub mod network;
pub mod placement;
pub mod refresh;
pub mod resync;
pub mod scheduler;
pub mod vos;

pub use context::Context;
pub use error::{DtxError, DtxResult, ResendSignal};
pub use handle::{Dth, HandleFlags, SharePeer, SharedDth, ShareState};
pub use handles::{ContainerHandle, PoolHandle};
pub use leader::{LeaderHandle, SubStatus};
pub use metrics::Metrics;
pub use scheduler::{ShutdownToken, YieldGate};
