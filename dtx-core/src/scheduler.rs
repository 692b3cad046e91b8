use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dtx_config::DTX_RPC_YIELD_THD;

/// Shutdown/quiescence handshake for background services (spec §5,
/// "Cancellation & timeouts"). Each service holds a clone of the token and
/// polls it at every loop iteration instead of busy-sleeping on a refcount,
/// per the "safe implementation" note in spec §9.
#[derive(Clone, Default)]
pub struct ShutdownToken(CancellationToken);

impl ShutdownToken {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    pub fn child(&self) -> Self {
        Self(self.0.child_token())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }
}

/// Spawns a named background task, the Rust analogue of `dss_ult_create`
/// with a debug name (teacher: `thread::Builder::new().name(...)`).
pub fn spawn_named<F>(name: &'static str, fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tracing::debug!(task = name, "spawning background task");
    tokio::spawn(fut)
}

/// A counter that yields the executor every `DTX_RPC_YIELD_THD` calls,
/// modelling the C engine's "yield every 32 RPC sends" rule (spec §4.4,
/// "Step pacing").
#[derive(Default)]
pub struct YieldGate {
    count: usize,
}

impl YieldGate {
    pub fn new() -> Self {
        Self { count: 0 }
    }

    /// Call once per unit of work; yields (and resets) once the threshold
    /// is reached.
    pub async fn tick(&mut self) {
        self.count += 1;
        if self.count >= DTX_RPC_YIELD_THD {
            self.count = 0;
            tokio::task::yield_now().await;
        }
    }
}
