use dtx_config::{DTX_PRI_RPC_STEP_LENGTH, DTX_REG_RPC_STEP_LENGTH};

use crate::network::PeerTarget;
use crate::scheduler::YieldGate;

/// Outcome of one `DispatchCursor::advance` call (spec §4.4, "Chore
/// protocol"): `Done` once every batch has been issued, `Yielded` when the
/// cursor suspended mid-step and should be driven again.
#[derive(Debug, PartialEq, Eq)]
pub enum ChoreStep {
    Yielded,
    Done,
}

/// Resumable cursor over a flat list of `(peer, forward_idx)` sub-requests
/// (spec §9, "Reentrant cooperative tasks"). Where the C chore saves an
/// `(i, j, k)` tuple across re-entrances, this struct *is* that saved
/// state: `i` is `cursor`, `j`/`k` fold into the batch boundaries computed
/// from `step_length`.
pub struct DispatchCursor {
    targets: Vec<PeerTarget>,
    cursor: usize,
    step_length: usize,
    yield_gate: YieldGate,
}

impl DispatchCursor {
    /// A regular-priority cursor, stepping `DTX_REG_RPC_STEP_LENGTH` peers
    /// at a time (spec §4.4, "Step pacing").
    pub fn regular(targets: Vec<PeerTarget>) -> Self {
        Self::with_step(targets, DTX_REG_RPC_STEP_LENGTH)
    }

    /// A delayed/priority cursor used for phase 2 of `leader_exec_ops`,
    /// stepping `DTX_PRI_RPC_STEP_LENGTH` peers at a time.
    pub fn priority(targets: Vec<PeerTarget>) -> Self {
        Self::with_step(targets, DTX_PRI_RPC_STEP_LENGTH)
    }

    fn with_step(targets: Vec<PeerTarget>, step_length: usize) -> Self {
        Self {
            targets,
            cursor: 0,
            step_length,
            yield_gate: YieldGate::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.targets.len()
    }

    pub fn remaining(&self) -> usize {
        self.targets.len() - self.cursor
    }

    /// Drains up to one step's worth of peers, invoking `send` once per
    /// peer and yielding every `DTX_RPC_YIELD_THD` sends within the step
    /// (spec §4.4/§5). Returns `Done` once the whole cursor is drained.
    pub async fn advance<F, Fut>(&mut self, mut send: F) -> ChoreStep
    where
        F: FnMut(PeerTarget) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let end = (self.cursor + self.step_length).min(self.targets.len());
        while self.cursor < end {
            let peer = self.targets[self.cursor];
            send(peer).await;
            self.cursor += 1;
            self.yield_gate.tick().await;
        }
        if self.is_done() {
            ChoreStep::Done
        } else {
            ChoreStep::Yielded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(n: usize) -> Vec<PeerTarget> {
        (0..n as u32).map(|rank| PeerTarget { rank, tag: 0 }).collect()
    }

    #[tokio::test]
    async fn drains_exactly_once_per_target_across_multiple_steps() {
        let mut cursor = DispatchCursor::with_step(peers(5), 2);
        let mut seen = Vec::new();
        loop {
            let step = cursor
                .advance(|peer| {
                    seen.push(peer);
                    async {}
                })
                .await;
            if step == ChoreStep::Done {
                break;
            }
        }
        assert_eq!(seen.len(), 5);
        let mut ranks: Vec<_> = seen.iter().map(|p| p.rank).collect();
        ranks.sort_unstable();
        ranks.dedup();
        assert_eq!(ranks.len(), 5);
    }

    #[tokio::test]
    async fn single_step_yields_when_more_remain() {
        let mut cursor = DispatchCursor::with_step(peers(10), 3);
        let step = cursor.advance(|_| async {}).await;
        assert_eq!(step, ChoreStep::Yielded);
        assert_eq!(cursor.remaining(), 7);
    }

    #[tokio::test]
    async fn empty_cursor_is_immediately_done() {
        let mut cursor = DispatchCursor::regular(vec![]);
        assert!(cursor.is_done());
        let step = cursor.advance(|_| async {}).await;
        assert_eq!(step, ChoreStep::Done);
    }
}
