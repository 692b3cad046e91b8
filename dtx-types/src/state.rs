/// Observed lifecycle of a DTX entry in VOS (spec §3). Transition legality
/// is enforced centrally here so that every caller (handle end, resync,
/// refresh, cleanup) agrees on what is and isn't reachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DtxState {
    Inited,
    Preparing,
    Prepared,
    Aborting,
    Aborted,
    Committable,
    Committing,
    Committed,
    /// Too many redundancy-group members were lost (spec invariant 4).
    Corrupted,
    /// A refresh hit `TX_UNCERTAIN` and could not resolve the DTX's fate.
    Orphan,
}

impl DtxState {
    /// Terminal states never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DtxState::Aborted | DtxState::Committed | DtxState::Corrupted | DtxState::Orphan
        )
    }

    /// `true` iff `self -> to` is a legal single-step transition per the
    /// diagram in spec §3. Used to assert invariant 2 ("no COMMITTED ->
    /// PREPARED is observable") in tests and at the boundary of every
    /// function here that mutates state.
    pub fn can_transition_to(self, to: DtxState) -> bool {
        use DtxState::*;
        if self == to {
            return true;
        }
        match (self, to) {
            (Inited, Preparing) => true,
            (Inited, Aborting) => true,
            (Preparing, Prepared) => true,
            (Preparing, Aborting) => true,
            (Prepared, Committable) => true,
            (Prepared, Aborting) => true,
            (Prepared, Corrupted) => true,
            (Prepared, Orphan) => true,
            (Committable, Committing) => true,
            (Committing, Committed) => true,
            // A partially-committed attempt may be retried straight from
            // Committable without passing back through Prepared.
            (Committing, Committable) => true,
            (Aborting, Aborted) => true,
            _ => false,
        }
    }
}
