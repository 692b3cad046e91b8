use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hybrid logical clock value; used directly as a DTX epoch.
pub type Hlc = u64;

/// Sentinel epoch meaning "unbounded" / "not yet assigned".
pub const EPOCH_MAX: Hlc = u64::MAX;

/// A DTX identifier: a pair of a per-process-unique UUID and the HLC
/// timestamp at which the transaction was opened. Comparable, hashable.
///
/// The all-zero value (`Dti::NIL`) means "no DTX" and disables all
/// bookkeeping; it is a legal value everywhere a `Dti` is accepted, not an
/// error sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dti {
    uuid: Uuid,
    hlc: Hlc,
}

/// Alias matching the spec's `xid` naming for a DTX id used as a handle
/// or RPC argument.
pub type Xid = Dti;

impl Dti {
    pub const NIL: Dti = Dti {
        uuid: Uuid::nil(),
        hlc: 0,
    };

    pub fn new(uuid: Uuid, hlc: Hlc) -> Self {
        Self { uuid, hlc }
    }

    /// Allocates a fresh id for a transaction opened at `hlc`.
    pub fn generate(hlc: Hlc) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            hlc,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn hlc(&self) -> Hlc {
        self.hlc
    }

    /// Invariant 1 (spec §3): the zero value disables all DTX bookkeeping.
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl Default for Dti {
    fn default() -> Self {
        Self::NIL
    }
}

impl std::fmt::Debug for Dti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dti({}, hlc={})", self.uuid, self.hlc)
    }
}

impl std::fmt::Display for Dti {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_all_zero() {
        assert!(Dti::NIL.is_nil());
        assert_eq!(Dti::NIL.uuid(), Uuid::nil());
        assert_eq!(Dti::NIL.hlc(), 0);
    }

    #[test]
    fn generated_ids_are_not_nil_and_distinct() {
        let a = Dti::generate(10);
        let b = Dti::generate(10);
        assert!(!a.is_nil());
        assert!(!b.is_nil());
        assert_ne!(a, b);
    }

    #[test]
    fn ordering_is_total() {
        let a = Dti::new(Uuid::nil(), 1);
        let b = Dti::new(Uuid::nil(), 2);
        assert!(a < b);
    }
}
