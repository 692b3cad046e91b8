use serde::{Deserialize, Serialize};

/// A small hand-rolled bitset, used instead of pulling in a flags crate for
/// the handful of bits the membership descriptor carries. Mirrors the plain
/// `uint32_t` bitmasks of the C engine.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MbsFlags(u32);

impl MbsFlags {
    pub const NONE: MbsFlags = MbsFlags(0);

    /// The first target entry is the current leader.
    pub const CONTAIN_LEADER: MbsFlags = MbsFlags(1 << 0);
    /// This is a collective DTX spanning all VOS targets of many engines.
    pub const COLL_TARGET: MbsFlags = MbsFlags(1 << 1);
    /// Single redundancy group, replicated (as opposed to erasure-coded).
    pub const SRDG_REP: MbsFlags = MbsFlags(1 << 2);
    /// Set on the copy held by the initial leader (`DTE_LEADER`, invariant 7).
    pub const LEADER: MbsFlags = MbsFlags(1 << 3);
    /// Commit was acknowledged by some but not all participants; the
    /// remainder must be retried.
    pub const PARTIAL_COMMITTED: MbsFlags = MbsFlags(1 << 4);
    /// Too many redundancy-group members were lost; the DTX can never
    /// reach a full commit.
    pub const CORRUPTED: MbsFlags = MbsFlags(1 << 5);
    /// A `REFRESH` could not determine the DTX's fate (`TX_UNCERTAIN`).
    pub const ORPHAN: MbsFlags = MbsFlags(1 << 6);
    /// The membership descriptor failed validation and must not be acted on.
    pub const INVALID: MbsFlags = MbsFlags(1 << 7);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        MbsFlags(bits)
    }

    pub fn contains(self, flag: MbsFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn insert(&mut self, flag: MbsFlags) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: MbsFlags) {
        self.0 &= !flag.0;
    }

    pub fn union(self, other: MbsFlags) -> MbsFlags {
        MbsFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for MbsFlags {
    type Output = MbsFlags;
    fn bitor(self, rhs: MbsFlags) -> MbsFlags {
        self.union(rhs)
    }
}

impl std::fmt::Debug for MbsFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        for (bit, name) in [
            (Self::CONTAIN_LEADER, "CONTAIN_LEADER"),
            (Self::COLL_TARGET, "COLL_TARGET"),
            (Self::SRDG_REP, "SRDG_REP"),
            (Self::LEADER, "LEADER"),
            (Self::PARTIAL_COMMITTED, "PARTIAL_COMMITTED"),
            (Self::CORRUPTED, "CORRUPTED"),
            (Self::ORPHAN, "ORPHAN"),
            (Self::INVALID, "INVALID"),
        ] {
            if self.contains(bit) {
                names.push(name);
            }
        }
        write!(f, "MbsFlags({})", names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_roundtrip() {
        let mut f = MbsFlags::NONE;
        assert!(!f.contains(MbsFlags::COLL_TARGET));
        f.insert(MbsFlags::COLL_TARGET);
        assert!(f.contains(MbsFlags::COLL_TARGET));
        f.remove(MbsFlags::COLL_TARGET);
        assert!(!f.contains(MbsFlags::COLL_TARGET));
    }

    #[test]
    fn union_combines_bits() {
        let f = MbsFlags::CONTAIN_LEADER | MbsFlags::SRDG_REP;
        assert!(f.contains(MbsFlags::CONTAIN_LEADER));
        assert!(f.contains(MbsFlags::SRDG_REP));
        assert!(!f.contains(MbsFlags::COLL_TARGET));
    }
}
