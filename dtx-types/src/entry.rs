use crate::id::Xid;
use crate::membership::SharedMbs;

/// Handle-level reference to a DTX's identity and membership. Multiple
/// holders (a handle, a CoS record, a dispatch batch, a resync list) each
/// keep their own `Arc<Dte>`; the last drop frees the shared `Mbs` too
/// (spec §5, "Shared resources").
#[derive(Clone, Debug)]
pub struct Dte {
    pub xid: Xid,
    /// Pool-map version under which the DTX was prepared.
    pub version: u32,
    pub mbs: SharedMbs,
}

impl Dte {
    pub fn new(xid: Xid, version: u32, mbs: SharedMbs) -> Self {
        Self { xid, version, mbs }
    }

    /// Invariant 7: `DTE_LEADER` holds iff the entry's initial leader
    /// target equals the local rank/target.
    pub fn is_local_leader(&self, local_target: crate::membership::TargetId) -> bool {
        use crate::flags::MbsFlags;
        self.mbs.flags().contains(MbsFlags::CONTAIN_LEADER)
            && self.mbs.first_target() == Some(local_target)
    }
}
