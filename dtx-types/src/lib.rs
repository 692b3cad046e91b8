// Wire and in-memory data model for DTX.
//
// Mirrors `consensus/types` / `consensus/core/src/block.rs` in the teacher
// crate: plain serializable value types with structured accessors, no
// behavior beyond construction, validation and (de)serialization.

mod entry;
mod flags;
mod id;
mod membership;
mod state;

pub use entry::Dte;
pub use flags::MbsFlags;
pub use id::{Dti, Hlc, Xid, EPOCH_MAX};
pub use membership::{
    CollTargetBlock, DkeyHash, GroupDesc, Mbs, MbsError, Oid, SharedMbs, TargetDesc, TargetId,
};
pub use state::DtxState;
