// Tunable constants and environment-derived configuration for the DTX engine.
//
// Mirrors the split used by `consensus/config` in the teacher crate:
// compile-time constants live next to the `DtxConfig` they parameterize,
// environment parsing is isolated in its own module, and the whole thing is
// loaded once at process init and threaded through as `Arc<DtxConfig>`.

mod env;
mod tunables;

pub use env::{EnvParseError, DTX_AGG_THD_AGE_ENV, DTX_AGG_THD_CNT_ENV, DTX_BATCHED_ULT_MAX_ENV};
pub use tunables::*;
