use thiserror::Error;

/// Error taxonomy for the DTX engine (spec §7). Variant names follow the
/// `-E...` error codes of the C engine; `DtxError` is the typed equivalent
/// of `ConsensusError` in the teacher crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DtxError {
    // --- Retryable-local ---
    /// Leader will re-issue without aborting.
    #[error("operation should be retried locally (-DER_AGAIN)")]
    Again,
    /// Internal allocation failure; almost always fatal for the
    /// transaction, not the engine.
    #[error("out of memory (-DER_NOMEM)")]
    NoMem,

    // --- Retryable-global ---
    /// Tell the client to retry later.
    #[error("operation in progress, retry later (-DER_INPROGRESS)")]
    InProgress,
    #[error("request timed out (-DER_TIMEDOUT)")]
    TimedOut,
    #[error("out of group / partial network failure (-DER_OOG)")]
    Oog,
    #[error("transport-level (HG) failure (-DER_HG)")]
    Hg,
    #[error("pool-map version is stale (-DER_STALE)")]
    Stale,

    // --- Already-done ---
    /// Commit race: treated as success once observed at the leader.
    #[error("already committed (-DER_ALREADY)")]
    Already,
    /// Entry gone; idempotent success on commit/abort.
    #[error("no such DTX entry (-DER_NONEXIST)")]
    NonExist,

    // --- Membership ---
    #[error("target excluded from the pool map (-DER_EXCLUDED)")]
    Excluded,
    #[error("engine is shutting down (-DER_SHUTDOWN)")]
    Shutdown,
    #[error("operation canceled (-DER_CANCELED)")]
    Canceled,

    // --- Data integrity ---
    /// Found by `REFRESH`: too many redundancy-group members were lost.
    #[error("DTX is corrupted (-DER_DATA_LOSS)")]
    DataLoss,
    /// `REFRESH` cannot decide; must be surfaced to the client.
    #[error("DTX fate is uncertain (-DER_TX_UNCERTAIN)")]
    TxUncertain,

    // --- Protocol ---
    #[error("protocol violation (-DER_PROTO)")]
    Proto,
    #[error("invalid argument (-DER_INVAL): {0}")]
    Inval(String),
    #[error("operation not permitted (-DER_NO_PERM): {0}")]
    NoPerm(String),
    #[error("I/O error (-DER_IO)")]
    Io,
    #[error("counter overflow (-DER_OVERFLOW): {0}")]
    Overflow(String),
}

pub type DtxResult<T> = Result<T, DtxError>;

impl DtxError {
    /// `true` for errors a `COMMIT` sender should treat as "remote thinks
    /// it's done" rather than a hard failure (spec §7 propagation policy).
    pub fn is_benign_on_commit(&self) -> bool {
        matches!(self, DtxError::NonExist | DtxError::Excluded | DtxError::Oog)
    }

    /// `true` for errors an `ABORT` sender should treat as idempotent
    /// success (spec §6: "`-NONEXIST` ... never treated as hard failure").
    pub fn is_benign_on_abort(&self) -> bool {
        matches!(self, DtxError::NonExist)
    }

    /// `leader_end`/`end` collapse `-ALREADY` to success (spec §7).
    pub fn is_already_done(&self) -> bool {
        matches!(self, DtxError::Already)
    }
}

/// The five-way signal a resent-RPC / refresh handler resolves to (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendSignal {
    NeedCommit,
    NeedRetry,
    Ignore,
    AbortFailed,
    Corrupt,
}
