//! Per-component error taxonomy. Library code always returns one of
//! these precise enums; nothing gets boxed into an opaque error until a caller
//! (e.g. a binary) chooses to aggregate with [`DupeError`].

use std::path::PathBuf;

use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum FingerprintError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to decode image: {0}")]
    DecodeFailed(String),
    #[error("image is below the minimum hashable size ({width}x{height})")]
    BelowMinimumSize { width: u32, height: u32 },
    #[error("wrong asset variant for this operation")]
    WrongVariant,
}

#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error("group not found: {0}")]
    GroupNotFound(Uuid),
    #[error("keeper not found: {0}")]
    KeeperNotFound(Uuid),
    #[error("keeper {keeper} is not a member of group {group}")]
    KeeperNotInGroup { group: Uuid, keeper: Uuid },
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("failed to move {path:?} to the trash: {reason}")]
    TrashMoveFailed { path: PathBuf, reason: String },
    #[error("failed to write metadata for {file_id}: {reason}")]
    MetadataWriteFailed { file_id: Uuid, reason: String },
    #[error("transaction {0} conflicts with an in-flight merge or recovery pass")]
    TransactionConflict(Uuid),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

#[derive(thiserror::Error, Debug)]
pub enum UndoError {
    #[error("undo is disabled for this transaction")]
    UndoNotAvailable,
    #[error("the undo deadline for transaction {0} has passed")]
    UndoDeadlineExceeded(Uuid),
    #[error("no metadata snapshot recorded for {0}")]
    SnapshotMissing(Uuid),
    #[error("transaction {0} was not found")]
    TransactionNotFound(Uuid),
}

#[derive(thiserror::Error, Debug)]
pub enum ScoringError {
    #[error("scoring run was cancelled")]
    Cancelled,
    #[error("time budget exceeded after {elapsed_ms}ms")]
    TimeBudgetExceeded { elapsed_ms: u64 },
    #[error("bucket exploration was cut short: {0}")]
    Incomplete(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("failed to walk {path:?}: {reason}")]
    WalkFailed { path: PathBuf, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("decode failed: {0}")]
    Failed(String),
}

#[derive(thiserror::Error, Debug)]
pub enum TrashError {
    #[error("failed to move {path:?} to the trash: {reason}")]
    MoveFailed { path: PathBuf, reason: String },
    #[error("failed to restore {path:?} from the trash: {reason}")]
    RestoreFailed { path: PathBuf, reason: String },
    #[error("the trashed file could not be located")]
    NotFound,
}

/// Aggregated error for callers (binaries, tests) that just want one `?`-able
/// type. Internal crate code keeps using the precise per-component enum above.
#[derive(thiserror::Error, Debug)]
pub enum DupeError {
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Undo(#[from] UndoError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Trash(#[from] TrashError),
}
