//! Startup recovery and undo. Grounded on the teacher's `fsutils.rs`
//! atomic-write discipline (a transaction interrupted between its temp-file
//! write and its rename is detected the same way here, at the level of a
//! whole merge instead of a single file) plus `txn::Executor`'s reversal
//! logic, reused for both the incomplete-transaction rollback below and for
//! undo.

use chrono::Utc;

use crate::error::UndoError;
use crate::model::{MergeTransaction, TransactionId, TransactionState};
use crate::traits::{Catalog, Trash};
use crate::txn::{apply_field_change, LockTable};
use std::collections::HashMap;
use std::sync::Arc;

/// Three-way verdict for a transaction found `Committed` at startup with no
/// matching `Undone`/archival marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryVerdict {
    /// Every trashed file is confirmed gone from its original location and
    /// the keeper carries the planned metadata: the merge finished, nothing
    /// to do.
    Complete,
    /// Some trashed files are still at their original location: the merge
    /// was interrupted before the trash step finished.
    Incomplete,
    /// The keeper's metadata doesn't match what the transaction recorded:
    /// something external modified it after the merge.
    Mismatch,
}

/// Finds every transaction left in the `Pending` state by a catalog that
/// records a new row per [`Catalog::record_transaction`] call — the executor
/// persists `Pending` before any side effect, then `Committed`/`Failed` once
/// it knows the outcome, so a `Pending` record with no later outcome means
/// the process died mid-merge. Only the latest record per transaction id is
/// considered, in case the
/// catalog is an append-only log rather than a keyed upsert store.
pub fn detect_incomplete_transactions(catalog: &dyn Catalog) -> Vec<MergeTransaction> {
    let mut latest: HashMap<TransactionId, MergeTransaction> = HashMap::new();
    for txn in catalog.fetch_history().unwrap_or_default() {
        latest.insert(txn.id, txn);
    }
    let mut pending: Vec<MergeTransaction> = latest
        .into_values()
        .filter(|t| t.state == TransactionState::Pending)
        .collect();
    pending.sort_by_key(|t| t.id);
    pending
}

/// Checks whether each trashed file from `txn` is still present at its
/// original path, and whether the keeper's current metadata matches the
/// replay of `snapshot + field_changes`, to reach one of the three verdicts
/// above. A keeper that doesn't match the replay was modified by something
/// outside this crate after the merge reportedly finished.
pub fn verify_transaction_state(
    txn: &MergeTransaction,
    catalog: &dyn Catalog,
) -> RecoveryVerdict {
    for id in &txn.removed_ids {
        if let Ok(Some(asset)) = catalog.get_file_by_id(*id) {
            if let Some(snapshot) = txn.metadata_snapshots.get(id) {
                if asset.path == snapshot.original_path {
                    return RecoveryVerdict::Incomplete;
                }
            }
        }
    }

    if let (Ok(Some(keeper)), Some(snapshot)) = (
        catalog.get_file_by_id(txn.keeper_id),
        txn.metadata_snapshots.get(&txn.keeper_id),
    ) {
        let mut expected = snapshot.metadata.clone();
        for change in &txn.field_changes {
            apply_field_change(&mut expected, change);
        }
        if keeper.metadata != expected {
            return RecoveryVerdict::Mismatch;
        }
    }

    RecoveryVerdict::Complete
}

/// One transaction's recovery result: the verdict reached, and whether the
/// outcome is safe to treat as automatic or needs a human to review it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub transaction_id: TransactionId,
    pub verdict: RecoveryVerdict,
    pub auto_recoverable: bool,
}

pub struct Recovery<'a> {
    catalog: &'a dyn Catalog,
    trash: &'a dyn Trash,
    locks: Arc<LockTable>,
}

impl<'a> Recovery<'a> {
    pub fn new(catalog: &'a dyn Catalog, trash: &'a dyn Trash, locks: Arc<LockTable>) -> Self {
        Self {
            catalog,
            trash,
            locks,
        }
    }

    /// Applies the recovery policy per verdict. `Complete` transactions had
    /// every step finish before the crash and are finalized to `Committed`.
    /// `Incomplete` ones are rolled back in preference to resuming forward:
    /// whatever trash moves already happened are undone and the keeper's
    /// metadata is reverted from its snapshot, the same reversal
    /// `txn::Executor::merge` itself runs on a mid-merge failure, and the
    /// transaction is marked `Undone`. `Mismatch` ones are only logged and
    /// left `Pending` — recovery never guesses at externally-modified state.
    ///
    /// `auto_recoverable` is true only for outcomes with no user-visible
    /// divergence from one of the two deterministic end states (fully
    /// merged, or fully rolled back): `Complete` and rolled-back
    /// `Incomplete` transactions qualify, `Mismatch` ones don't and need a
    /// human to look at what changed.
    pub fn recover_incomplete_transactions(&self) -> Vec<RecoveryOutcome> {
        let mut results = Vec::new();
        for mut txn in detect_incomplete_transactions(self.catalog) {
            let verdict = verify_transaction_state(&txn, self.catalog);
            let auto_recoverable = match verdict {
                RecoveryVerdict::Incomplete => {
                    self.rollback_incomplete(&txn);
                    txn.state = TransactionState::Undone;
                    txn.undone_at = Some(Utc::now());
                    let _ = self.catalog.record_transaction(&txn);
                    true
                }
                RecoveryVerdict::Complete => {
                    txn.state = TransactionState::Committed;
                    let _ = self.catalog.record_transaction(&txn);
                    true
                }
                RecoveryVerdict::Mismatch => false,
            };
            results.push(RecoveryOutcome {
                transaction_id: txn.id,
                verdict,
                auto_recoverable,
            });
        }
        results
    }

    /// Undoes whatever of `txn`'s trash moves already happened and reverts
    /// the keeper's metadata to its pre-merge snapshot. Only files with a
    /// recorded trash token were actually moved; the rest are still at
    /// their original path and need no action.
    fn rollback_incomplete(&self, txn: &MergeTransaction) {
        for (id, token) in &txn.trash_tokens {
            if let Some(snapshot) = txn.metadata_snapshots.get(id) {
                let _ = self
                    .trash
                    .restore_from_trash(token, &snapshot.original_path);
            }
        }

        if let Some(snapshot) = txn.metadata_snapshots.get(&txn.keeper_id) {
            if let Ok(Some(mut keeper)) = self.catalog.get_file_by_id(txn.keeper_id) {
                keeper.metadata = snapshot.metadata.clone();
                let _ = self.catalog.upsert_file(&keeper);
            }
        }
    }

    /// Undoes the most recent transaction within its retention window.
    pub fn undo_last(&self, history: &[MergeTransaction]) -> Result<MergeTransaction, UndoError> {
        let latest = history
            .iter()
            .filter(|t| t.state == TransactionState::Committed)
            .max_by_key(|t| t.created_at)
            .ok_or(UndoError::TransactionNotFound(TransactionId::nil()))?;
        self.undo(latest.id, history)
    }

    /// Undoes a specific transaction by id, failing if it has already been
    /// undone, doesn't exist, or its retention deadline
    /// (`created_at + retention_days`) has passed.
    pub fn undo(
        &self,
        id: TransactionId,
        history: &[MergeTransaction],
    ) -> Result<MergeTransaction, UndoError> {
        let txn = history
            .iter()
            .find(|t| t.id == id)
            .ok_or(UndoError::TransactionNotFound(id))?;

        if txn.state != TransactionState::Committed {
            return Err(UndoError::UndoNotAvailable);
        }

        if let Some(deadline) = txn.undo_deadline {
            if Utc::now() > deadline {
                return Err(UndoError::UndoDeadlineExceeded(id));
            }
        }

        for file_id in &txn.removed_ids {
            let token = txn
                .trash_tokens
                .get(file_id)
                .ok_or(UndoError::SnapshotMissing(*file_id))?;
            let snapshot = txn
                .metadata_snapshots
                .get(file_id)
                .ok_or(UndoError::SnapshotMissing(*file_id))?;
            let _ = self
                .trash
                .restore_from_trash(token, &snapshot.original_path);
        }

        if let Some(keeper_snapshot) = txn.metadata_snapshots.get(&txn.keeper_id) {
            if let Ok(Some(mut keeper)) = self.catalog.get_file_by_id(txn.keeper_id) {
                keeper.metadata = keeper_snapshot.metadata.clone();
                let _ = self.catalog.upsert_file(&keeper);
            }
        }

        let mut undone = txn.clone();
        undone.state = TransactionState::Undone;
        undone.undone_at = Some(Utc::now());
        let _ = self.catalog.record_transaction(&undone);
        Ok(undone)
    }
}

/// Archives (marks permanently non-undoable) every committed transaction
/// whose retention deadline has passed.
pub fn archive_expired(history: &[MergeTransaction]) -> Vec<TransactionId> {
    let now = Utc::now();
    history
        .iter()
        .filter(|t| t.state == TransactionState::Committed)
        .filter(|t| t.undo_deadline.is_some_and(|d| now > d))
        .map(|t| t.id)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{Asset, DuplicateGroup, FileId, MediaType, MetadataSnapshot, MutableMetadata, RestoreToken};
    use crate::traits::CatalogError;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct FakeCatalog {
        files: Mutex<HashMap<FileId, Asset>>,
    }

    impl Catalog for FakeCatalog {
        fn upsert_file(&self, asset: &Asset) -> Result<(), CatalogError> {
            self.files.lock().unwrap().insert(asset.id, asset.clone());
            Ok(())
        }
        fn get_file_by_id(&self, id: FileId) -> Result<Option<Asset>, CatalogError> {
            Ok(self.files.lock().unwrap().get(&id).cloned())
        }
        fn resolve_url(&self, _path: &std::path::Path) -> Result<Option<String>, CatalogError> {
            Ok(None)
        }
        fn create_or_update_group(&self, _group: &DuplicateGroup) -> Result<(), CatalogError> {
            Ok(())
        }
        fn record_transaction(&self, _txn: &MergeTransaction) -> Result<(), CatalogError> {
            Ok(())
        }
        fn fetch_history(&self) -> Result<Vec<MergeTransaction>, CatalogError> {
            Ok(Vec::new())
        }
    }

    struct FakeTrash;
    impl Trash for FakeTrash {
        fn move_to_trash(&self, path: &std::path::Path) -> Result<RestoreToken, crate::error::TrashError> {
            Ok(RestoreToken {
                original_path: path.to_path_buf(),
                trashed_at: Utc::now(),
                trash_url: None,
            })
        }
        fn restore_from_trash(&self, _token: &RestoreToken, _original_path: &std::path::Path) -> Result<(), crate::error::TrashError> {
            Ok(())
        }
    }

    fn committed_txn(keeper_id: FileId, removed_id: FileId) -> MergeTransaction {
        let mut metadata_snapshots = HashMap::new();
        metadata_snapshots.insert(
            removed_id,
            MetadataSnapshot {
                version: 1,
                file_id: removed_id,
                original_path: PathBuf::from("/trashed.jpg"),
                file_size: 1000,
                metadata: MutableMetadata::default(),
            },
        );
        metadata_snapshots.insert(
            keeper_id,
            MetadataSnapshot {
                version: 1,
                file_id: keeper_id,
                original_path: PathBuf::from("/keeper.jpg"),
                file_size: 1000,
                metadata: MutableMetadata::default(),
            },
        );

        let mut trash_tokens = HashMap::new();
        trash_tokens.insert(
            removed_id,
            RestoreToken {
                original_path: PathBuf::from("/trashed.jpg"),
                trashed_at: Utc::now(),
                trash_url: None,
            },
        );

        MergeTransaction {
            id: TransactionId::new_v4(),
            group_id: crate::model::GroupId::new_v4(),
            keeper_id,
            removed_ids: vec![removed_id],
            created_at: Utc::now(),
            undone_at: None,
            undo_deadline: Some(Utc::now() + chrono::Duration::days(7)),
            metadata_snapshots,
            trash_tokens,
            field_changes: Vec::new(),
            state: TransactionState::Committed,
        }
    }

    #[test]
    fn undo_past_deadline_is_rejected() {
        let keeper_id = FileId::new_v4();
        let removed_id = FileId::new_v4();
        let mut txn = committed_txn(keeper_id, removed_id);
        txn.undo_deadline = Some(Utc::now() - chrono::Duration::days(1));

        let catalog = FakeCatalog { files: Mutex::new(HashMap::new()) };
        let trash = FakeTrash;
        let recovery = Recovery::new(&catalog, &trash, LockTable::new());
        let err = recovery.undo(txn.id, &[txn]).unwrap_err();
        assert!(matches!(err, UndoError::UndoDeadlineExceeded(_)));
    }

    #[test]
    fn undo_unknown_transaction_errors() {
        let catalog = FakeCatalog { files: Mutex::new(HashMap::new()) };
        let trash = FakeTrash;
        let recovery = Recovery::new(&catalog, &trash, LockTable::new());
        let err = recovery.undo(TransactionId::new_v4(), &[]).unwrap_err();
        assert!(matches!(err, UndoError::TransactionNotFound(_)));
    }

    #[test]
    fn archive_expired_finds_past_deadline_transactions() {
        let keeper_id = FileId::new_v4();
        let removed_id = FileId::new_v4();
        let mut txn = committed_txn(keeper_id, removed_id);
        txn.undo_deadline = Some(Utc::now() - chrono::Duration::days(1));
        let ids = archive_expired(&[txn.clone()]);
        assert_eq!(vec![txn.id], ids);
    }

    struct RecordingCatalog {
        files: Mutex<HashMap<FileId, Asset>>,
        transactions: Mutex<Vec<MergeTransaction>>,
    }

    impl RecordingCatalog {
        fn new(files: Vec<Asset>) -> Self {
            Self {
                files: Mutex::new(files.into_iter().map(|a| (a.id, a)).collect()),
                transactions: Mutex::new(Vec::new()),
            }
        }
    }

    impl Catalog for RecordingCatalog {
        fn upsert_file(&self, asset: &Asset) -> Result<(), CatalogError> {
            self.files.lock().unwrap().insert(asset.id, asset.clone());
            Ok(())
        }
        fn get_file_by_id(&self, id: FileId) -> Result<Option<Asset>, CatalogError> {
            Ok(self.files.lock().unwrap().get(&id).cloned())
        }
        fn resolve_url(&self, _path: &std::path::Path) -> Result<Option<String>, CatalogError> {
            Ok(None)
        }
        fn create_or_update_group(&self, _group: &DuplicateGroup) -> Result<(), CatalogError> {
            Ok(())
        }
        fn record_transaction(&self, txn: &MergeTransaction) -> Result<(), CatalogError> {
            self.transactions.lock().unwrap().push(txn.clone());
            Ok(())
        }
        fn fetch_history(&self) -> Result<Vec<MergeTransaction>, CatalogError> {
            Ok(self.transactions.lock().unwrap().clone())
        }
    }

    fn asset_at(id: FileId, path: &str) -> Asset {
        let mut a = Asset::new(PathBuf::from(path), MediaType::Photo, 1000);
        a.id = id;
        a
    }

    #[test]
    fn detect_incomplete_transactions_only_returns_pending_and_dedupes_by_id() {
        let keeper_id = FileId::new_v4();
        let removed_id = FileId::new_v4();
        let catalog = RecordingCatalog::new(vec![
            asset_at(keeper_id, "/keeper.jpg"),
            asset_at(removed_id, "/trashed.jpg"),
        ]);

        let mut txn = committed_txn(keeper_id, removed_id);
        txn.state = TransactionState::Pending;
        catalog.record_transaction(&txn).unwrap();

        // A later write for the same id (now committed) supersedes the
        // pending record; only the latest state counts.
        let mut finished = txn.clone();
        finished.state = TransactionState::Committed;
        catalog.record_transaction(&finished).unwrap();

        assert!(detect_incomplete_transactions(&catalog).is_empty());
    }

    #[test]
    fn pending_transaction_with_trashed_file_still_present_is_incomplete() {
        let keeper_id = FileId::new_v4();
        let removed_id = FileId::new_v4();
        // The trashed file is still sitting at its original path: the trash
        // step never ran before the crash.
        let catalog = RecordingCatalog::new(vec![
            asset_at(keeper_id, "/keeper.jpg"),
            asset_at(removed_id, "/trashed.jpg"),
        ]);

        let mut txn = committed_txn(keeper_id, removed_id);
        txn.state = TransactionState::Pending;
        catalog.record_transaction(&txn).unwrap();

        let pending = detect_incomplete_transactions(&catalog);
        assert_eq!(1, pending.len());
        assert_eq!(RecoveryVerdict::Incomplete, verify_transaction_state(&pending[0], &catalog));
    }

    #[test]
    fn keeper_metadata_reverted_to_snapshot_after_trash_completed_is_mismatch() {
        let keeper_id = FileId::new_v4();
        let removed_id = FileId::new_v4();
        // Trashed file is gone from its original location (trash step
        // finished), but the keeper still carries its pre-merge metadata
        // even though the transaction recorded a field change — someone
        // reverted it outside this crate.
        let catalog = RecordingCatalog::new(vec![asset_at(keeper_id, "/keeper.jpg")]);

        let mut txn = committed_txn(keeper_id, removed_id);
        txn.state = TransactionState::Pending;
        txn.field_changes.push(crate::model::FieldChange {
            field: "camera_model",
            source_id: removed_id,
            new_value: crate::model::MergeFieldValue::CameraModel("Canon".into()),
        });
        catalog.record_transaction(&txn).unwrap();

        assert_eq!(
            RecoveryVerdict::Mismatch,
            verify_transaction_state(&txn, &catalog)
        );
    }

    #[test]
    fn recover_incomplete_transactions_finalizes_complete_ones_to_committed() {
        let keeper_id = FileId::new_v4();
        let removed_id = FileId::new_v4();
        // Keeper already carries the expected post-merge metadata and the
        // trashed file is gone: the merge finished, only the final
        // `Committed` write was lost to the crash.
        let mut keeper = asset_at(keeper_id, "/keeper.jpg");
        keeper.metadata.camera_model = Some("Canon".into());
        let catalog = RecordingCatalog::new(vec![keeper]);

        let mut txn = committed_txn(keeper_id, removed_id);
        txn.state = TransactionState::Pending;
        txn.field_changes.push(crate::model::FieldChange {
            field: "camera_model",
            source_id: removed_id,
            new_value: crate::model::MergeFieldValue::CameraModel("Canon".into()),
        });
        catalog.record_transaction(&txn).unwrap();

        let trash = FakeTrash;
        let recovery = Recovery::new(&catalog, &trash, LockTable::new());
        let results = recovery.recover_incomplete_transactions();
        assert_eq!(1, results.len());
        assert_eq!(txn.id, results[0].transaction_id);
        assert_eq!(RecoveryVerdict::Complete, results[0].verdict);
        assert!(results[0].auto_recoverable);
        assert!(detect_incomplete_transactions(&catalog).is_empty());
    }

    #[test]
    fn incomplete_transaction_is_rolled_back_rather_than_resumed() {
        let keeper_id = FileId::new_v4();
        let removed_id = FileId::new_v4();
        // The trashed file is still at its original path: the trash step
        // never ran before the crash, so verification reads `Incomplete`.
        let catalog = RecordingCatalog::new(vec![
            asset_at(keeper_id, "/keeper.jpg"),
            asset_at(removed_id, "/trashed.jpg"),
        ]);

        let mut txn = committed_txn(keeper_id, removed_id);
        txn.state = TransactionState::Pending;
        catalog.record_transaction(&txn).unwrap();

        let trash = FakeTrash;
        let recovery = Recovery::new(&catalog, &trash, LockTable::new());
        let results = recovery.recover_incomplete_transactions();
        assert_eq!(1, results.len());
        assert_eq!(RecoveryVerdict::Incomplete, results[0].verdict);
        assert!(results[0].auto_recoverable);

        let history = catalog.fetch_history().unwrap();
        let recovered = history.iter().rev().find(|t| t.id == txn.id).unwrap();
        assert_eq!(TransactionState::Undone, recovered.state);
    }

    #[test]
    fn mismatched_transaction_is_left_pending_and_not_auto_recoverable() {
        let keeper_id = FileId::new_v4();
        let removed_id = FileId::new_v4();
        let catalog = RecordingCatalog::new(vec![asset_at(keeper_id, "/keeper.jpg")]);

        let mut txn = committed_txn(keeper_id, removed_id);
        txn.state = TransactionState::Pending;
        txn.field_changes.push(crate::model::FieldChange {
            field: "camera_model",
            source_id: removed_id,
            new_value: crate::model::MergeFieldValue::CameraModel("Canon".into()),
        });
        catalog.record_transaction(&txn).unwrap();

        let trash = FakeTrash;
        let recovery = Recovery::new(&catalog, &trash, LockTable::new());
        let results = recovery.recover_incomplete_transactions();
        assert_eq!(1, results.len());
        assert_eq!(RecoveryVerdict::Mismatch, results[0].verdict);
        assert!(!results[0].auto_recoverable);
    }

    #[test]
    fn not_yet_expired_transactions_are_not_archived() {
        let keeper_id = FileId::new_v4();
        let removed_id = FileId::new_v4();
        let txn = committed_txn(keeper_id, removed_id);
        assert!(archive_expired(&[txn]).is_empty());
    }
}
