//! Transaction executor: pre-snapshot, keeper metadata write, trash moves,
//! commit, and failure reversal, with per-file advisory locks acquired in
//! sorted id order so distinct groups can merge concurrently without
//! deadlocking on shared files. Grounded on the teacher's `fsutils.rs`
//! atomic temp-file-then-rename helper, generalized from a single-file
//! write to a multi-step transaction protocol.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::ExecutionError;
use crate::model::{
    FileId, MergePlan, MergeTransaction, MetadataSnapshot, RestoreToken, TransactionId,
    TransactionState, SNAPSHOT_ENVELOPE_VERSION,
};
use crate::traits::{Catalog, Trash};

/// Sorted-order advisory locking over file ids, so two executors merging
/// distinct groups that happen to share a file never deadlock.
#[derive(Default)]
pub struct LockTable {
    locked: Mutex<HashSet<FileId>>,
}

impl LockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks until every id in `ids` (already sorted) is free, then marks
    /// them all locked atomically relative to other `acquire` callers.
    fn acquire(&self, ids: &[FileId]) -> LockGuard<'_> {
        loop {
            let mut locked = self.locked.lock().expect("lock table poisoned");
            if ids.iter().all(|id| !locked.contains(id)) {
                locked.extend(ids.iter().copied());
                drop(locked);
                return LockGuard { table: self, ids: ids.to_vec() };
            }
            drop(locked);
            std::thread::yield_now();
        }
    }
}

struct LockGuard<'a> {
    table: &'a LockTable,
    ids: Vec<FileId>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut locked = self.table.locked.lock().expect("lock table poisoned");
        for id in &self.ids {
            locked.remove(id);
        }
    }
}

pub struct Executor<'a> {
    catalog: &'a dyn Catalog,
    trash: &'a dyn Trash,
    locks: Arc<LockTable>,
    retention_days: i64,
}

impl<'a> Executor<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        trash: &'a dyn Trash,
        locks: Arc<LockTable>,
        retention_days: i64,
    ) -> Self {
        Self {
            catalog,
            trash,
            locks,
            retention_days,
        }
    }

    /// Runs the full merge protocol for `plan`. On any failure after the
    /// pre-snapshot, already-trashed files are restored and the keeper's
    /// metadata write (if it happened) is rolled back from the snapshot
    /// before the error propagates.
    pub fn merge(&self, plan: &MergePlan) -> Result<MergeTransaction, ExecutionError> {
        let mut sorted_ids: Vec<FileId> = plan.trash_list.clone();
        sorted_ids.push(plan.keeper_id);
        sorted_ids.sort();
        let _guard = self.locks.acquire(&sorted_ids);

        let mut metadata_snapshots = HashMap::new();
        for id in std::iter::once(plan.keeper_id).chain(plan.trash_list.iter().copied()) {
            if let Some(asset) = self
                .catalog
                .get_file_by_id(id)
                .map_err(|e| ExecutionError::MetadataWriteFailed {
                    file_id: id,
                    reason: e.to_string(),
                })?
            {
                metadata_snapshots.insert(
                    id,
                    MetadataSnapshot {
                        version: SNAPSHOT_ENVELOPE_VERSION,
                        file_id: id,
                        original_path: asset.path,
                        file_size: asset.file_size,
                        metadata: asset.metadata,
                    },
                );
            }
        }

        let mut txn = MergeTransaction {
            id: TransactionId::new_v4(),
            group_id: plan.group_id,
            keeper_id: plan.keeper_id,
            removed_ids: plan.trash_list.clone(),
            created_at: Utc::now(),
            undone_at: None,
            undo_deadline: Some(Utc::now() + chrono::Duration::days(self.retention_days)),
            metadata_snapshots,
            trash_tokens: HashMap::new(),
            field_changes: plan.field_changes.clone(),
            state: TransactionState::Pending,
        };

        // Persisted before any side effect so a crash between here and the
        // final commit leaves a `Pending` record behind for startup recovery
        // to find via `detect_incomplete_transactions`.
        self.catalog
            .record_transaction(&txn)
            .map_err(|e| ExecutionError::MetadataWriteFailed {
                file_id: plan.keeper_id,
                reason: e.to_string(),
            })?;

        if let Err(e) = self.write_keeper_metadata(plan) {
            txn.state = TransactionState::Failed;
            let _ = self.catalog.record_transaction(&txn);
            return Err(e);
        }

        let mut trashed = Vec::new();
        for id in &plan.trash_list {
            match self.trash_one(*id) {
                Ok(token) => {
                    txn.trash_tokens.insert(*id, token);
                    trashed.push(*id);
                }
                Err(e) => {
                    self.reverse(&txn, &trashed);
                    txn.state = TransactionState::Failed;
                    let _ = self.catalog.record_transaction(&txn);
                    return Err(e);
                }
            }
        }

        txn.state = TransactionState::Committed;
        self.catalog
            .record_transaction(&txn)
            .map_err(|e| ExecutionError::MetadataWriteFailed {
                file_id: plan.keeper_id,
                reason: e.to_string(),
            })?;

        Ok(txn)
    }

    fn write_keeper_metadata(&self, plan: &MergePlan) -> Result<(), ExecutionError> {
        let Some(mut keeper) =
            self.catalog
                .get_file_by_id(plan.keeper_id)
                .map_err(|e| ExecutionError::MetadataWriteFailed {
                    file_id: plan.keeper_id,
                    reason: e.to_string(),
                })?
        else {
            return Err(ExecutionError::MetadataWriteFailed {
                file_id: plan.keeper_id,
                reason: "keeper not found in catalog".into(),
            });
        };

        for change in &plan.field_changes {
            apply_field_change(&mut keeper.metadata, change);
        }

        self.catalog
            .upsert_file(&keeper)
            .map_err(|e| ExecutionError::MetadataWriteFailed {
                file_id: plan.keeper_id,
                reason: e.to_string(),
            })
    }

    fn trash_one(&self, id: FileId) -> Result<RestoreToken, ExecutionError> {
        let asset = self
            .catalog
            .get_file_by_id(id)
            .map_err(|e| ExecutionError::MetadataWriteFailed {
                file_id: id,
                reason: e.to_string(),
            })?
            .ok_or_else(|| ExecutionError::MetadataWriteFailed {
                file_id: id,
                reason: "file not found in catalog".into(),
            })?;

        self.trash
            .move_to_trash(&asset.path)
            .map_err(|e| ExecutionError::TrashMoveFailed {
                path: asset.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Restores every file already moved to trash and reverts the keeper's
    /// metadata write, using the pre-merge snapshot.
    fn reverse(&self, txn: &MergeTransaction, trashed: &[FileId]) {
        for id in trashed {
            if let (Some(token), Some(snapshot)) =
                (txn.trash_tokens.get(id), txn.metadata_snapshots.get(id))
            {
                let _ = self.trash.restore_from_trash(token, &snapshot.original_path);
            }
        }

        if let Some(snapshot) = txn.metadata_snapshots.get(&txn.keeper_id) {
            if let Ok(Some(mut keeper)) = self.catalog.get_file_by_id(txn.keeper_id) {
                keeper.metadata = snapshot.metadata.clone();
                let _ = self.catalog.upsert_file(&keeper);
            }
        }
    }
}

pub(crate) fn apply_field_change(metadata: &mut crate::model::MutableMetadata, change: &crate::model::FieldChange) {
    use crate::model::MergeFieldValue::*;
    match &change.new_value {
        CaptureTime(t) => metadata.capture_time = Some(*t),
        Gps(lat, lon) => metadata.gps = Some((*lat, *lon)),
        CameraModel(m) => metadata.camera_model = Some(m.clone()),
        Keywords(k) => metadata.keywords = Some(k.clone()),
        Tags(t) => metadata.tags = Some(t.clone()),
    }
}
