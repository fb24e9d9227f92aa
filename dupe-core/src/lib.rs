//! Photo/video deduplication engine: fingerprinting, near-neighbor indexing,
//! candidate bucketing, confidence scoring, keeper selection, merge
//! planning, and atomic/undoable merge execution. Grounded throughout on
//! `erikvader/imgdup`'s library/binary split — see `DESIGN.md` for the
//! per-module grounding ledger.

pub mod bktree;
pub mod bucket;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hashing;
pub mod model;
pub mod plan;
pub mod recovery;
pub mod scheduler;
pub mod scorer;
pub mod traits;
pub mod txn;

use std::sync::Arc;

use bktree::AlgoIndex;
use config::EngineConfig;
use error::{DupeError, PlanError};
use model::{
    Asset, Bucket, DuplicateGroup, FileId, GroupMember, MergePlan, MergeTransaction, Signal,
};
use scheduler::CancellationToken;
use traits::{Catalog, Trash};

/// Builds every candidate bucket for `assets`, consulting `hash_index` for
/// the near-hash strategy.
pub fn build_candidates(
    assets: &[Asset],
    hash_index: &AlgoIndex,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Vec<Bucket> {
    bucket::Bucketer::new(&config.detection).build_buckets(assets, hash_index, cancel)
}

/// Scores every bucket and folds the results into `DuplicateGroup`s, one per
/// bucket whose best pairwise confidence clears the `confidence_similar`
/// threshold. A group's confidence is the max confidence over its members.
///
/// Discards the run's [`scorer::ScoringMetrics`]; callers that need the
/// `total_comparisons`/`reduction_percentage` figures should call
/// [`build_groups_with_metrics`] instead.
pub fn build_groups(
    buckets: &[Bucket],
    assets_by_id: &std::collections::HashMap<FileId, Asset>,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Vec<DuplicateGroup> {
    build_groups_with_metrics(buckets, assets_by_id, config, cancel).0
}

/// Same as [`build_groups`], but also returns the run's aggregate
/// `ScoringMetrics`: `total_assets`, `naive_comparisons`,
/// `total_comparisons`, `reduction_percentage`, `buckets_created`.
pub fn build_groups_with_metrics(
    buckets: &[Bucket],
    assets_by_id: &std::collections::HashMap<FileId, Asset>,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> (Vec<DuplicateGroup>, scorer::ScoringMetrics) {
    let scorer = scorer::Scorer::new(&config.detection);
    let selector = plan::KeeperSelector;
    let mut groups = Vec::new();

    let total_assets = assets_by_id.len() as u64;
    let mut run_metrics = scorer::ScoringMetrics {
        total_assets: assets_by_id.len(),
        naive_comparisons: total_assets.saturating_mul(total_assets.saturating_sub(1)) / 2,
        total_comparisons: 0,
        buckets_created: buckets.len(),
    };

    for bucket in buckets {
        let members: Vec<&Asset> = bucket
            .file_ids
            .iter()
            .filter_map(|id| assets_by_id.get(id))
            .collect();
        if members.len() < 2 {
            continue;
        }

        let mut metrics = scorer::ScoringMetrics::default();
        let (pair_scores, incomplete) = scorer.score_bucket(&members, cancel, &mut metrics);
        run_metrics.total_comparisons += metrics.total_comparisons;

        let mut best_by_member: std::collections::HashMap<FileId, GroupMember> =
            std::collections::HashMap::new();
        for (a, b, _) in &pair_scores {
            for member in [a, b] {
                best_by_member
                    .entry(member.file_id)
                    .and_modify(|existing| {
                        if member.confidence > existing.confidence {
                            *existing = member.clone();
                        }
                    })
                    .or_insert_with(|| member.clone());
            }
        }

        if best_by_member.is_empty() {
            continue;
        }

        let confidence = best_by_member
            .values()
            .map(|m| m.confidence)
            .fold(0.0, f64::max);
        if confidence < config.detection.thresholds.confidence_similar {
            continue;
        }

        let owned_members: Vec<Asset> = members.iter().map(|a| (*a).clone()).collect();
        let keeper_suggestion = selector.suggest_keeper(&owned_members).map(|a| a.id);

        let mut rationale_lines = vec![format!(
            "bucket '{}' ({} members) via {}",
            bucket.key.0,
            bucket.file_ids.len(),
            bucket.heuristic_name
        )];
        rationale_lines.extend(signal_rationale_tokens(&pair_scores, assets_by_id));

        groups.push(DuplicateGroup {
            group_id: model::GroupId::new_v4(),
            members: best_by_member.into_values().collect(),
            confidence,
            rationale_lines,
            keeper_suggestion,
            incomplete,
            media_type: owned_members[0].media_type,
        });
    }

    (groups, run_metrics)
}

/// Turns the fired signals of a bucket's best-scoring pair into the literal
/// rationale tokens callers grep for (`"checksum"`, `"policy.raw-jpeg"`,
/// `"policy.live-photo"`, ...). `PolicyBonus` alone doesn't say which policy
/// fired, so the winning pair's assets are re-examined the same way the
/// scorer decided it in the first place.
fn signal_rationale_tokens(
    pair_scores: &[(GroupMember, GroupMember, scorer::PairScore)],
    assets_by_id: &std::collections::HashMap<FileId, Asset>,
) -> Vec<String> {
    let Some((a, b, best)) = pair_scores.iter().max_by(|x, y| {
        x.2.confidence
            .partial_cmp(&y.2.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    }) else {
        return Vec::new();
    };

    let mut tokens = Vec::new();
    for signal in &best.signals {
        match signal {
            Signal::Checksum => tokens.push("checksum".to_string()),
            Signal::Hash => tokens.push("hash".to_string()),
            Signal::Metadata => tokens.push("metadata".to_string()),
            Signal::CaptureTime => tokens.push("capture-time".to_string()),
            Signal::Name => tokens.push("name".to_string()),
            Signal::PolicyBonus => {
                if let (Some(asset_a), Some(asset_b)) =
                    (assets_by_id.get(&a.file_id), assets_by_id.get(&b.file_id))
                {
                    if scorer::is_raw_jpeg_pair(asset_a, asset_b) {
                        tokens.push("policy.raw-jpeg".to_string());
                    } else if scorer::is_live_photo_pair(asset_a, asset_b) {
                        tokens.push("policy.live-photo".to_string());
                    }
                }
            }
        }
    }
    tokens
}

/// Human-readable rationale lines for a group, for UI display.
pub fn explain(group: &DuplicateGroup) -> &[String] {
    &group.rationale_lines
}

/// Suggests a keeper among a group's members.
pub fn suggest_keeper(members: &[Asset]) -> Option<FileId> {
    plan::KeeperSelector.suggest_keeper(members).map(|a| a.id)
}

/// Builds a merge plan for `group`, designating `keeper_id` as the survivor.
pub fn plan_merge(
    group: &DuplicateGroup,
    keeper_id: FileId,
    members: &[Asset],
) -> Result<MergePlan, PlanError> {
    plan::MergePlanner.plan_merge(group, keeper_id, members)
}

/// Executes a merge plan end-to-end.
pub fn merge(
    plan: &MergePlan,
    catalog: &dyn Catalog,
    trash: &dyn Trash,
    locks: Arc<txn::LockTable>,
    config: &EngineConfig,
) -> Result<MergeTransaction, DupeError> {
    let executor = txn::Executor::new(catalog, trash, locks, config.merge.retention_days);
    executor.merge(plan).map_err(DupeError::from)
}

/// Undoes the most recently committed transaction.
pub fn undo_last(
    history: &[MergeTransaction],
    catalog: &dyn Catalog,
    trash: &dyn Trash,
    locks: Arc<txn::LockTable>,
) -> Result<MergeTransaction, DupeError> {
    let recovery = recovery::Recovery::new(catalog, trash, locks);
    recovery.undo_last(history).map_err(DupeError::from)
}

/// Finds transactions left `Pending` by a process that crashed partway
/// through a merge, before it could persist the final `Committed`/`Failed`
/// outcome.
pub fn detect_incomplete_transactions(catalog: &dyn Catalog) -> Vec<MergeTransaction> {
    recovery::detect_incomplete_transactions(catalog)
}

/// Runs the recovery policy over every incomplete transaction found.
pub fn recover_incomplete_transactions(
    catalog: &dyn Catalog,
    trash: &dyn Trash,
    locks: Arc<txn::LockTable>,
) -> Vec<recovery::RecoveryOutcome> {
    recovery::Recovery::new(catalog, trash, locks).recover_incomplete_transactions()
}
