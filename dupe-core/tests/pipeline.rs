//! End-to-end tests exercising the public API surface against in-memory
//! fixtures: checksum shortcut, a near-hash group, the RAW+JPEG policy on
//! and off, an ignored pair, incompleteness under a comparison limit, and
//! an undo round-trip.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dupe_core::bktree::AlgoIndex;
use dupe_core::config::EngineConfig;
use dupe_core::model::{
    Asset, FileId, HashAlgo, ImageHash, MediaType, MergePlan,
};
use dupe_core::scheduler::CancellationToken;
use dupe_core::error::TrashError;
use dupe_core::model::RestoreToken;
use dupe_core::traits::{Catalog, CatalogError, Trash};
use dupe_core::txn::LockTable;
use dupe_core::{build_candidates, build_groups, build_groups_with_metrics, merge, plan_merge, suggest_keeper};

use std::collections::HashMap;

struct FakeCatalog {
    files: Mutex<HashMap<FileId, Asset>>,
    transactions: Mutex<Vec<dupe_core::model::MergeTransaction>>,
}

impl FakeCatalog {
    fn new(assets: Vec<Asset>) -> Self {
        Self {
            files: Mutex::new(assets.into_iter().map(|a| (a.id, a)).collect()),
            transactions: Mutex::new(Vec::new()),
        }
    }
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
    fn create_or_update_group(&self, _group: &dupe_core::model::DuplicateGroup) -> Result<(), CatalogError> {
        Ok(())
    }
    fn record_transaction(&self, txn: &dupe_core::model::MergeTransaction) -> Result<(), CatalogError> {
        self.transactions.lock().unwrap().push(txn.clone());
        Ok(())
    }
    fn fetch_history(&self) -> Result<Vec<dupe_core::model::MergeTransaction>, CatalogError> {
        Ok(self.transactions.lock().unwrap().clone())
    }
}

struct FakeTrash;
impl Trash for FakeTrash {
    fn move_to_trash(&self, path: &std::path::Path) -> Result<RestoreToken, TrashError> {
        Ok(RestoreToken {
            original_path: path.to_path_buf(),
            trashed_at: chrono::Utc::now(),
            trash_url: None,
        })
    }
    fn restore_from_trash(&self, _token: &RestoreToken, _original_path: &std::path::Path) -> Result<(), TrashError> {
        Ok(())
    }
}

fn photo(name: &str, size: u64) -> Asset {
    Asset::new(PathBuf::from(name), MediaType::Photo, size)
}

fn with_hash(mut asset: Asset, value: u64) -> Asset {
    let hash = ImageHash::new(HashAlgo::DHash, value, 800, 600);
    asset.dimensions = Some((800, 600));
    asset.image_hashes.insert(HashAlgo::DHash, hash);
    asset
}

#[test]
fn checksum_duplicates_form_a_full_confidence_group() {
    let mut a = photo("a.jpg", 1000);
    let mut b = photo("b.jpg", 1000);
    a.checksum = Some("same-bytes".into());
    b.checksum = Some("same-bytes".into());

    let config = EngineConfig::default();
    let cancel = CancellationToken::new();
    let assets = vec![a.clone(), b.clone()];

    let buckets = build_candidates(&assets, &AlgoIndex::new(), &config, &cancel);
    let assets_by_id: HashMap<_, _> = assets.iter().map(|x| (x.id, x.clone())).collect();
    let groups = build_groups(&buckets, &assets_by_id, &config, &cancel);

    assert_eq!(1, groups.len());
    assert_eq!(1.0, groups[0].confidence);
    assert!(groups[0].rationale_lines.iter().any(|l| l.contains("checksum")));
}

#[test]
fn near_hash_neighbors_form_a_group_via_bk_tree() {
    let now = chrono::Utc::now();
    // Different sizes keep the dimensions+size and capture-time+size
    // strategies from also bucketing this pair, isolating the near-hash
    // path this test means to exercise.
    let mut a = with_hash(photo("beach.jpg", 2000), 0b1010_1010_0000);
    let mut b = with_hash(photo("beach.jpg", 2001), 0b1010_1010_0001); // distance 1
    a.capture_time = Some(now);
    b.capture_time = Some(now);
    a.metadata.camera_model = Some("Pixel 7".into());
    b.metadata.camera_model = Some("Pixel 7".into());

    let mut index = AlgoIndex::new();
    for asset in [&a, &b] {
        for (algo, hash) in &asset.image_hashes {
            index.insert(*algo, asset.id, hash);
        }
    }

    let config = EngineConfig::default();
    let cancel = CancellationToken::new();
    let assets = vec![a.clone(), b.clone()];
    let buckets = build_candidates(&assets, &index, &config, &cancel);
    assert!(buckets.iter().any(|bucket| bucket.heuristic_name == "image.hash.near"));

    let assets_by_id: HashMap<_, _> = assets.iter().map(|x| (x.id, x.clone())).collect();
    let groups = build_groups(&buckets, &assets_by_id, &config, &cancel);
    assert_eq!(1, groups.len());
}

#[test]
fn raw_jpeg_policy_toggles_the_group_outcome() {
    let raw = photo("sunset.cr2", 5000);
    let jpg = photo("sunset.jpg", 1200);

    let cancel = CancellationToken::new();
    let assets = vec![raw.clone(), jpg.clone()];
    let assets_by_id: HashMap<_, _> = assets.iter().map(|x| (x.id, x.clone())).collect();

    let config_enabled = EngineConfig::default();
    let buckets = build_candidates(&assets, &AlgoIndex::new(), &config_enabled, &cancel);
    let groups_enabled = build_groups(&buckets, &assets_by_id, &config_enabled, &cancel);
    assert_eq!(1, groups_enabled.len());
    assert!(groups_enabled[0]
        .rationale_lines
        .iter()
        .any(|l| l.contains("policy.raw-jpeg")));

    let mut config_disabled = EngineConfig::default();
    config_disabled.detection.policies.enable_raw_jpeg = false;
    let buckets = build_candidates(&assets, &AlgoIndex::new(), &config_disabled, &cancel);
    let groups_disabled = build_groups(&buckets, &assets_by_id, &config_disabled, &cancel);
    assert!(groups_disabled.is_empty());
}

#[test]
fn ignored_pair_never_forms_a_group() {
    let mut a = photo("a.jpg", 1000);
    let mut b = photo("b.jpg", 1000);
    a.checksum = Some("same".into());
    b.checksum = Some("same".into());

    let mut config = EngineConfig::default();
    config.detection.policies.ignore_pair(a.id, b.id);

    let cancel = CancellationToken::new();
    let assets = vec![a.clone(), b.clone()];
    let buckets = build_candidates(&assets, &AlgoIndex::new(), &config, &cancel);
    let assets_by_id: HashMap<_, _> = assets.iter().map(|x| (x.id, x.clone())).collect();
    let groups = build_groups(&buckets, &assets_by_id, &config, &cancel);

    assert!(groups.is_empty());
}

#[test]
fn comparison_limit_marks_the_group_incomplete() {
    let mut config = EngineConfig::default();
    config.detection.limits.max_comparisons_per_bucket = 1;

    let assets: Vec<Asset> = (0..4)
        .map(|i| {
            let mut a = photo(&format!("{i}.jpg"), 1000);
            a.checksum = Some("identical".into());
            a
        })
        .collect();

    let cancel = CancellationToken::new();
    let buckets = build_candidates(&assets, &AlgoIndex::new(), &config, &cancel);
    let assets_by_id: HashMap<_, _> = assets.iter().map(|x| (x.id, x.clone())).collect();
    let groups = build_groups(&buckets, &assets_by_id, &config, &cancel);

    assert_eq!(1, groups.len());
    assert!(groups[0].incomplete);
}

#[test]
fn merge_then_undo_restores_original_state() {
    let keeper = photo("keep.jpg", 1000);
    let mut duplicate = photo("dup.jpg", 1000);
    duplicate.metadata.camera_model = Some("Nikon Z6".into());

    let group = dupe_core::model::DuplicateGroup {
        group_id: dupe_core::model::GroupId::new_v4(),
        members: vec![
            dupe_core::model::GroupMember {
                file_id: keeper.id,
                confidence: 1.0,
                signals: vec![dupe_core::model::Signal::Checksum],
                penalties: Vec::new(),
                file_size: keeper.file_size,
            },
            dupe_core::model::GroupMember {
                file_id: duplicate.id,
                confidence: 1.0,
                signals: vec![dupe_core::model::Signal::Checksum],
                penalties: Vec::new(),
                file_size: duplicate.file_size,
            },
        ],
        confidence: 1.0,
        rationale_lines: Vec::new(),
        keeper_suggestion: Some(keeper.id),
        incomplete: false,
        media_type: MediaType::Photo,
    };

    let plan: MergePlan =
        plan_merge(&group, keeper.id, &[keeper.clone(), duplicate.clone()]).unwrap();
    assert_eq!(vec![duplicate.id], plan.trash_list);

    let catalog = FakeCatalog::new(vec![keeper.clone(), duplicate.clone()]);
    let trash = FakeTrash;
    let locks = LockTable::new();
    let config = EngineConfig::default();

    let txn = merge(&plan, &catalog, &trash, Arc::clone(&locks), &config).unwrap();
    assert_eq!(dupe_core::model::TransactionState::Committed, txn.state);

    let keeper_after_merge = catalog.get_file_by_id(keeper.id).unwrap().unwrap();
    assert_eq!(Some("Nikon Z6".to_string()), keeper_after_merge.metadata.camera_model);

    let history = catalog.fetch_history().unwrap();
    let undone = dupe_core::undo_last(&history, &catalog, &trash, locks).unwrap();
    assert_eq!(dupe_core::model::TransactionState::Undone, undone.state);

    let keeper_after_undo = catalog.get_file_by_id(keeper.id).unwrap().unwrap();
    assert_eq!(None, keeper_after_undo.metadata.camera_model);
}

#[test]
fn bucketing_cuts_comparisons_well_below_naive_for_diverse_assets() {
    // ≥20 assets with non-trivial dimension diversity must see
    // total_comparisons / naive_comparisons <= 0.5. Every asset here
    // gets distinct dimensions, a distinct capture time far outside the skew
    // window, and a distinct file size, except for two planted pairs that
    // share dims+size so the dimension bucket strategy has something to find.
    let base_time = chrono::Utc::now();
    let mut assets: Vec<Asset> = (0..24)
        .map(|i| {
            let mut a = photo(&format!("asset-{i}.jpg"), 1_000_000 + i as u64 * 500_000);
            a.dimensions = Some((200 + i as u32 * 97, 150 + i as u32 * 61));
            a.capture_time = Some(base_time + chrono::Duration::days(i as i64 * 10));
            a
        })
        .collect();
    // Plant one duplicate pair sharing dims+size (distinct from every other asset).
    let dup_dims = assets[0].dimensions;
    let dup_size = assets[0].file_size;
    assets[1].dimensions = dup_dims;
    assets[1].file_size = dup_size;

    let config = EngineConfig::default();
    let cancel = CancellationToken::new();
    let buckets = build_candidates(&assets, &AlgoIndex::new(), &config, &cancel);

    let assets_by_id: HashMap<_, _> = assets.iter().map(|x| (x.id, x.clone())).collect();
    let (_groups, metrics) = build_groups_with_metrics(&buckets, &assets_by_id, &config, &cancel);

    assert_eq!(assets.len(), metrics.total_assets);
    assert_eq!(24 * 23 / 2, metrics.naive_comparisons);
    assert!(
        (metrics.total_comparisons as f64) / (metrics.naive_comparisons as f64) <= 0.5,
        "expected at least 50% reduction, got {} of {} comparisons",
        metrics.total_comparisons,
        metrics.naive_comparisons
    );
}

#[test]
fn suggest_keeper_prefers_raw_over_jpeg() {
    let raw = photo("a.cr2", 1000);
    let jpg = photo("a.jpg", 1000);
    let keeper = suggest_keeper(&[raw.clone(), jpg]).unwrap();
    assert_eq!(raw.id, keeper);
}
