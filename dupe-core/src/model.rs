//! The data model shared by every component. These types are the wire
//! format between this crate and the catalog, so everything that
//! round-trips through storage derives `Serialize`/`Deserialize`.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type FileId = Uuid;
pub type GroupId = Uuid;
pub type TransactionId = Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Photo,
    Video,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgo {
    DHash,
    PHash,
}

/// `popcount(a XOR b)`. Comparing hashes from different algorithms is
/// undefined and callers must never do it; see [`ImageHash::distance_to`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ImageHash {
    pub algorithm: HashAlgo,
    pub value: u64,
    pub width: u32,
    pub height: u32,
    pub computed_at: DateTime<Utc>,
}

impl Default for HashAlgo {
    fn default() -> Self {
        HashAlgo::DHash
    }
}

impl ImageHash {
    pub fn new(algorithm: HashAlgo, value: u64, width: u32, height: u32) -> Self {
        Self {
            algorithm,
            value,
            width,
            height,
            computed_at: Utc::now(),
        }
    }

    /// Panics (debug) if `self` and `other` were produced by different
    /// algorithms: dHash vs pHash distances aren't comparable.
    pub fn distance_to(&self, other: &ImageHash) -> u32 {
        debug_assert_eq!(
            self.algorithm, other.algorithm,
            "comparing hashes from two different algorithms is undefined"
        );
        (self.value ^ other.value).count_ones()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VideoSignature {
    pub duration_sec: f64,
    pub width: u32,
    pub height: u32,
    pub frame_hashes: Vec<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureVerdict {
    Duplicate,
    Similar,
    Different,
}

#[derive(Clone, Copy, Debug)]
pub struct SignatureComparison {
    pub verdict: SignatureVerdict,
    pub mismatched_frame_count: usize,
    pub max_distance: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MutableMetadata {
    pub capture_time: Option<DateTime<Utc>>,
    pub gps: Option<(f64, f64)>,
    pub camera_model: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

impl MutableMetadata {
    /// Fraction of the six completeness-relevant fields that are populated,
    /// as used by the keeper selector. `dimensions` is folded in by the
    /// caller since it lives on `Asset`, not here.
    pub fn populated_count(&self) -> usize {
        [
            self.capture_time.is_some(),
            self.gps.is_some(),
            self.camera_model.is_some(),
            self.keywords.as_ref().is_some_and(|k| !k.is_empty()),
            self.tags.as_ref().is_some_and(|t| !t.is_empty()),
        ]
        .into_iter()
        .filter(|b| *b)
        .count()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Asset {
    pub id: FileId,
    pub path: PathBuf,
    pub media_type: MediaType,
    pub file_size: u64,
    pub dimensions: Option<(u32, u32)>,
    pub capture_time: Option<DateTime<Utc>>,
    pub checksum: Option<String>,
    pub image_hashes: HashMap<HashAlgo, ImageHash>,
    pub video_signature: Option<VideoSignature>,
    pub metadata: MutableMetadata,
}

impl Asset {
    pub fn new(path: PathBuf, media_type: MediaType, file_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            media_type,
            file_size,
            dimensions: None,
            capture_time: None,
            checksum: None,
            image_hashes: HashMap::new(),
            video_signature: None,
            metadata: MutableMetadata::default(),
        }
    }

    pub fn stem_lower(&self) -> Option<String> {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
    }

    pub fn extension_lower(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
    }

    pub fn completeness_score(&self) -> f64 {
        let dims_ok = self.dimensions.is_some();
        let populated = self.metadata.populated_count() + dims_ok as usize;
        populated as f64 / 6.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey(pub String);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketStats {
    pub size: usize,
    pub estimated_comparisons: u64,
}

impl BucketStats {
    pub fn for_members(size: usize) -> Self {
        let size_u64 = size as u64;
        Self {
            size,
            estimated_comparisons: size_u64.saturating_mul(size_u64.saturating_sub(1)) / 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bucket {
    pub key: BucketKey,
    pub file_ids: Vec<FileId>,
    pub heuristic_name: &'static str,
    pub stats: BucketStats,
}

impl Bucket {
    pub fn new(key: BucketKey, heuristic_name: &'static str, file_ids: Vec<FileId>) -> Self {
        let stats = BucketStats::for_members(file_ids.len());
        Self {
            key,
            file_ids,
            heuristic_name,
            stats,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Checksum,
    Hash,
    Metadata,
    CaptureTime,
    Name,
    PolicyBonus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Penalty {
    IgnoredPair,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupMember {
    pub file_id: FileId,
    pub confidence: f64,
    pub signals: Vec<Signal>,
    pub penalties: Vec<Penalty>,
    pub file_size: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub group_id: GroupId,
    pub members: Vec<GroupMember>,
    pub confidence: f64,
    pub rationale_lines: Vec<String>,
    pub keeper_suggestion: Option<FileId>,
    pub incomplete: bool,
    pub media_type: MediaType,
}

impl DuplicateGroup {
    pub fn member_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.members.iter().map(|m| m.file_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub source_id: FileId,
    pub new_value: MergeFieldValue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MergeFieldValue {
    CaptureTime(DateTime<Utc>),
    Gps(f64, f64),
    CameraModel(String),
    Keywords(Vec<String>),
    Tags(Vec<String>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergePlan {
    pub group_id: GroupId,
    pub keeper_id: FileId,
    pub trash_list: Vec<FileId>,
    pub field_changes: Vec<FieldChange>,
    pub atomic: bool,
    pub estimated_space_freed: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Created but not yet committed; used only in memory before the first
    /// persisted record exists. A persisted transaction is always either
    /// `Committed`, `Undone`, or the `Failed` sentinel.
    Pending,
    Committed,
    Undone,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub version: u32,
    pub file_id: FileId,
    pub original_path: PathBuf,
    pub file_size: u64,
    pub metadata: MutableMetadata,
}

pub const SNAPSHOT_ENVELOPE_VERSION: u32 = 1;

/// What `Trash::move_to_trash` hands back so a later `restore_from_trash` can
/// find the file again. Deliberately crate-agnostic (and serializable) rather
/// than re-exporting a third-party trash-item type, since it has to survive
/// in a persisted `MergeTransaction` across process restarts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreToken {
    pub original_path: PathBuf,
    pub trashed_at: DateTime<Utc>,
    pub trash_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeTransaction {
    pub id: TransactionId,
    pub group_id: GroupId,
    pub keeper_id: FileId,
    pub removed_ids: Vec<FileId>,
    pub created_at: DateTime<Utc>,
    pub undone_at: Option<DateTime<Utc>>,
    pub undo_deadline: Option<DateTime<Utc>>,
    pub metadata_snapshots: HashMap<FileId, MetadataSnapshot>,
    pub trash_tokens: HashMap<FileId, RestoreToken>,
    /// The field changes the plan asked for, recorded so a recovery pass can
    /// replay `snapshot + changes` and compare against the keeper's current
    /// metadata to detect a `Mismatch`.
    pub field_changes: Vec<FieldChange>,
    pub state: TransactionState,
}

/// The sentinel epoch used to mark `failed` transactions without a dedicated
/// boolean field on the wire.
pub fn failed_sentinel() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).expect("epoch 0 is a valid timestamp")
}

impl MergeTransaction {
    pub fn is_failed(&self) -> bool {
        self.state == TransactionState::Failed
            || self.undone_at == Some(failed_sentinel())
    }
}
