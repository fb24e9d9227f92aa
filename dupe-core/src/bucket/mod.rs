//! Candidate bucketer: groups assets that are *plausibly* duplicates so the
//! scorer never has to consider the full O(n²) pairing. Grounded on the
//! teacher's `src/repo.rs` grouping-by-key helpers, adapted to five named
//! strategies, plus the BK-tree for the near-hash strategy.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::bktree::AlgoIndex;
use crate::config::DetectionConfig;
use crate::model::{Asset, Bucket, BucketKey, FileId, MediaType};
use crate::scheduler::CancellationToken;

/// Every strategy a [`Bucketer`] runs, in a fixed order: checksum first
/// (it's exact and cheapest to short-circuit on), then progressively fuzzier
/// heuristics.
const CHECKSUM: &str = "content.checksum";
const DIMENSIONS_SIZE: &str = "image.dimensions+size";
const NEAR_HASH: &str = "image.hash.near";
const VIDEO_SIGNATURE: &str = "video.signature";
const CAPTURE_TIME_SIZE: &str = "capture_time+size";

/// `round(file_size / 32KiB)` bucket width for the dimensions+size strategy.
const SIZE_BUCKET_BYTES: u64 = 32 * 1024;

pub struct Bucketer<'a> {
    config: &'a DetectionConfig,
}

impl<'a> Bucketer<'a> {
    pub fn new(config: &'a DetectionConfig) -> Self {
        Self { config }
    }

    /// Builds every bucket for `assets`, consulting `hash_index` for the
    /// near-hash strategy. An asset may land in more than one bucket, since
    /// each strategy partitions independently.
    pub fn build_buckets(
        &self,
        assets: &[Asset],
        hash_index: &AlgoIndex,
        cancel: &CancellationToken,
    ) -> Vec<Bucket> {
        let mut buckets = Vec::new();
        buckets.extend(self.checksum_buckets(assets));
        if cancel.is_cancelled() {
            return buckets;
        }
        buckets.extend(self.dimensions_size_buckets(assets));
        if cancel.is_cancelled() {
            return buckets;
        }
        buckets.extend(self.near_hash_buckets(assets, hash_index, cancel));
        if cancel.is_cancelled() {
            return buckets;
        }
        buckets.extend(self.video_signature_buckets(assets));
        if cancel.is_cancelled() {
            return buckets;
        }
        buckets.extend(self.capture_time_size_buckets(assets));
        buckets
    }

    fn checksum_buckets(&self, assets: &[Asset]) -> Vec<Bucket> {
        group_by(assets, CHECKSUM, |a| {
            a.checksum.as_ref().map(|c| BucketKey(format!("cksum:{c}")))
        })
    }

    /// Key = `(round(width/4), round(height/4), round(file_size/32KiB))`,
    /// with a `:n` suffix so this heuristic's keys never collide with
    /// another strategy's bucket key space.
    fn dimensions_size_buckets(&self, assets: &[Asset]) -> Vec<Bucket> {
        group_by(assets, DIMENSIONS_SIZE, |a| {
            a.dimensions.map(|(w, h)| {
                let bw = round_div(w as u64, 4);
                let bh = round_div(h as u64, 4);
                let bsize = round_div(a.file_size, SIZE_BUCKET_BYTES);
                BucketKey(format!("dim:{bw}x{bh}:size:{bsize}:n"))
            })
        })
    }

    /// One bucket per asset: every member within `hash_near_dup` Hamming
    /// distance of that asset's own hash, for every configured algorithm.
    /// The asset itself seeds the query but is excluded from its own result
    /// set (it's already in the bucket via `file_ids`'s seed member).
    fn near_hash_buckets(
        &self,
        assets: &[Asset],
        hash_index: &AlgoIndex,
        cancel: &CancellationToken,
    ) -> Vec<Bucket> {
        let within = self.config.thresholds.hash_near_dup;
        let mut buckets = Vec::new();

        for asset in assets {
            if cancel.is_cancelled() {
                break;
            }
            for algo in &self.config.hash_algorithms {
                let Some(hash) = asset.image_hashes.get(algo) else {
                    continue;
                };
                let exclude = HashSet::new();
                let neighbors = hash_index.search(*algo, hash.value, within, &exclude);
                if neighbors.len() <= 1 {
                    continue;
                }
                let mut file_ids: Vec<FileId> =
                    neighbors.into_iter().map(|(_, e)| e.file_id).collect();
                file_ids.sort();
                file_ids.dedup();
                let key = BucketKey(format!("near:{algo:?}:{}", asset.id));
                buckets.push(Bucket::new(key, NEAR_HASH, file_ids));
            }
        }
        buckets
    }

    fn video_signature_buckets(&self, assets: &[Asset]) -> Vec<Bucket> {
        group_by(assets, VIDEO_SIGNATURE, |a| {
            if a.media_type != MediaType::Video {
                return None;
            }
            let sig = a.video_signature.as_ref()?;
            let rounded = (sig.duration_sec * 10.0).round() as i64;
            Some(BucketKey(format!(
                "vid:{}x{}:dur:{}",
                sig.width, sig.height, rounded
            )))
        })
    }

    fn capture_time_size_buckets(&self, assets: &[Asset]) -> Vec<Bucket> {
        let skew = self.config.capture_skew.seconds.max(1);
        group_by(assets, CAPTURE_TIME_SIZE, |a| {
            let ts = a.capture_time?;
            let bucketed_epoch = ts.timestamp().div_euclid(skew);
            Some(BucketKey(format!(
                "cap:{bucketed_epoch}:size:{}",
                a.file_size
            )))
        })
    }

    /// Filters to the buckets that lie entirely within `scope`, for UI
    /// previews scoped to a subset of files (e.g. a single folder). A bucket
    /// with even one member outside `scope` is excluded rather than shown
    /// partially.
    pub fn preview_candidates<'b>(
        &self,
        buckets: &'b [Bucket],
        scope: &HashSet<FileId>,
    ) -> Vec<&'b Bucket> {
        buckets
            .iter()
            .filter(|b| b.file_ids.iter().all(|id| scope.contains(id)))
            .collect()
    }
}

/// Nearest-integer division, e.g. `round_div(5_030_000, 32*1024) ==
/// round_div(5_000_000, 32*1024)`.
fn round_div(value: u64, denom: u64) -> u64 {
    (value + denom / 2) / denom
}

fn group_by(
    assets: &[Asset],
    heuristic_name: &'static str,
    key_fn: impl Fn(&Asset) -> Option<BucketKey>,
) -> Vec<Bucket> {
    let mut groups: HashMap<BucketKey, Vec<FileId>> = HashMap::new();
    for asset in assets {
        if let Some(key) = key_fn(asset) {
            groups.entry(key).or_default().push(asset.id);
        }
    }
    groups
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(key, ids)| Bucket::new(key, heuristic_name, ids))
        .collect()
}
