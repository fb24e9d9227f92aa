//! Confidence scorer: combines per-pair signals into a confidence score,
//! applies policy bonuses and ignored-pairs, and tracks incompleteness
//! under the configured limits. Grounded on the teacher's `imgutils.rs`
//! similarity-scoring helpers, generalized from a single hash-distance
//! score to a weighted multi-signal table. Every signal below fires as a
//! boolean (full weight or nothing) rather than a graded/decaying
//! contribution.

use std::time::{Duration, Instant};

use crate::config::DetectionConfig;
use crate::model::{Asset, GroupMember, Penalty, Signal};
use crate::scheduler::CancellationToken;

/// Per-run metrics for a detection pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScoringMetrics {
    pub total_assets: usize,
    pub naive_comparisons: u64,
    pub total_comparisons: u64,
    pub buckets_created: usize,
}

impl ScoringMetrics {
    pub fn reduction_percentage(&self) -> f64 {
        if self.naive_comparisons == 0 {
            return 0.0;
        }
        let saved = self.naive_comparisons.saturating_sub(self.total_comparisons);
        (saved as f64 / self.naive_comparisons as f64) * 100.0
    }
}

pub struct PairScore {
    pub confidence: f64,
    pub signals: Vec<Signal>,
    pub penalties: Vec<Penalty>,
}

pub struct Scorer<'a> {
    config: &'a DetectionConfig,
}

impl<'a> Scorer<'a> {
    pub fn new(config: &'a DetectionConfig) -> Self {
        Self { config }
    }

    /// Scores a single pair. Checksum equality short-circuits to full
    /// confidence, skipping every other signal.
    pub fn score_pair(&self, a: &Asset, b: &Asset) -> PairScore {
        if self.config.policies.is_ignored(a.id, b.id) {
            return PairScore {
                confidence: 0.0,
                signals: Vec::new(),
                penalties: vec![Penalty::IgnoredPair],
            };
        }

        if let (Some(ca), Some(cb)) = (&a.checksum, &b.checksum) {
            if ca == cb {
                return PairScore {
                    confidence: 1.0,
                    signals: vec![Signal::Checksum],
                    penalties: Vec::new(),
                };
            }
        }

        let w = &self.config.weights;
        let mut confidence = 0.0;
        let mut signals = Vec::new();

        if self.hash_signal_fires(a, b) {
            confidence += w.hash;
            signals.push(Signal::Hash);
        }

        if metadata_signal_fires(a, b) {
            confidence += w.metadata;
            signals.push(Signal::Metadata);
        }

        if capture_time_signal_fires(a, b, self.config.capture_skew.seconds) {
            confidence += w.capture_time;
            signals.push(Signal::CaptureTime);
        }

        if name_signal_fires(a, b) {
            confidence += w.name;
            signals.push(Signal::Name);
        }

        if self.policy_bonus_applies(a, b) {
            confidence += w.policy_bonus;
            signals.push(Signal::PolicyBonus);
        }

        PairScore {
            confidence: confidence.clamp(0.0, 1.0),
            signals,
            penalties: Vec::new(),
        }
    }

    /// Fires when dHash distance is at or under `hash_near_dup` for any
    /// algorithm both assets share.
    fn hash_signal_fires(&self, a: &Asset, b: &Asset) -> bool {
        let threshold = self.config.thresholds.hash_near_dup;
        self.config.hash_algorithms.iter().any(|algo| {
            match (a.image_hashes.get(algo), b.image_hashes.get(algo)) {
                (Some(ha), Some(hb)) => ha.distance_to(hb) <= threshold,
                _ => false,
            }
        })
    }

    /// RAW+JPEG sibling pairs and Live Photo (HEIC still + its MOV motion
    /// clip, same stem, clip no longer than 4s) are treated as deliberate
    /// duplicates-by-policy.
    fn policy_bonus_applies(&self, a: &Asset, b: &Asset) -> bool {
        let same_stem = matches!((a.stem_lower(), b.stem_lower()), (Some(x), Some(y)) if x == y);
        if !same_stem {
            return false;
        }

        if self.config.policies.enable_raw_jpeg && is_raw_jpeg_pair(a, b) {
            return true;
        }

        if self.config.policies.enable_live_photo && is_live_photo_pair(a, b) {
            return true;
        }

        false
    }

    /// Scores every pair within a bucket, honoring the comparison/time/size
    /// limits, and reports whether the run was cut short.
    pub fn score_bucket(
        &self,
        assets: &[&Asset],
        cancel: &CancellationToken,
        metrics: &mut ScoringMetrics,
    ) -> (Vec<(GroupMember, GroupMember, PairScore)>, bool) {
        let limits = &self.config.limits;
        let mut out = Vec::new();
        let mut incomplete = false;

        if assets.len() > limits.max_bucket_size {
            return (out, true);
        }

        let started = Instant::now();
        let budget = Duration::from_millis(limits.time_budget_ms);
        let mut comparisons = 0usize;

        'outer: for i in 0..assets.len() {
            for j in (i + 1)..assets.len() {
                if cancel.is_cancelled() {
                    incomplete = true;
                    break 'outer;
                }
                if comparisons >= limits.max_comparisons_per_bucket {
                    incomplete = true;
                    break 'outer;
                }
                if started.elapsed() > budget {
                    incomplete = true;
                    break 'outer;
                }

                let a = assets[i];
                let b = assets[j];
                let score = self.score_pair(a, b);
                comparisons += 1;

                let member_a = GroupMember {
                    file_id: a.id,
                    confidence: score.confidence,
                    signals: score.signals.clone(),
                    penalties: score.penalties.clone(),
                    file_size: a.file_size,
                };
                let member_b = GroupMember {
                    file_id: b.id,
                    confidence: score.confidence,
                    signals: score.signals.clone(),
                    penalties: score.penalties.clone(),
                    file_size: b.file_size,
                };
                out.push((member_a, member_b, score));
            }
        }

        metrics.total_comparisons += comparisons as u64;
        (out, incomplete)
    }
}

pub(crate) fn is_raw_jpeg_pair(a: &Asset, b: &Asset) -> bool {
    const RAW_EXTENSIONS: &[&str] = &["raw", "cr2", "cr3", "nef", "arw", "dng", "orf", "rw2"];
    const JPEG_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

    let (Some(ea), Some(eb)) = (a.extension_lower(), b.extension_lower()) else {
        return false;
    };
    (RAW_EXTENSIONS.contains(&ea.as_str()) && JPEG_EXTENSIONS.contains(&eb.as_str()))
        || (RAW_EXTENSIONS.contains(&eb.as_str()) && JPEG_EXTENSIONS.contains(&ea.as_str()))
}

/// Upper bound (inclusive) on a Live Photo's motion clip, in seconds.
const LIVE_PHOTO_MAX_DURATION_SEC: f64 = 4.0;

/// A photo/video pair qualifies as a Live Photo only when the still is HEIC,
/// the motion clip is MOV, and the clip's duration lies in `(0, 4]` seconds.
pub(crate) fn is_live_photo_pair(a: &Asset, b: &Asset) -> bool {
    use crate::model::MediaType::{Photo, Video};

    let (photo, video) = match (a.media_type, b.media_type) {
        (Photo, Video) => (a, b),
        (Video, Photo) => (b, a),
        _ => return false,
    };

    let is_heic = photo.extension_lower().as_deref() == Some("heic");
    let is_mov = video.extension_lower().as_deref() == Some("mov");
    if !is_heic || !is_mov {
        return false;
    }

    let Some(duration) = video.video_signature.as_ref().map(|s| s.duration_sec) else {
        return false;
    };
    duration > 0.0 && duration <= LIVE_PHOTO_MAX_DURATION_SEC
}

/// Fires when dimensions are equal and file sizes are within 10% of each
/// other. A literal match, not a graded similarity.
fn metadata_signal_fires(a: &Asset, b: &Asset) -> bool {
    let (Some(dims_a), Some(dims_b)) = (a.dimensions, b.dimensions) else {
        return false;
    };
    if dims_a != dims_b {
        return false;
    }
    let (sa, sb) = (a.file_size as f64, b.file_size as f64);
    if sa == 0.0 || sb == 0.0 {
        return sa == sb;
    }
    (sa - sb).abs() / sa.max(sb) <= 0.10
}

fn capture_time_signal_fires(a: &Asset, b: &Asset, skew_seconds: i64) -> bool {
    match (a.capture_time, b.capture_time) {
        (Some(ta), Some(tb)) => (ta - tb).num_seconds().abs() <= skew_seconds.max(0),
        _ => false,
    }
}

fn name_signal_fires(a: &Asset, b: &Asset) -> bool {
    matches!((a.stem_lower(), b.stem_lower()), (Some(x), Some(y)) if x == y)
}
