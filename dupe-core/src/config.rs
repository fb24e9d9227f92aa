//! Enumerated configuration, grouped by concern: detection
//! thresholds/weights/policies/limits, merge settings, video settings.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::HashAlgo;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Thresholds {
    pub confidence_duplicate: f64,
    pub confidence_similar: f64,
    pub hash_near_dup: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence_duplicate: 0.85,
            confidence_similar: 0.60,
            hash_near_dup: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Weights {
    pub checksum: f64,
    pub hash: f64,
    pub metadata: f64,
    pub name: f64,
    pub capture_time: f64,
    pub policy_bonus: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            checksum: 1.00,
            hash: 0.35,
            metadata: 0.15,
            capture_time: 0.10,
            name: 0.05,
            policy_bonus: 0.15,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Policies {
    pub enable_raw_jpeg: bool,
    pub enable_live_photo: bool,
    pub ignored_pairs: HashSet<(Uuid, Uuid)>,
}

impl Policies {
    pub fn default_enabled() -> Self {
        Self {
            enable_raw_jpeg: true,
            enable_live_photo: true,
            ignored_pairs: HashSet::new(),
        }
    }

    /// `(id_a, id_b)` order-independent membership test.
    pub fn is_ignored(&self, a: Uuid, b: Uuid) -> bool {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.ignored_pairs.contains(&key)
    }

    pub fn ignore_pair(&mut self, a: Uuid, b: Uuid) {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.ignored_pairs.insert(key);
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Limits {
    pub max_comparisons_per_bucket: usize,
    pub max_bucket_size: usize,
    pub time_budget_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_comparisons_per_bucket: 200_000,
            max_bucket_size: 4_000,
            time_budget_ms: 30_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CaptureSkew {
    pub seconds: i64,
}

impl Default for CaptureSkew {
    fn default() -> Self {
        Self { seconds: 2 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub thresholds: Thresholds,
    pub weights: Weights,
    pub policies: Policies,
    pub limits: Limits,
    pub capture_skew: CaptureSkew,
    pub hash_algorithms: Vec<HashAlgo>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            weights: Weights::default(),
            policies: Policies::default_enabled(),
            limits: Limits::default(),
            capture_skew: CaptureSkew::default(),
            hash_algorithms: vec![HashAlgo::DHash],
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MergeConfig {
    pub enable_dry_run: bool,
    pub enable_undo: bool,
    pub undo_depth: usize,
    pub retention_days: i64,
    pub move_to_trash: bool,
    pub require_confirmation: bool,
    pub atomic_writes: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enable_dry_run: false,
            enable_undo: true,
            undo_depth: 50,
            retention_days: 7,
            move_to_trash: true,
            require_confirmation: true,
            atomic_writes: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VideoConfig {
    pub middle_sample_minimum_duration: f64,
    pub end_sample_offset: f64,
    pub generator_max_dimension: u32,
    pub preferred_timescale: u32,
    /// Fraction of fingerprint attempts allowed to fail before a batch run
    /// short-circuits the rest of its queue.
    pub failure_rate_ceiling: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            middle_sample_minimum_duration: 120.0,
            end_sample_offset: 1.0,
            generator_max_dimension: 720,
            preferred_timescale: 600,
            failure_rate_ceiling: 0.5,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub detection: DetectionConfig,
    pub merge: MergeConfig,
    pub video: VideoConfig,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ignored_pairs_are_order_independent() {
        let mut p = Policies::default_enabled();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        p.ignore_pair(a, b);
        assert!(p.is_ignored(a, b));
        assert!(p.is_ignored(b, a));
    }

    #[test]
    fn default_weights_match_the_documented_table() {
        let w = Weights::default();
        assert_eq!(w.checksum, 1.00);
        assert_eq!(w.hash, 0.35);
        assert_eq!(w.metadata, 0.15);
        assert_eq!(w.capture_time, 0.10);
        assert_eq!(w.name, 0.05);
        assert_eq!(w.policy_bonus, 0.15);
    }
}
