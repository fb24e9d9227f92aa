//! Keeper selector and merge planner. Grounded on the teacher's `repo.rs`
//! asset-comparison helpers, generalized into a lexicographic rank tuple
//! plus a deterministic tie-break (lowest `Uuid` byte-string wins, so two
//! equally-ranked assets never both claim to be the keeper).

use crate::error::PlanError;
use crate::model::{
    Asset, DuplicateGroup, FieldChange, FileId, GroupId, MergeFieldValue, MergePlan,
};

/// Format preference scores, highest wins.
fn format_score(extension: Option<&str>) -> f64 {
    const RAW_EXTENSIONS: &[&str] = &["raw", "cr2", "cr3", "nef", "arw", "dng", "orf", "rw2"];
    match extension {
        Some(ext) if RAW_EXTENSIONS.contains(&ext) => 1.0,
        Some("png") => 0.9,
        Some("jpg") | Some("jpeg") => 0.7,
        Some("heic") | Some("heif") => 0.5,
        _ => 0.0,
    }
}

fn effective_resolution(asset: &Asset) -> u64 {
    asset
        .dimensions
        .map(|(w, h)| w as u64 * h as u64)
        .unwrap_or(0)
}

/// The lexicographic rank tuple: higher is better on every field except
/// age, where *older* (earlier capture time) wins, modeled here
/// as a descending sort on `-capture_time_unix` so the default tuple
/// ordering (`Ord` on the whole tuple, greatest first) falls out naturally.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
struct Rank {
    format: f64,
    completeness: f64,
    resolution: u64,
    file_size: u64,
    neg_capture_time_unix: i64,
}

fn rank_of(asset: &Asset) -> Rank {
    let neg_capture_time_unix = asset
        .capture_time
        .map(|t| -t.timestamp())
        .unwrap_or(i64::MIN);
    Rank {
        format: format_score(asset.extension_lower().as_deref()),
        completeness: asset.completeness_score(),
        resolution: effective_resolution(asset),
        file_size: asset.file_size,
        neg_capture_time_unix,
    }
}

pub struct KeeperSelector;

impl KeeperSelector {
    /// Picks the keeper among `members` by the rank tuple above, breaking
    /// exact ties by lowest `Uuid` byte-string.
    pub fn suggest_keeper<'a>(&self, members: &'a [Asset]) -> Option<&'a Asset> {
        members.iter().max_by(|a, b| {
            let (ra, rb) = (rank_of(a), rank_of(b));
            ra.partial_cmp(&rb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.id.as_bytes().cmp(a.id.as_bytes()))
        })
    }
}

pub struct MergePlanner;

impl MergePlanner {
    /// Builds a [`MergePlan`] for `group`, trashing every member but
    /// `keeper_id` and computing field changes by merging in any populated
    /// field the keeper itself lacks. A merge never overwrites a populated
    /// keeper field, only fills gaps.
    pub fn plan_merge(
        &self,
        group: &DuplicateGroup,
        keeper_id: FileId,
        members: &[Asset],
    ) -> Result<MergePlan, PlanError> {
        let member_ids: std::collections::HashSet<FileId> = group.member_ids().collect();
        if member_ids.is_empty() {
            return Err(PlanError::GroupNotFound(group.group_id));
        }
        if !member_ids.contains(&keeper_id) {
            return Err(PlanError::KeeperNotInGroup {
                group: group.group_id,
                keeper: keeper_id,
            });
        }

        let keeper = members
            .iter()
            .find(|a| a.id == keeper_id)
            .ok_or(PlanError::KeeperNotFound(keeper_id))?;

        let trash_list: Vec<FileId> = member_ids
            .iter()
            .copied()
            .filter(|id| *id != keeper_id)
            .collect();

        let mut trash_members: Vec<&Asset> = members
            .iter()
            .filter(|a| trash_list.contains(&a.id))
            .collect();
        // Rank order (best keeper-candidate first), so a field gap is filled
        // from the same member that would have been the runner-up keeper:
        // the first non-empty value among trash members in rank order.
        trash_members.sort_by(|a, b| {
            let (ra, rb) = (rank_of(a), rank_of(b));
            rb.partial_cmp(&ra)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.as_bytes().cmp(b.id.as_bytes()))
        });

        let estimated_space_freed = trash_members.iter().map(|a| a.file_size).sum();
        let field_changes = collect_field_changes(keeper, &trash_members);

        Ok(MergePlan {
            group_id: group.group_id,
            keeper_id,
            trash_list,
            field_changes,
            atomic: true,
            estimated_space_freed,
        })
    }
}

/// Walks the fixed mergeable-field list and, for each field the keeper
/// lacks, emits exactly one [`FieldChange`] sourced from the first
/// rank-ordered trash member that has it populated.
fn collect_field_changes(keeper: &Asset, trash_members_by_rank: &[&Asset]) -> Vec<FieldChange> {
    let mut out = Vec::new();

    if keeper.metadata.capture_time.is_none() {
        if let Some(other) = trash_members_by_rank
            .iter()
            .find(|o| o.metadata.capture_time.is_some())
        {
            out.push(FieldChange {
                field: "capture_time",
                source_id: other.id,
                new_value: MergeFieldValue::CaptureTime(other.metadata.capture_time.unwrap()),
            });
        }
    }

    if keeper.metadata.gps.is_none() {
        if let Some(other) = trash_members_by_rank.iter().find(|o| o.metadata.gps.is_some()) {
            let (lat, lon) = other.metadata.gps.unwrap();
            out.push(FieldChange {
                field: "gps",
                source_id: other.id,
                new_value: MergeFieldValue::Gps(clamp_gps(lat, -90.0, 90.0), clamp_gps(lon, -180.0, 180.0)),
            });
        }
    }

    if keeper.metadata.camera_model.is_none() {
        if let Some(other) = trash_members_by_rank
            .iter()
            .find(|o| o.metadata.camera_model.is_some())
        {
            out.push(FieldChange {
                field: "camera_model",
                source_id: other.id,
                new_value: MergeFieldValue::CameraModel(other.metadata.camera_model.clone().unwrap()),
            });
        }
    }

    if keeper.metadata.keywords.as_ref().is_none_or(|k| k.is_empty()) {
        if let Some(other) = trash_members_by_rank
            .iter()
            .find(|o| o.metadata.keywords.as_ref().is_some_and(|k| !k.is_empty()))
        {
            out.push(FieldChange {
                field: "keywords",
                source_id: other.id,
                new_value: MergeFieldValue::Keywords(other.metadata.keywords.clone().unwrap()),
            });
        }
    }

    if keeper.metadata.tags.as_ref().is_none_or(|t| t.is_empty()) {
        if let Some(other) = trash_members_by_rank
            .iter()
            .find(|o| o.metadata.tags.as_ref().is_some_and(|t| !t.is_empty()))
        {
            out.push(FieldChange {
                field: "tags",
                source_id: other.id,
                new_value: MergeFieldValue::Tags(other.metadata.tags.clone().unwrap()),
            });
        }
    }

    out
}

/// Rounds to six decimal places after clamping to the valid latitude or
/// longitude range.
fn clamp_gps(value: f64, min: f64, max: f64) -> f64 {
    let clamped = value.clamp(min, max);
    (clamped * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{GroupMember, MediaType, Signal};
    use std::path::PathBuf;

    fn asset(name: &str, size: u64) -> Asset {
        Asset::new(PathBuf::from(name), MediaType::Photo, size)
    }

    fn group_of(members: &[Asset]) -> DuplicateGroup {
        DuplicateGroup {
            group_id: GroupId::new_v4(),
            members: members
                .iter()
                .map(|a| GroupMember {
                    file_id: a.id,
                    confidence: 1.0,
                    signals: vec![Signal::Checksum],
                    penalties: Vec::new(),
                    file_size: a.file_size,
                })
                .collect(),
            confidence: 1.0,
            rationale_lines: Vec::new(),
            keeper_suggestion: None,
            incomplete: false,
            media_type: MediaType::Photo,
        }
    }

    #[test]
    fn raw_beats_jpeg() {
        let raw = asset("img.cr2", 1000);
        let jpg = asset("img.jpg", 1000);
        let selector = KeeperSelector;
        let keeper = selector.suggest_keeper(&[raw.clone(), jpg]).unwrap();
        assert_eq!(raw.id, keeper.id);
    }

    #[test]
    fn higher_resolution_wins_when_format_ties() {
        let mut small = asset("a.jpg", 1000);
        let mut large = asset("b.jpg", 1000);
        small.dimensions = Some((100, 100));
        large.dimensions = Some((400, 400));
        let selector = KeeperSelector;
        let keeper = selector.suggest_keeper(&[small, large.clone()]).unwrap();
        assert_eq!(large.id, keeper.id);
    }

    #[test]
    fn exact_tie_breaks_by_lowest_uuid() {
        let a = asset("a.jpg", 1000);
        let b = asset("b.jpg", 1000);
        let selector = KeeperSelector;
        let keeper = selector.suggest_keeper(&[a.clone(), b.clone()]).unwrap();
        let expected = if a.id.as_bytes() < b.id.as_bytes() { &a } else { &b };
        assert_eq!(expected.id, keeper.id);
    }

    #[test]
    fn plan_merge_trashes_all_but_keeper() {
        let a = asset("a.jpg", 1000);
        let b = asset("b.jpg", 2000);
        let group = group_of(&[a.clone(), b.clone()]);
        let planner = MergePlanner;
        let plan = planner.plan_merge(&group, a.id, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(a.id, plan.keeper_id);
        assert_eq!(vec![b.id], plan.trash_list);
        assert_eq!(2000, plan.estimated_space_freed);
        assert!(!plan.trash_list.contains(&plan.keeper_id));
    }

    #[test]
    fn plan_merge_rejects_keeper_outside_group() {
        let a = asset("a.jpg", 1000);
        let b = asset("b.jpg", 2000);
        let group = group_of(&[a.clone()]);
        let planner = MergePlanner;
        let err = planner.plan_merge(&group, b.id, &[a, b]).unwrap_err();
        assert!(matches!(err, PlanError::KeeperNotInGroup { .. }));
    }

    #[test]
    fn field_changes_fill_gaps_without_overwriting() {
        use chrono::Utc;
        let mut keeper = asset("keep.jpg", 1000);
        let mut other = asset("other.jpg", 1000);
        other.metadata.capture_time = Some(Utc::now());
        keeper.metadata.camera_model = Some("already set".into());
        other.metadata.camera_model = Some("should be ignored".into());

        let group = group_of(&[keeper.clone(), other.clone()]);
        let planner = MergePlanner;
        let plan = planner
            .plan_merge(&group, keeper.id, &[keeper.clone(), other.clone()])
            .unwrap();

        let has_capture_time_change = plan
            .field_changes
            .iter()
            .any(|c| c.field == "capture_time");
        let has_camera_model_change = plan
            .field_changes
            .iter()
            .any(|c| c.field == "camera_model");
        assert!(has_capture_time_change);
        assert!(!has_camera_model_change);
    }

    #[test]
    fn gps_values_are_clamped_and_rounded() {
        assert_eq!(90.0, clamp_gps(200.0, -90.0, 90.0));
        assert_eq!(1.234_568, clamp_gps(1.2345678, -180.0, 180.0));
    }

    #[test]
    fn field_change_picks_the_best_ranked_trash_member_when_several_have_it() {
        let keeper = asset("keep.jpg", 1000);
        // Same format/completeness/size; `better` ranks higher purely on a
        // newer (higher) effective resolution.
        let mut worse = asset("worse.jpg", 1000);
        let mut better = asset("better.jpg", 1000);
        worse.dimensions = Some((100, 100));
        better.dimensions = Some((400, 400));
        worse.metadata.camera_model = Some("worse-cam".into());
        better.metadata.camera_model = Some("better-cam".into());

        let group = group_of(&[keeper.clone(), worse.clone(), better.clone()]);
        let planner = MergePlanner;
        let plan = planner
            .plan_merge(&group, keeper.id, &[keeper.clone(), worse.clone(), better.clone()])
            .unwrap();

        let camera_changes: Vec<_> = plan
            .field_changes
            .iter()
            .filter(|c| c.field == "camera_model")
            .collect();
        assert_eq!(1, camera_changes.len(), "only one change per field");
        assert_eq!(better.id, camera_changes[0].source_id);
    }
}
