use serde::Serialize;

use crate::profiles::{AnalysisRecord, Plan, UserProfile};

/// Free scans granted before an upgrade is required.
pub const QUOTA_CAP: i64 = 50;
/// Scan count that completes the gamified goal.
pub const GOAL_TARGET: i64 = 10;
/// Remaining-scan level at or below which the upgrade prompt shows.
pub const UPGRADE_PROMPT_THRESHOLD: i64 = 5;

/// Coarse band of the remaining free quota.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UsageLevel {
    Plenty,
    Steady,
    Low,
    Exhausted,
}

impl UsageLevel {
    pub fn from_remaining(remaining: i64) -> Self {
        match remaining {
            r if r > 20 => UsageLevel::Plenty,
            r if r > 10 => UsageLevel::Steady,
            r if r > 0 => UsageLevel::Low,
            _ => UsageLevel::Exhausted,
        }
    }
}

/// Summary shown on the dashboard. Never persisted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DerivedMetrics {
    pub total_scans: i64,
    pub quota_cap: i64,
    pub free_scans_remaining: i64,
    pub goal_target: i64,
    pub goal_progress_percent: i64,
    pub average_health_score: i64,
    pub should_prompt_upgrade: bool,
    pub plan: Plan,
    pub usage_level: UsageLevel,
    pub analyses_considered: usize,
}

impl Default for DerivedMetrics {
    fn default() -> Self {
        aggregate(None, &[])
    }
}

/// Derive dashboard metrics from a profile (or its absence) and the recent analysis window.
///
/// Pure and total: a missing profile yields the bootstrap defaults, a missing or
/// negative scan counter counts as zero, and malformed scores degrade instead of failing.
pub fn aggregate(profile: Option<&UserProfile>, analyses: &[AnalysisRecord]) -> DerivedMetrics {
    let total_scans = profile
        .and_then(|p| p.scans_used)
        .unwrap_or(0)
        .max(0);
    let plan = profile.map(|p| p.plan).unwrap_or_default();

    let free_scans_remaining = QUOTA_CAP.saturating_sub(total_scans).max(0);
    let goal_progress_percent =
        ((total_scans as f64 / GOAL_TARGET as f64) * 100.0).round().min(100.0) as i64;

    DerivedMetrics {
        total_scans,
        quota_cap: QUOTA_CAP,
        free_scans_remaining,
        goal_target: GOAL_TARGET,
        goal_progress_percent,
        average_health_score: average_score(analyses),
        should_prompt_upgrade: free_scans_remaining <= UPGRADE_PROMPT_THRESHOLD,
        plan,
        usage_level: UsageLevel::from_remaining(free_scans_remaining),
        analyses_considered: analyses.len(),
    }
}

fn average_score(analyses: &[AnalysisRecord]) -> i64 {
    if analyses.is_empty() {
        return 0;
    }
    let sum: f64 = analyses.iter().map(|a| sanitize_score(a.health_score)).sum();
    (sum / analyses.len() as f64).round() as i64
}

fn sanitize_score(score: Option<f64>) -> f64 {
    match score {
        Some(s) if s.is_finite() => s.clamp(0.0, 100.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn profile(scans_used: Option<i64>) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            email: None,
            display_name: None,
            plan: Plan::Free,
            scans_used,
            created_at: None,
        }
    }

    fn scored(scores: &[Option<f64>]) -> Vec<AnalysisRecord> {
        let user_id = Uuid::new_v4();
        scores
            .iter()
            .map(|s| AnalysisRecord {
                id: Uuid::new_v4(),
                user_id,
                product_name: None,
                health_score: *s,
                created_at: OffsetDateTime::UNIX_EPOCH,
            })
            .collect()
    }

    #[test]
    fn remaining_quota_never_negative() {
        for used in 0..=1000 {
            let m = aggregate(Some(&profile(Some(used))), &[]);
            assert_eq!(m.free_scans_remaining, (50 - used).max(0), "scans_used={used}");
            assert_eq!(m.should_prompt_upgrade, m.free_scans_remaining <= 5);
        }
    }

    #[test]
    fn goal_progress_is_capped_at_100() {
        for total in 0..=200 {
            let m = aggregate(Some(&profile(Some(total))), &[]);
            let expected = ((total as f64 / 10.0) * 100.0).round().min(100.0) as i64;
            assert_eq!(m.goal_progress_percent, expected);
        }
        assert_eq!(aggregate(Some(&profile(Some(7))), &[]).goal_progress_percent, 70);
        assert_eq!(aggregate(Some(&profile(Some(11))), &[]).goal_progress_percent, 100);
    }

    #[test]
    fn scenario_mid_quota() {
        let m = aggregate(Some(&profile(Some(25))), &[]);
        assert_eq!(m.free_scans_remaining, 25);
        assert!(!m.should_prompt_upgrade);

        let m = aggregate(Some(&profile(Some(3))), &[]);
        assert_eq!(m.total_scans, 3);
        assert_eq!(m.goal_progress_percent, 30);
    }

    #[test]
    fn scenario_over_cap() {
        let m = aggregate(Some(&profile(Some(60))), &[]);
        assert_eq!(m.free_scans_remaining, 0);
        assert!(m.should_prompt_upgrade);
        assert_eq!(m.usage_level, UsageLevel::Exhausted);
    }

    #[test]
    fn missing_profile_yields_bootstrap_defaults() {
        let m = aggregate(None, &[]);
        assert_eq!(m.total_scans, 0);
        assert_eq!(m.free_scans_remaining, 50);
        assert_eq!(m.goal_progress_percent, 0);
        assert_eq!(m.plan, Plan::Free);
        assert_eq!(m, DerivedMetrics::default());
    }

    #[test]
    fn negative_or_missing_counter_clamps_to_zero() {
        assert_eq!(aggregate(Some(&profile(Some(-4))), &[]).total_scans, 0);
        assert_eq!(aggregate(Some(&profile(None)), &[]).total_scans, 0);
    }

    #[test]
    fn average_rounds_and_degrades_bad_scores() {
        assert_eq!(aggregate(None, &scored(&[Some(70.0), Some(81.0)])).average_health_score, 76);
        // missing counts as zero, out-of-range is clamped, NaN counts as zero
        let m = aggregate(None, &scored(&[None, Some(150.0), Some(f64::NAN), Some(-3.0)]));
        assert_eq!(m.average_health_score, 25);
        assert_eq!(m.analyses_considered, 4);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let p = profile(Some(12));
        let a = scored(&[Some(55.5), Some(90.0), Some(12.0)]);
        assert_eq!(aggregate(Some(&p), &a), aggregate(Some(&p), &a));
    }

    #[test]
    fn usage_levels_follow_remaining_quota() {
        assert_eq!(UsageLevel::from_remaining(50), UsageLevel::Plenty);
        assert_eq!(UsageLevel::from_remaining(20), UsageLevel::Steady);
        assert_eq!(UsageLevel::from_remaining(10), UsageLevel::Low);
        assert_eq!(UsageLevel::from_remaining(0), UsageLevel::Exhausted);
    }
}
