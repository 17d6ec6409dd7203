// src/services/analytics.rs
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;

use crate::models::auth::Role;
use crate::models::community::{Audience, ReactionSummary, ReactionType};

/// Community audiences visible to a role.
pub fn audience_scope(role: Role) -> Vec<Audience> {
    match role {
        Role::Patient => vec![Audience::Patients, Audience::All],
        Role::Counselor => vec![Audience::Counselors, Audience::All],
        Role::Admin => vec![Audience::Patients, Audience::Counselors, Audience::All],
    }
}

/// Moves one reaction from `old` to `new`. Either side may be absent (first
/// reaction, removal). Counters never go below zero.
pub fn update_reaction_summary(
    summary: ReactionSummary,
    old: Option<ReactionType>,
    new: Option<ReactionType>,
) -> ReactionSummary {
    let mut result = summary;
    if let Some(old) = old {
        let count = result.count_mut(old);
        *count = (*count - 1).max(0);
    }
    if let Some(new) = new {
        *result.count_mut(new) += 1;
    }
    result
}

/// Raw per-counselor aggregate as read from the sessions table.
#[derive(Debug, Clone, Default)]
pub struct CounselorSessionAggregate {
    pub counselor_id: i32,
    pub total_sessions: i64,
    pub completed_sessions: i64,
    pub upcoming_sessions: i64,
    pub active_patients: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: i64,
    pub completed_sessions: i64,
    pub upcoming_sessions: i64,
    pub active_patients: i64,
    pub completion_rate: f64,
    pub average_sessions_per_patient: f64,
}

pub fn map_session_stats(stats: &[CounselorSessionAggregate]) -> HashMap<i32, SessionStats> {
    stats
        .iter()
        .map(|stat| {
            let completion_rate = if stat.total_sessions > 0 {
                round1(stat.completed_sessions as f64 / stat.total_sessions as f64 * 100.0)
            } else {
                0.0
            };
            let average_sessions_per_patient = if stat.active_patients > 0 {
                round1(stat.total_sessions as f64 / stat.active_patients as f64)
            } else {
                0.0
            };

            (
                stat.counselor_id,
                SessionStats {
                    total_sessions: stat.total_sessions,
                    completed_sessions: stat.completed_sessions,
                    upcoming_sessions: stat.upcoming_sessions,
                    active_patients: stat.active_patients,
                    completion_rate,
                    average_sessions_per_patient,
                },
            )
        })
        .collect()
}

/// Percentage with one decimal, 0 when the denominator is empty.
pub fn rate(part: i64, total: i64) -> f64 {
    if total > 0 {
        round1(part as f64 / total as f64 * 100.0)
    } else {
        0.0
    }
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Whole-number approval percentage used on the admin dashboard.
pub fn approval_rate(approved: i64, total: i64) -> i64 {
    if total > 0 {
        (approved as f64 / total as f64 * 100.0).round() as i64
    } else {
        0
    }
}

pub fn pending_urgency(pending: i64) -> &'static str {
    if pending > 10 {
        "high"
    } else if pending > 5 {
        "medium"
    } else {
        "low"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

/// `days` consecutive entries ending at `today`, filled from `counts`;
/// dates missing from `counts` stay at zero.
pub fn daily_series(today: NaiveDate, days: u32, counts: &[(NaiveDate, i64)]) -> Vec<DailyCount> {
    let lookup: HashMap<NaiveDate, i64> = counts.iter().copied().collect();
    (0..days as i64)
        .rev()
        .map(|offset| {
            let date = today - Duration::days(offset);
            DailyCount {
                date: date.format("%Y-%m-%d").to_string(),
                count: lookup.get(&date).copied().unwrap_or(0),
            }
        })
        .collect()
}

/// First day of the six months ending with the month of `today`, oldest first.
pub fn last_six_months(today: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::with_capacity(6);
    let (mut year, mut month) = (today.year(), today.month());
    for _ in 0..6 {
        if let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) {
            months.push(first);
        }
        if month == 1 {
            year -= 1;
            month = 12;
        } else {
            month -= 1;
        }
    }
    months.reverse();
    months
}

/// Fills every role with zero, then applies the grouped counts.
pub fn counts_by_role(groups: &[(Role, i64)]) -> HashMap<String, i64> {
    let mut result: HashMap<String, i64> = Role::ALL.iter().map(|role| (role.to_string(), 0)).collect();
    for (role, count) in groups {
        result.insert(role.to_string(), *count);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_scope_by_role() {
        assert_eq!(audience_scope(Role::Patient), vec![Audience::Patients, Audience::All]);
        assert_eq!(audience_scope(Role::Counselor), vec![Audience::Counselors, Audience::All]);
        assert_eq!(
            audience_scope(Role::Admin),
            vec![Audience::Patients, Audience::Counselors, Audience::All]
        );
    }

    #[test]
    fn test_update_reaction_summary_increments_and_decrements() {
        let base = ReactionSummary {
            like: 1,
            ..ReactionSummary::default()
        };

        let increased = update_reaction_summary(base, None, Some(ReactionType::Support));
        assert_eq!(increased.support, 1);
        assert_eq!(increased.like, 1);

        let switched = update_reaction_summary(increased, Some(ReactionType::Support), Some(ReactionType::Insight));
        assert_eq!(switched.support, 0);
        assert_eq!(switched.insight, 1);

        let removed = update_reaction_summary(switched, Some(ReactionType::Insight), None);
        assert_eq!(removed.insight, 0);

        let floored = update_reaction_summary(removed, Some(ReactionType::Celebrate), None);
        assert_eq!(floored.celebrate, 0);
    }

    #[test]
    fn test_map_session_stats() {
        let stats = vec![CounselorSessionAggregate {
            counselor_id: 4,
            total_sessions: 10,
            completed_sessions: 8,
            upcoming_sessions: 2,
            active_patients: 3,
        }];

        let result = map_session_stats(&stats);
        let entry = &result[&4];
        assert_eq!(entry.total_sessions, 10);
        assert_eq!(entry.completed_sessions, 8);
        assert_eq!(entry.upcoming_sessions, 2);
        assert_eq!(entry.active_patients, 3);
        assert_eq!(entry.completion_rate, 80.0);
        assert_eq!(entry.average_sessions_per_patient, 3.3);
    }

    #[test]
    fn test_map_session_stats_without_sessions() {
        let result = map_session_stats(&[CounselorSessionAggregate {
            counselor_id: 1,
            ..Default::default()
        }]);
        assert_eq!(result[&1].completion_rate, 0.0);
        assert_eq!(result[&1].average_sessions_per_patient, 0.0);
    }

    #[test]
    fn test_dashboard_helpers() {
        assert_eq!(approval_rate(2, 3), 67);
        assert_eq!(approval_rate(0, 0), 0);
        assert_eq!(pending_urgency(11), "high");
        assert_eq!(pending_urgency(6), "medium");
        assert_eq!(pending_urgency(5), "low");
        assert_eq!(rate(1, 3), 33.3);
    }

    #[test]
    fn test_daily_series_fills_gaps() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let series = daily_series(today, 7, &[(NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(), 4)]);
        assert_eq!(series.len(), 7);
        assert_eq!(series[0].date, "2025-03-01");
        assert_eq!(series[6].date, "2025-03-07");
        assert_eq!(series[4].count, 4);
        assert_eq!(series.iter().map(|d| d.count).sum::<i64>(), 4);
    }

    #[test]
    fn test_last_six_months_crosses_year() {
        let months = last_six_months(NaiveDate::from_ymd_opt(2025, 2, 18).unwrap());
        assert_eq!(months.first(), NaiveDate::from_ymd_opt(2024, 9, 1).as_ref());
        assert_eq!(months.last(), NaiveDate::from_ymd_opt(2025, 2, 1).as_ref());
        assert_eq!(months.len(), 6);
    }

    #[test]
    fn test_counts_by_role_defaults_to_zero() {
        let counts = counts_by_role(&[(Role::Counselor, 3)]);
        assert_eq!(counts["counselor"], 3);
        assert_eq!(counts["patient"], 0);
        assert_eq!(counts["admin"], 0);
    }
}
