//! Aggregate statistics derived from the audit ledger.
//!
//! Statistics are recomputed on demand from a ledger snapshot. The
//! "same day" slice uses the ledger's own timestamps (the latest entry's
//! date), not the wall clock at query time, so a frozen ledger always
//! reproduces the same numbers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ledger::{AuditLogEntry, AuditOutcome};

/// Call counts and latency over one set of entries.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CallTally {
    pub total_calls: u64,
    pub success_calls: u64,
    pub failed_calls: u64,
    /// `success_calls / total_calls`; 0.0 for an empty set, never a
    /// division error.
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

/// Ledger-wide statistics plus the latest-day slice.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Statistics {
    pub overall: CallTally,
    /// The ledger date the `same_day` slice covers; `None` on an empty set.
    pub latest_day: Option<NaiveDate>,
    pub same_day: CallTally,
}

fn tally<'a>(entries: impl Iterator<Item = &'a AuditLogEntry>) -> CallTally {
    let mut total = 0u64;
    let mut success = 0u64;
    let mut latency_sum = 0u64;

    for entry in entries {
        total += 1;
        if entry.outcome == AuditOutcome::Success {
            success += 1;
        }
        latency_sum += entry.latency_ms;
    }

    CallTally {
        total_calls: total,
        success_calls: success,
        failed_calls: total - success,
        success_rate: if total == 0 {
            0.0
        } else {
            success as f64 / total as f64
        },
        avg_latency_ms: if total == 0 {
            0.0
        } else {
            latency_sum as f64 / total as f64
        },
    }
}

/// Compute statistics over a ledger snapshot (or any filtered view of one).
pub fn compute(entries: &[AuditLogEntry]) -> Statistics {
    let overall = tally(entries.iter());
    let latest_day = entries.iter().map(|e| e.timestamp.date_naive()).max();
    let same_day = match latest_day {
        Some(day) => tally(entries.iter().filter(|e| e.timestamp.date_naive() == day)),
        None => CallTally::default(),
    };

    Statistics {
        overall,
        latest_day,
        same_day,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{test_entry, AuditAction};
    use chrono::{TimeZone, Utc};

    #[test]
    fn empty_ledger_has_zero_rate_not_a_division_error() {
        let stats = compute(&[]);
        assert_eq!(stats.overall.total_calls, 0);
        assert_eq!(stats.overall.success_rate, 0.0);
        assert!(stats.latest_day.is_none());
    }

    #[test]
    fn counts_balance_and_rate_matches() {
        let t = Utc.with_ymd_and_hms(2025, 5, 12, 9, 0, 0).unwrap();
        let entries = vec![
            test_entry(AuditAction::DocumentCreate, AuditOutcome::Success, t, 100),
            test_entry(AuditAction::DocumentCreate, AuditOutcome::Success, t, 300),
            test_entry(AuditAction::DocumentCreate, AuditOutcome::Failed, t, 200),
            test_entry(AuditAction::EligibilityCheck, AuditOutcome::Failed, t, 400),
        ];

        let stats = compute(&entries);
        assert_eq!(
            stats.overall.success_calls + stats.overall.failed_calls,
            stats.overall.total_calls
        );
        assert_eq!(stats.overall.success_rate, 0.5);
        assert_eq!(stats.overall.avg_latency_ms, 250.0);
    }

    #[test]
    fn same_day_slice_follows_ledger_timestamps_not_wall_clock() {
        let yesterday = Utc.with_ymd_and_hms(2025, 5, 11, 23, 0, 0).unwrap();
        let latest = Utc.with_ymd_and_hms(2025, 5, 12, 8, 0, 0).unwrap();
        let entries = vec![
            test_entry(AuditAction::DocumentCreate, AuditOutcome::Failed, yesterday, 500),
            test_entry(AuditAction::DocumentCreate, AuditOutcome::Success, latest, 100),
            test_entry(AuditAction::DocumentCancel, AuditOutcome::Success, latest, 100),
        ];

        let stats = compute(&entries);
        assert_eq!(stats.latest_day, latest.date_naive().into());
        assert_eq!(stats.same_day.total_calls, 2);
        assert_eq!(stats.same_day.failed_calls, 0);
        assert_eq!(stats.same_day.success_rate, 1.0);

        // A frozen ledger reproduces identical statistics on every run.
        assert_eq!(compute(&entries), stats);
    }
}
