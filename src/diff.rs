// ABOUTME: Differ - finds source records that are new or changed relative to the replica
// ABOUTME: Key lookup over the replica, recency plus per-field comparison, explicit duplicate policy

use std::collections::HashMap;

use crate::record::{Field, SessionRecord};

/// How many times a changed record is emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DiffPolicy {
    /// At most one entry per source record.
    #[default]
    Dedup,
    /// One entry per satisfied field check, up to six per record. Matches the
    /// output shape older consumers of this job were built against.
    Parity,
}

/// Counts gathered while diffing, for the run log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub new_rows: usize,
    pub updated_rows: usize,
    pub emitted: usize,
}

/// Records from `source` that are absent from `replica` or changed relative to it.
///
/// For a record present on both sides, each of the comparable fields yields a
/// check that holds when the source recency is strictly newer or that field
/// differs. `None` recency sorts before any timestamp, so a missing source
/// timestamp is never newer and a missing replica timestamp is older than any
/// concrete source value.
///
/// Output keeps source order.
pub fn compare_data(
    source: &[SessionRecord],
    replica: &[SessionRecord],
    policy: DiffPolicy,
) -> (Vec<SessionRecord>, DiffStats) {
    let replica_by_id: HashMap<i64, &SessionRecord> =
        replica.iter().map(|row| (row.id, row)).collect();

    let mut changed = Vec::new();
    let mut stats = DiffStats::default();

    for row in source {
        let Some(existing) = replica_by_id.get(&row.id) else {
            stats.new_rows += 1;
            changed.push(row.clone());
            continue;
        };

        let hits = matching_checks(row, existing);
        if hits == 0 {
            continue;
        }

        stats.updated_rows += 1;
        let copies = match policy {
            DiffPolicy::Dedup => 1,
            DiffPolicy::Parity => hits,
        };
        changed.extend(std::iter::repeat(row).take(copies).cloned());
    }

    stats.emitted = changed.len();

    tracing::debug!(
        "Diff found {} new and {} updated records ({} emitted, policy {:?})",
        stats.new_rows,
        stats.updated_rows,
        stats.emitted,
        policy
    );

    (changed, stats)
}

/// Number of comparable fields whose check holds for this pair.
fn matching_checks(source: &SessionRecord, replica: &SessionRecord) -> usize {
    let newer = source.last_updated > replica.last_updated;
    Field::COMPARABLE
        .iter()
        .filter(|field| newer || source.field(**field) != replica.field(**field))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn full_record(id: i64) -> SessionRecord {
        SessionRecord::new(id)
            .with(Field::SessionId, "abc")
            .with(Field::LoginTime, "2025-03-01 08:00:00")
            .with(Field::LogoutTime, "2025-03-01 09:00:00")
            .with(Field::IpAddress, "10.0.0.1")
            .with(Field::UserName, "alice")
            .with(Field::DeviceType, "laptop")
            .updated_at(ts(9))
    }

    #[test]
    fn test_identical_sets_produce_empty_diff() {
        let source = vec![full_record(1), full_record(2), full_record(3)];
        let replica = source.clone();

        for policy in [DiffPolicy::Dedup, DiffPolicy::Parity] {
            let (changed, stats) = compare_data(&source, &replica, policy);
            assert!(changed.is_empty());
            assert_eq!(stats, DiffStats::default());
        }
    }

    #[test]
    fn test_missing_key_is_included_once() {
        let source = vec![full_record(1), full_record(2)];
        let replica = vec![full_record(1)];

        for policy in [DiffPolicy::Dedup, DiffPolicy::Parity] {
            let (changed, stats) = compare_data(&source, &replica, policy);
            assert_eq!(changed, vec![full_record(2)]);
            assert_eq!(stats.new_rows, 1);
            assert_eq!(stats.updated_rows, 0);
        }
    }

    #[test]
    fn test_single_field_change_dedup_emits_once() {
        let source = vec![full_record(1).with(Field::DeviceType, "phone")];
        let replica = vec![full_record(1)];

        let (changed, stats) = compare_data(&source, &replica, DiffPolicy::Dedup);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].device_type.as_deref(), Some("phone"));
        assert_eq!(stats.updated_rows, 1);
    }

    #[test]
    fn test_single_field_change_parity_emits_once() {
        let source = vec![full_record(1).with(Field::DeviceType, "phone")];
        let replica = vec![full_record(1)];

        let (changed, _) = compare_data(&source, &replica, DiffPolicy::Parity);
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn test_two_field_change_parity_emits_twice() {
        let source = vec![full_record(1)
            .with(Field::UserName, "bob")
            .with(Field::IpAddress, "10.0.0.2")];
        let replica = vec![full_record(1)];

        let (parity, stats) = compare_data(&source, &replica, DiffPolicy::Parity);
        assert_eq!(parity.len(), 2);
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.updated_rows, 1);

        let (dedup, _) = compare_data(&source, &replica, DiffPolicy::Dedup);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_newer_recency_satisfies_every_check() {
        let source = vec![full_record(1).updated_at(ts(10))];
        let replica = vec![full_record(1)];

        let (parity, _) = compare_data(&source, &replica, DiffPolicy::Parity);
        assert_eq!(parity.len(), Field::COMPARABLE.len());
        assert!(parity.iter().all(|row| row.id == 1));

        let (dedup, _) = compare_data(&source, &replica, DiffPolicy::Dedup);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_older_source_with_equal_fields_is_skipped() {
        let source = vec![full_record(1).updated_at(ts(8))];
        let replica = vec![full_record(1)];

        let (changed, _) = compare_data(&source, &replica, DiffPolicy::Dedup);
        assert!(changed.is_empty());
    }

    #[test]
    fn test_missing_recency_ordering() {
        let mut no_ts = full_record(1);
        no_ts.last_updated = None;

        // Source has no timestamp: never newer.
        let (changed, _) = compare_data(&[no_ts.clone()], &[full_record(1)], DiffPolicy::Dedup);
        assert!(changed.is_empty());

        // Replica has no timestamp: any concrete source value is newer.
        let (changed, _) = compare_data(&[full_record(1)], &[no_ts.clone()], DiffPolicy::Dedup);
        assert_eq!(changed.len(), 1);

        // Neither side has one: falls back to field comparison.
        let (changed, _) = compare_data(&[no_ts.clone()], &[no_ts], DiffPolicy::Dedup);
        assert!(changed.is_empty());
    }

    #[test]
    fn test_null_versus_value_counts_as_difference() {
        let mut source = full_record(1);
        source.ip_address = None;

        let (changed, _) = compare_data(&[source], &[full_record(1)], DiffPolicy::Dedup);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].ip_address, None);
    }

    #[test]
    fn test_output_preserves_source_order() {
        let source = vec![full_record(5), full_record(3), full_record(9)];
        let (changed, _) = compare_data(&source, &[], DiffPolicy::Dedup);
        let ids: Vec<i64> = changed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[test]
    fn test_duplicate_replica_keys_last_one_wins() {
        let stale = full_record(1).with(Field::UserName, "old");
        let replica = vec![stale, full_record(1)];

        let (changed, _) = compare_data(&[full_record(1)], &replica, DiffPolicy::Dedup);
        assert!(changed.is_empty());
    }
}
