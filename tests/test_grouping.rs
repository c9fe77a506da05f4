use chrono::{Duration, NaiveDate};
use demchange::core::{AcquisitionGrouper, GroupingPolicy};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Deterministic scatter of acquisition dates over two years
fn scattered_rasters(count: usize) -> Vec<PathBuf> {
    let start = NaiveDate::from_ymd_opt(2016, 6, 1).unwrap();
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..count)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let date = start + Duration::days((state % 730) as i64);
            PathBuf::from(format!("SETSM_WV01_{}_seg{}_2m_dem.tif", date.format("%Y%m%d"), i))
        })
        .collect()
}

fn check_partition(rasters: &[PathBuf], window: i64, policy: GroupingPolicy) {
    let grouper = AcquisitionGrouper::new().unwrap();
    let groups = grouper.group_by_date(rasters, window, policy).unwrap();

    let mut seen = BTreeSet::new();
    for (key, members) in &groups {
        assert!(!members.is_empty());
        for member in members {
            assert!(seen.insert(member.clone()), "{} is in two groups", member.display());
            let date = grouper.parser().acquisition_date(member).unwrap();
            assert!(
                (date - *key).num_days().abs() <= window,
                "{} is more than {} days from {}",
                member.display(),
                window,
                key
            );
        }
    }
    let all: BTreeSet<PathBuf> = rasters.iter().cloned().collect();
    assert_eq!(seen, all);
}

#[test]
fn test_date_grouping_partitions_input() {
    let rasters = scattered_rasters(60);
    for window in [0, 7, 31, 90] {
        check_partition(&rasters, window, GroupingPolicy::FirstMatch);
        check_partition(&rasters, window, GroupingPolicy::Chronological);
    }
}

#[test]
fn test_chronological_grouping_ignores_input_order() {
    let grouper = AcquisitionGrouper::new().unwrap();
    let rasters = scattered_rasters(40);
    let mut reversed = rasters.clone();
    reversed.reverse();

    let a = grouper
        .group_by_date(&rasters, 31, GroupingPolicy::Chronological)
        .unwrap();
    let b = grouper
        .group_by_date(&reversed, 31, GroupingPolicy::Chronological)
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_strip_grouping_partitions_input() {
    let grouper = AcquisitionGrouper::new().unwrap();
    let ids = [
        "20170226_1030010066648800_1030010066CDE700",
        "20170301_102001005E3F1A00_102001005F7B2C00",
    ];
    let rasters: Vec<PathBuf> = (0..6)
        .map(|i| PathBuf::from(format!("SETSM_WV02_{}_seg{}_2m_dem.tif", ids[i % 2], i)))
        .collect();

    let groups = grouper.group_by_strip_id(&rasters).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups.values().map(Vec::len).sum::<usize>(), rasters.len());
    for (id, members) in &groups {
        assert!(members.iter().all(|m| m.to_string_lossy().contains(id.as_str())));
    }
}
