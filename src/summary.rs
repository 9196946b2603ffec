use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Days, NaiveDate};

use crate::models::{
    AttendanceRecord, Demographics, HierarchyLevel, LevelSummary, Overview, RegionMembers,
    WeeklyPoint,
};

const UNASSIGNED: &str = "N/A";

pub fn summarize_by_level(records: &[AttendanceRecord], level: HierarchyLevel) -> Vec<LevelSummary> {
    let mut map: BTreeMap<&str, LevelSummary> = BTreeMap::new();

    for record in records {
        let name = record.label(level).unwrap_or(UNASSIGNED);
        let entry = map.entry(name).or_insert_with(|| LevelSummary {
            name: name.to_string(),
            report_count: 0,
            total_present: 0,
            bible_study: 0,
            miracle_hour: 0,
            sunday_service: 0,
            avg_attendance: 0.0,
        });

        entry.report_count += 1;
        entry.total_present += u64::from(record.total_present);
        entry.bible_study += u64::from(record.bible_study);
        entry.miracle_hour += u64::from(record.miracle_hour);
        entry.sunday_service += u64::from(record.sunday_service);
    }

    map.into_values()
        .map(|mut summary| {
            summary.avg_attendance = if summary.report_count == 0 {
                0.0
            } else {
                summary.total_present as f64 / summary.report_count as f64
            };
            summary
        })
        .collect()
}

/// Each cell's most recent report. On equal dates the first one seen wins.
fn latest_by_cell(records: &[AttendanceRecord]) -> Vec<&AttendanceRecord> {
    let mut latest: HashMap<(&str, &str, &str, &str), &AttendanceRecord> = HashMap::new();
    for record in records {
        latest
            .entry(record.cell_key())
            .and_modify(|current| {
                if record.occurred_on > current.occurred_on {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    latest.into_values().collect()
}

fn demographics_of<'a>(records: impl IntoIterator<Item = &'a AttendanceRecord>) -> Demographics {
    records
        .into_iter()
        .fold(Demographics::default(), |mut totals, record| {
            totals.men += u64::from(record.registered_men);
            totals.women += u64::from(record.registered_women);
            totals.children += u64::from(record.registered_children);
            totals
        })
}

pub fn overview(records: &[AttendanceRecord]) -> Overview {
    if records.is_empty() {
        return Overview::default();
    }

    let total_present: u64 = records.iter().map(|r| u64::from(r.total_present)).sum();
    let demographics = demographics_of(latest_by_cell(records));

    Overview {
        total_reports: records.len(),
        total_present,
        avg_attendance: total_present as f64 / records.len() as f64,
        new_invitees: records.iter().map(|r| u64::from(r.invited_count)).sum(),
        visits_made: records.iter().map(|r| u64::from(r.visits_count)).sum(),
        registered_members: demographics.total(),
        demographics,
    }
}

/// Registered members per region from each cell's latest report, largest
/// region first. Regions with no members are left out.
pub fn members_by_region(records: &[AttendanceRecord]) -> Vec<RegionMembers> {
    let mut by_region: BTreeMap<&str, Vec<&AttendanceRecord>> = BTreeMap::new();
    for record in latest_by_cell(records) {
        by_region.entry(record.region.as_str()).or_default().push(record);
    }

    let mut members: Vec<RegionMembers> = by_region
        .into_iter()
        .map(|(region, reports)| RegionMembers {
            region: region.to_string(),
            demographics: demographics_of(reports),
        })
        .filter(|entry| entry.demographics.total() > 0)
        .collect();

    members.sort_by(|a, b| {
        b.demographics
            .total()
            .cmp(&a.demographics.total())
            .then_with(|| a.region.cmp(&b.region))
    });
    members
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

/// Sums `value` per Monday-starting week, oldest week first.
pub fn weekly_series<F>(records: &[AttendanceRecord], value: F) -> Vec<WeeklyPoint>
where
    F: Fn(&AttendanceRecord) -> u32,
{
    let mut weeks: BTreeMap<NaiveDate, (u64, usize)> = BTreeMap::new();
    for record in records {
        let entry = weeks.entry(week_start(record.occurred_on)).or_insert((0, 0));
        entry.0 += u64::from(value(record));
        entry.1 += 1;
    }

    weeks
        .into_iter()
        .map(|(week_start, (value, report_count))| WeeklyPoint {
            week_start,
            value,
            report_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(region: &str, group: &str, total_present: u32, bible_study: u32) -> AttendanceRecord {
        AttendanceRecord {
            occurred_on: NaiveDate::from_ymd_opt(2026, 4, 12).unwrap(),
            total_present,
            region: region.to_string(),
            group: group.to_string(),
            district: String::new(),
            cell_name: "Cellule Foi".to_string(),
            bible_study,
            miracle_hour: 1,
            sunday_service: 2,
            registered_men: 0,
            registered_women: 0,
            registered_children: 0,
            invited_count: 0,
            visits_count: 0,
        }
    }

    #[test]
    fn totals_accumulate_per_label() {
        let records = vec![
            record("Zou", "Abomey", 10, 4),
            record("Atlantique", "Allada", 7, 1),
            record("Zou", "Bohicon", 20, 6),
        ];

        let summaries = summarize_by_level(&records, HierarchyLevel::Region);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "Atlantique");

        let zou = &summaries[1];
        assert_eq!(zou.report_count, 2);
        assert_eq!(zou.total_present, 30);
        assert_eq!(zou.bible_study, 10);
        assert_eq!(zou.miracle_hour, 2);
        assert_eq!(zou.sunday_service, 4);
        assert!((zou.avg_attendance - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn blank_labels_are_grouped_as_unassigned() {
        let records = vec![record("Zou", "", 5, 0), record("Zou", "Abomey", 8, 0)];
        let summaries = summarize_by_level(&records, HierarchyLevel::Group);
        let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Abomey", "N/A"]);

        let districts = summarize_by_level(&records, HierarchyLevel::District);
        assert_eq!(districts.len(), 1);
        assert_eq!(districts[0].report_count, 2);
    }

    fn member_report(
        region: &str,
        cell: &str,
        date: NaiveDate,
        men: u32,
        women: u32,
        children: u32,
    ) -> AttendanceRecord {
        AttendanceRecord {
            occurred_on: date,
            cell_name: cell.to_string(),
            registered_men: men,
            registered_women: women,
            registered_children: children,
            ..record(region, "Centre", 20, 0)
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, d).unwrap()
    }

    #[test]
    fn overview_counts_members_from_latest_report_per_cell() {
        let mut older = member_report("Zou", "Cellule Foi", day(1), 10, 10, 10);
        older.invited_count = 2;
        older.visits_count = 1;
        let mut newer = member_report("Zou", "Cellule Foi", day(8), 12, 9, 4);
        newer.invited_count = 3;
        newer.total_present = 31;
        let other = member_report("Mono", "Cellule Paix", day(3), 5, 6, 0);

        let stats = overview(&[older, newer, other]);
        assert_eq!(stats.total_reports, 3);
        assert_eq!(stats.total_present, 71);
        assert!((stats.avg_attendance - 71.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.new_invitees, 5);
        assert_eq!(stats.visits_made, 1);
        assert_eq!(
            stats.demographics,
            Demographics {
                men: 17,
                women: 15,
                children: 4,
            }
        );
        assert_eq!(stats.registered_members, 36);
    }

    #[test]
    fn overview_of_nothing_is_zero() {
        assert_eq!(overview(&[]), Overview::default());
    }

    #[test]
    fn members_by_region_ranks_largest_first() {
        let records = vec![
            member_report("Zou", "Cellule Foi", day(1), 1, 1, 1),
            member_report("Mono", "Cellule Paix", day(1), 4, 4, 4),
            member_report("Mono", "Cellule Joie", day(2), 1, 0, 0),
            member_report("Donga", "Cellule Vie", day(2), 0, 0, 0),
        ];
        let members = members_by_region(&records);
        let regions: Vec<&str> = members.iter().map(|m| m.region.as_str()).collect();
        assert_eq!(regions, vec!["Mono", "Zou"]);
        assert_eq!(members[0].demographics.total(), 13);
    }

    #[test]
    fn weeks_start_on_monday() {
        assert_eq!(week_start(day(1)), day(1));
        assert_eq!(week_start(day(7)), day(1));
        assert_eq!(week_start(day(8)), day(8));
    }

    #[test]
    fn weekly_series_sums_per_week() {
        let mut sunday = member_report("Zou", "Cellule Foi", day(7), 0, 0, 0);
        sunday.visits_count = 2;
        let mut monday = member_report("Zou", "Cellule Foi", day(1), 0, 0, 0);
        monday.visits_count = 1;
        let next = member_report("Zou", "Cellule Foi", day(9), 0, 0, 0);

        let records = vec![sunday, next, monday];
        let attendance = weekly_series(&records, |r| r.total_present);
        assert_eq!(
            attendance,
            vec![
                WeeklyPoint {
                    week_start: day(1),
                    value: 40,
                    report_count: 2,
                },
                WeeklyPoint {
                    week_start: day(8),
                    value: 20,
                    report_count: 1,
                },
            ]
        );

        let visits = weekly_series(&records, |r| r.visits_count);
        assert_eq!(visits[0].value, 3);
        assert_eq!(visits[1].value, 0);
    }
}
