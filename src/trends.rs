use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use chrono::{Days, NaiveDate, Utc};
use thiserror::Error;
use tracing::debug;

use crate::models::{AttendanceRecord, HierarchyLevel, TrendClassification, TrendResult};

pub const DEFAULT_WINDOW_WEEKS: u32 = 8;

/// Changes within +/- this many percent count as stagnation.
pub const STAGNATION_BAND: f64 = 5.0;

/// Reported change for a group with no activity in the previous half.
pub const NEW_ACTIVITY_CHANGE: f64 = 100.0;

/// Group key used when trends are computed without a hierarchy level.
pub const OVERALL_KEY: &str = "Overall";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrendError {
    #[error("trend window must be a positive even number of weeks, got {0}")]
    InvalidWindow(u32),
    #[error("a {weeks}-week window ending {as_of} starts before the earliest representable date")]
    WindowOutOfRange { weeks: u32, as_of: NaiveDate },
}

/// Rolling window of `weeks` weeks ending on `as_of`, split into a recent
/// half and a previous half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendWindow {
    weeks: u32,
    as_of: NaiveDate,
    start: NaiveDate,
}

impl TrendWindow {
    pub fn new(weeks: u32, as_of: NaiveDate) -> Result<Self, TrendError> {
        if weeks == 0 || weeks % 2 != 0 {
            return Err(TrendError::InvalidWindow(weeks));
        }
        let start = as_of
            .checked_sub_days(Days::new(u64::from(weeks) * 7 - 1))
            .ok_or(TrendError::WindowOutOfRange { weeks, as_of })?;
        Ok(Self { weeks, as_of, start })
    }

    pub fn ending_today(weeks: u32) -> Result<Self, TrendError> {
        Self::new(weeks, Utc::now().date_naive())
    }

    pub fn weeks(&self) -> u32 {
        self.weeks
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn recent_weeks(&self) -> u32 {
        self.weeks / 2
    }

    /// Earliest meeting date that still falls inside the window.
    pub fn start_date(&self) -> NaiveDate {
        self.start
    }

    /// Whole weeks between `date` and `as_of`, or `None` outside the window.
    pub fn week_index(&self, date: NaiveDate) -> Option<usize> {
        let days_ago = (self.as_of - date).num_days();
        if days_ago < 0 {
            return None;
        }
        let week = days_ago / 7;
        if week < i64::from(self.weeks) {
            Some(week as usize)
        } else {
            None
        }
    }
}

/// Samples keyed by week index; only weeks with reports get an entry.
#[derive(Default)]
struct WeeklyBuckets {
    weeks: BTreeMap<usize, Vec<u32>>,
}

impl WeeklyBuckets {
    fn push(&mut self, week: usize, total_present: u32) {
        self.weeks.entry(week).or_default().push(total_present);
    }

    /// Mean of the weekly means over `range`. Weeks without samples are
    /// left out of the denominator.
    fn half_average(&self, range: Range<usize>) -> f64 {
        let (total, counted) = self
            .weeks
            .range(range)
            .filter_map(|(_, samples)| weekly_average(samples))
            .fold((0.0, 0usize), |(total, counted), avg| (total + avg, counted + 1));

        if counted == 0 {
            0.0
        } else {
            total / counted as f64
        }
    }
}

fn weekly_average(samples: &[u32]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: u64 = samples.iter().map(|&value| u64::from(value)).sum();
    Some(sum as f64 / samples.len() as f64)
}

/// Classifies each group's attendance trajectory over `window`.
///
/// Records outside the window, and records with a blank label at
/// `group_by`, are ignored. A group appears in the output only if at least
/// one of its records survives. With `group_by == None` every record falls
/// under [`OVERALL_KEY`].
pub fn compute_trends<'a, I>(
    records: I,
    window: &TrendWindow,
    group_by: Option<HierarchyLevel>,
) -> BTreeMap<String, TrendResult>
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    let weeks = window.weeks() as usize;
    let mut buckets: HashMap<&'a str, WeeklyBuckets> = HashMap::new();
    let mut outside_window = 0usize;
    let mut unlabeled = 0usize;

    for record in records {
        let Some(week) = window.week_index(record.occurred_on) else {
            outside_window += 1;
            continue;
        };
        let key = match group_by {
            Some(level) => match record.label(level) {
                Some(label) => label,
                None => {
                    unlabeled += 1;
                    continue;
                }
            },
            None => OVERALL_KEY,
        };

        buckets
            .entry(key)
            .or_default()
            .push(week, record.total_present);
    }

    debug!(
        groups = buckets.len(),
        outside_window,
        unlabeled,
        as_of = %window.as_of(),
        weeks,
        "bucketed attendance records"
    );

    let recent = window.recent_weeks() as usize;
    buckets
        .into_iter()
        .map(|(key, weekly)| {
            let recent_avg = weekly.half_average(0..recent);
            let previous_avg = weekly.half_average(recent..weeks);
            (key.to_string(), classify(recent_avg, previous_avg))
        })
        .collect()
}

/// Compares the recent-half average against the previous-half average.
pub fn classify(recent_avg: f64, previous_avg: f64) -> TrendResult {
    if previous_avg > 0.0 {
        let change = (recent_avg - previous_avg) / previous_avg * 100.0;
        TrendResult {
            percent_change: Some(change),
            classification: classify_change(change),
        }
    } else if recent_avg > 0.0 {
        // Any new activity is reported as a flat 100% growth.
        TrendResult {
            percent_change: Some(NEW_ACTIVITY_CHANGE),
            classification: TrendClassification::Growth,
        }
    } else {
        TrendResult {
            percent_change: None,
            classification: TrendClassification::Neutral,
        }
    }
}

fn classify_change(change: f64) -> TrendClassification {
    if change > STAGNATION_BAND {
        TrendClassification::Growth
    } else if change < -STAGNATION_BAND {
        TrendClassification::Decline
    } else {
        TrendClassification::Stagnation
    }
}

/// Declining and stagnating groups, worst change first.
pub fn rank_underperforming(trends: &BTreeMap<String, TrendResult>) -> Vec<(String, TrendResult)> {
    let mut ranked: Vec<(String, TrendResult)> = trends
        .iter()
        .filter(|(_, trend)| {
            matches!(
                trend.classification,
                TrendClassification::Decline | TrendClassification::Stagnation
            )
        })
        .map(|(key, trend)| (key.clone(), *trend))
        .collect();

    ranked.sort_by(|a, b| {
        let left = a.1.percent_change.unwrap_or(0.0);
        let right = b.1.percent_change.unwrap_or(0.0);
        left.total_cmp(&right).then_with(|| a.0.cmp(&b.0))
    });
    ranked
}

/// Red zones are declining groups, orange zones are stagnating ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Zones {
    pub red: Vec<(String, f64)>,
    pub orange: Vec<(String, f64)>,
}

impl Zones {
    pub fn is_empty(&self) -> bool {
        self.red.is_empty() && self.orange.is_empty()
    }
}

pub fn zones(trends: &BTreeMap<String, TrendResult>) -> Zones {
    let mut zones = Zones::default();
    for (key, trend) in trends {
        let Some(change) = trend.percent_change else {
            continue;
        };
        match trend.classification {
            TrendClassification::Decline => zones.red.push((key.clone(), change)),
            TrendClassification::Stagnation => zones.orange.push((key.clone(), change)),
            _ => {}
        }
    }
    zones
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrillDown {
    pub region: String,
    pub groups: Vec<(String, TrendResult)>,
    pub districts: Vec<(String, TrendResult)>,
    pub cells: Vec<(String, TrendResult)>,
}

impl DrillDown {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.districts.is_empty() && self.cells.is_empty()
    }
}

/// Ranks the underperforming groups, districts and cells of one region.
pub fn drill_down(records: &[AttendanceRecord], region: &str, window: &TrendWindow) -> DrillDown {
    let in_region: Vec<&AttendanceRecord> = records
        .iter()
        .filter(|record| record.region == region)
        .collect();

    let ranked = |level| {
        rank_underperforming(&compute_trends(
            in_region.iter().copied(),
            window,
            Some(level),
        ))
    };

    DrillDown {
        region: region.to_string(),
        groups: ranked(HierarchyLevel::Group),
        districts: ranked(HierarchyLevel::District),
        cells: ranked(HierarchyLevel::Cell),
    }
}
