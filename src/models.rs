use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One weekly cell meeting report, as consumed by the trend engine.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub occurred_on: NaiveDate,
    pub total_present: u32,
    pub region: String,
    pub group: String,
    pub district: String,
    pub cell_name: String,
    pub bible_study: u32,
    pub miracle_hour: u32,
    pub sunday_service: u32,
    pub registered_men: u32,
    pub registered_women: u32,
    pub registered_children: u32,
    pub invited_count: u32,
    pub visits_count: u32,
}

impl AttendanceRecord {
    pub fn registered_members(&self) -> u64 {
        u64::from(self.registered_men)
            + u64::from(self.registered_women)
            + u64::from(self.registered_children)
    }

    /// Identifies the cell across reports by its full hierarchy path.
    pub fn cell_key(&self) -> (&str, &str, &str, &str) {
        (&self.region, &self.group, &self.district, &self.cell_name)
    }

    /// The first hierarchy level, top down, whose name is blank.
    pub fn missing_level(&self) -> Option<HierarchyLevel> {
        HierarchyLevel::ALL
            .into_iter()
            .find(|&level| self.label(level).is_none())
    }

    /// The record's label at `level`, or `None` when that field is blank.
    pub fn label(&self, level: HierarchyLevel) -> Option<&str> {
        let value = match level {
            HierarchyLevel::Region => &self.region,
            HierarchyLevel::Group => &self.group,
            HierarchyLevel::District => &self.district,
            HierarchyLevel::Cell => &self.cell_name,
        };
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyLevel {
    Region,
    Group,
    District,
    Cell,
}

impl HierarchyLevel {
    pub const ALL: [HierarchyLevel; 4] = [
        HierarchyLevel::Region,
        HierarchyLevel::Group,
        HierarchyLevel::District,
        HierarchyLevel::Cell,
    ];

    pub fn table(self) -> &'static str {
        match self {
            HierarchyLevel::Region => "cell_trends.regions",
            HierarchyLevel::Group => "cell_trends.groups",
            HierarchyLevel::District => "cell_trends.districts",
            HierarchyLevel::Cell => "cell_trends.cells",
        }
    }
}

impl fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyLevel::Region => write!(f, "region"),
            HierarchyLevel::Group => write!(f, "group"),
            HierarchyLevel::District => write!(f, "district"),
            HierarchyLevel::Cell => write!(f, "cell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendClassification {
    Growth,
    Decline,
    Stagnation,
    Neutral,
}

impl fmt::Display for TrendClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendClassification::Growth => write!(f, "growth"),
            TrendClassification::Decline => write!(f, "decline"),
            TrendClassification::Stagnation => write!(f, "stagnation"),
            TrendClassification::Neutral => write!(f, "neutral"),
        }
    }
}

/// `classification` is `Neutral` exactly when `percent_change` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub percent_change: Option<f64>,
    pub classification: TrendClassification,
}

/// Access scope applied before records reach the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportScope {
    pub region: Option<String>,
    pub group: Option<String>,
    pub district: Option<String>,
}

impl ReportScope {
    pub fn region(name: &str) -> Self {
        Self {
            region: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        fn field_matches(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |wanted| wanted == value)
        }

        field_matches(&self.region, &record.region)
            && field_matches(&self.group, &record.group)
            && field_matches(&self.district, &record.district)
    }

    pub fn label(&self) -> Option<&str> {
        self.district
            .as_deref()
            .or(self.group.as_deref())
            .or(self.region.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct LevelSummary {
    pub name: String,
    pub report_count: usize,
    pub total_present: u64,
    pub bible_study: u64,
    pub miracle_hour: u64,
    pub sunday_service: u64,
    pub avg_attendance: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Demographics {
    pub men: u64,
    pub women: u64,
    pub children: u64,
}

impl Demographics {
    pub fn total(&self) -> u64 {
        self.men + self.women + self.children
    }
}

/// Headline figures for a set of reports. Registered members come from each
/// cell's latest report only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overview {
    pub total_reports: usize,
    pub total_present: u64,
    pub avg_attendance: f64,
    pub new_invitees: u64,
    pub visits_made: u64,
    pub registered_members: u64,
    pub demographics: Demographics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyPoint {
    pub week_start: NaiveDate,
    pub value: u64,
    pub report_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMembers {
    pub region: String,
    pub demographics: Demographics,
}

#[derive(Debug, Clone)]
pub struct HierarchyEntity {
    pub id: Uuid,
    pub level: HierarchyLevel,
    pub name: String,
    pub parent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(region: &str, group: &str) -> AttendanceRecord {
        AttendanceRecord {
            occurred_on: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            total_present: 12,
            region: region.to_string(),
            group: group.to_string(),
            district: "Akpakpa".to_string(),
            cell_name: "Cellule Espoir".to_string(),
            bible_study: 0,
            miracle_hour: 0,
            sunday_service: 0,
            registered_men: 4,
            registered_women: 6,
            registered_children: 2,
            invited_count: 1,
            visits_count: 0,
        }
    }

    #[test]
    fn blank_labels_are_missing() {
        let rec = record("Littoral", "   ");
        assert_eq!(rec.label(HierarchyLevel::Region), Some("Littoral"));
        assert_eq!(rec.label(HierarchyLevel::Group), None);
        assert_eq!(rec.label(HierarchyLevel::Cell), Some("Cellule Espoir"));
        assert_eq!(rec.missing_level(), Some(HierarchyLevel::Group));
        assert_eq!(record("Littoral", "Cotonou Centre").missing_level(), None);
    }

    #[test]
    fn registered_members_add_up_demographics() {
        let rec = record("Littoral", "Cotonou Centre");
        assert_eq!(rec.registered_members(), 12);
        assert_eq!(
            rec.cell_key(),
            ("Littoral", "Cotonou Centre", "Akpakpa", "Cellule Espoir")
        );
    }

    #[test]
    fn scope_filters_on_every_set_field() {
        let rec = record("Littoral", "Cotonou Centre");
        assert!(ReportScope::default().matches(&rec));
        assert!(ReportScope::region("Littoral").matches(&rec));
        assert!(!ReportScope::region("Mono").matches(&rec));

        let scope = ReportScope {
            region: Some("Littoral".to_string()),
            group: Some("Cotonou Nord".to_string()),
            district: None,
        };
        assert!(!scope.matches(&rec));
        assert_eq!(scope.label(), Some("Cotonou Nord"));
    }

    #[test]
    fn classification_serializes_lowercase() {
        let result = TrendResult {
            percent_change: None,
            classification: TrendClassification::Neutral,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"percent_change":null,"classification":"neutral"}"#);
    }
}
