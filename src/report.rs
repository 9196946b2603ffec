use std::fmt::Write;

use crate::models::{AttendanceRecord, HierarchyLevel, Overview, TrendClassification, TrendResult};
use crate::summary;
use crate::trends::{self, DrillDown, TrendWindow};

/// Short badge for a trend: arrow plus rounded percentage.
pub fn trend_badge(trend: Option<&TrendResult>) -> String {
    let Some(trend) = trend else {
        return "n/a".to_string();
    };
    let Some(change) = trend.percent_change else {
        return "n/a".to_string();
    };
    let icon = match trend.classification {
        TrendClassification::Growth => "▲",
        TrendClassification::Decline => "▼",
        _ => "–",
    };
    format!("{icon} {change:.0}%")
}

fn write_ranked(output: &mut String, title: &str, ranked: &[(String, TrendResult)]) {
    let _ = writeln!(output, "### {title}");
    if ranked.is_empty() {
        let _ = writeln!(output, "None.");
        return;
    }
    for (name, trend) in ranked {
        let _ = writeln!(output, "- {} ({})", name, trend_badge(Some(trend)));
    }
}

pub fn write_drill_down(output: &mut String, drill: &DrillDown) {
    let _ = writeln!(output, "## Drill-down: {}", drill.region);
    if drill.is_empty() {
        let _ = writeln!(output, "No struggling or stagnating units in this region.");
        return;
    }
    write_ranked(output, "Groups in decline or stagnation", &drill.groups);
    write_ranked(output, "Districts in decline or stagnation", &drill.districts);
    write_ranked(output, "Cells in decline or stagnation", &drill.cells);
}

pub fn write_overview(output: &mut String, overview: &Overview) {
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Reports: {}", overview.total_reports);
    let _ = writeln!(
        output,
        "- Attendance: {} present, {:.0} per report",
        overview.total_present, overview.avg_attendance
    );
    let _ = writeln!(output, "- New invitees: {}", overview.new_invitees);
    let _ = writeln!(output, "- Visits made: {}", overview.visits_made);
    let demographics = &overview.demographics;
    let _ = writeln!(
        output,
        "- Registered members: {} (men {}, women {}, children {})",
        overview.registered_members, demographics.men, demographics.women, demographics.children
    );
}

pub fn write_weekly(output: &mut String, records: &[AttendanceRecord]) {
    let attendance = summary::weekly_series(records, |r| r.total_present);
    let visits = summary::weekly_series(records, |r| r.visits_count);

    let _ = writeln!(output, "## Weekly Attendance");
    if attendance.is_empty() {
        let _ = writeln!(output, "No reports recorded for this window.");
        return;
    }
    // Both series are keyed by the same weeks of the same records.
    for (present, visited) in attendance.iter().zip(visits.iter()) {
        let _ = writeln!(
            output,
            "- Week of {}: {} present, {} visits ({} reports)",
            present.week_start, present.value, visited.value, present.report_count
        );
    }
}

pub fn build_report(
    scope: Option<&str>,
    window: &TrendWindow,
    records: &[AttendanceRecord],
) -> String {
    let regional = trends::compute_trends(records, window, Some(HierarchyLevel::Region));
    let zones = trends::zones(&regional);
    let summaries = summary::summarize_by_level(records, HierarchyLevel::Region);
    let overview = summary::overview(records);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all regions");

    let _ = writeln!(output, "# Cell Attendance Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} weeks from {} to {})",
        scope_label,
        window.weeks(),
        window.start_date(),
        window.as_of()
    );
    let _ = writeln!(output);
    write_overview(&mut output, &overview);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Trend Panel");

    if zones.is_empty() {
        let _ = writeln!(output, "No region in decline or stagnation.");
    } else {
        let _ = writeln!(output, "### Red zones (decline)");
        if zones.red.is_empty() {
            let _ = writeln!(output, "None.");
        }
        for (region, change) in zones.red.iter() {
            let _ = writeln!(output, "- {} ({:.0}%)", region, change);
        }
        let _ = writeln!(output, "### Orange zones (stagnation)");
        if zones.orange.is_empty() {
            let _ = writeln!(output, "None.");
        }
        for (region, change) in zones.orange.iter() {
            let _ = writeln!(output, "- {} ({:.0}%)", region, change);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance by Region");

    if summaries.is_empty() {
        let _ = writeln!(output, "No reports recorded for this window.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} reports, {} present (avg {:.1}), bible study {}, miracle hour {}, sunday service {} [{}]",
                summary.name,
                summary.report_count,
                summary.total_present,
                summary.avg_attendance,
                summary.bible_study,
                summary.miracle_hour,
                summary.sunday_service,
                trend_badge(regional.get(&summary.name))
            );
        }
    }

    let _ = writeln!(output);
    write_weekly(&mut output, records);

    for (region, _) in zones.red.iter().chain(zones.orange.iter()) {
        let drill = trends::drill_down(records, region, window);
        let _ = writeln!(output);
        write_drill_down(&mut output, &drill);
    }

    output
}
