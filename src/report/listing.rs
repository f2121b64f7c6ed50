// Plain-text tables for catalogs, aggregates and health findings

use std::fmt::Write;

use crate::health::HealthReport;
use crate::models::{Aggregate, Catalog};

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut short: String = value.chars().take(width.saturating_sub(1)).collect();
        short.push('~');
        short
    }
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn render_catalogs(catalogs: &[Catalog]) -> String {
    let mut out = String::new();
    if catalogs.is_empty() {
        let _ = writeln!(out, "No published catalogs");
        return out;
    }
    for catalog in catalogs {
        let _ = writeln!(out, "{}  ({})", catalog.name, catalog.id);
        for cube in &catalog.cubes {
            let _ = writeln!(out, "  - {}  ({})", cube.display_name(), cube.id);
        }
    }
    out
}

pub fn render_aggregates(aggregates: &[Aggregate], health: Option<&HealthReport>) -> String {
    let mut out = String::new();
    if aggregates.is_empty() {
        let _ = writeln!(out, "No aggregates");
        return out;
    }

    let _ = writeln!(
        out,
        "{:<36}  {:<30}  {:<11}  {:>12}  {:>9}  {:<20}  FLAGS",
        "ID", "NAME", "STATUS", "ROWS", "BUILD", "LAST SUCCESS"
    );
    for agg in aggregates {
        let flags = health
            .map(|h| {
                h.flags_for(&agg.id)
                    .iter()
                    .map(|r| r.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{:<36}  {:<30}  {:<11}  {:>12}  {:>9}  {:<20}  {}",
            truncate(&agg.id, 36),
            truncate(&agg.name, 30),
            truncate(agg.status.as_str(), 11),
            or_dash(agg.row_count),
            or_dash(agg.build_duration_ms.map(|ms| format!("{:.1}s", ms as f64 / 1000.0))),
            or_dash(agg.last_success_at.map(|t| t.format("%Y-%m-%d %H:%M"))),
            flags
        );
    }
    let _ = writeln!(out, "\n{} aggregate(s)", aggregates.len());
    out
}

pub fn render_health(report: &HealthReport) -> String {
    let mut out = String::new();
    let s = &report.summary;
    let _ = writeln!(
        out,
        "Health score: {:.1}/100  ({} aggregates, {} healthy; {} critical, {} warning, {} info)",
        report.score, s.total_aggregates, s.healthy, s.critical, s.warning, s.info
    );
    if report.findings.is_empty() {
        let _ = writeln!(out, "No findings");
    }
    for finding in &report.findings {
        let _ = writeln!(
            out,
            "  [{:<8}] {:<16} {}  {}",
            finding.severity.to_string().to_uppercase(),
            finding.rule.as_str(),
            finding.subject_id,
            finding.message
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{check, HealthThresholds};
    use crate::models::{BuildStatus, Cube};
    use chrono::Utc;

    #[test]
    fn test_render_aggregates_with_flags() {
        let mut agg = Aggregate::new("agg-1", "cat", "cube", BuildStatus::NeverBuilt);
        agg.name = "A very long aggregate name that will not fit the column".to_string();
        let aggregates = vec![agg];
        let health = check(&aggregates, None, &HealthThresholds::default(), Utc::now());

        let table = render_aggregates(&aggregates, Some(&health));
        assert!(table.contains("agg-1"));
        assert!(table.contains("unbuilt"));
        assert!(table.contains('~'));
        assert!(table.contains("1 aggregate(s)"));

        let text = render_health(&health);
        assert!(text.contains("[CRITICAL]"));
        assert!(text.contains("Health score: 50.0/100"));
    }

    #[test]
    fn test_render_catalogs() {
        let catalogs = vec![Catalog {
            id: "c1".into(),
            name: "Retail".into(),
            cubes: vec![Cube {
                id: "m1".into(),
                name: "sales".into(),
                caption: Some("Sales".into()),
                catalog_id: "c1".into(),
            }],
        }];
        let text = render_catalogs(&catalogs);
        assert!(text.contains("Retail  (c1)"));
        assert!(text.contains("  - Sales  (m1)"));
        assert_eq!(render_catalogs(&[]), "No published catalogs\n");
    }
}
