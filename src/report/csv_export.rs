// CSV export of an aggregate listing

use anyhow::Context;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::health::HealthReport;
use crate::models::Aggregate;

const FLAG_SEPARATOR: char = ';';

/// One exported row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvRow {
    pub aggregate_id: String,
    pub aggregate_name: String,
    pub catalog_id: String,
    pub cube_id: String,
    #[serde(rename = "type")]
    pub aggregate_type: Option<String>,
    pub status: String,
    pub rows: Option<u64>,
    pub size_bytes: Option<u64>,
    pub build_duration_ms: Option<u64>,
    pub last_build_time: Option<String>,
    pub last_success_time: Option<String>,
    pub flags: String,
}

impl CsvRow {
    pub fn from_aggregate(agg: &Aggregate, health: Option<&HealthReport>) -> Self {
        let flags = health
            .map(|report| {
                report
                    .flags_for(&agg.id)
                    .iter()
                    .map(|rule| rule.as_str())
                    .collect::<Vec<_>>()
                    .join(&FLAG_SEPARATOR.to_string())
            })
            .unwrap_or_default();

        Self {
            aggregate_id: agg.id.clone(),
            aggregate_name: agg.name.clone(),
            catalog_id: agg.catalog_id.clone(),
            cube_id: agg.cube_id.clone(),
            aggregate_type: agg.aggregate_type.clone(),
            status: agg.status.to_string(),
            rows: agg.row_count,
            size_bytes: agg.size_bytes,
            build_duration_ms: agg.build_duration_ms,
            last_build_time: agg.last_build_at.map(timestamp),
            last_success_time: agg.last_success_at.map(timestamp),
            flags,
        }
    }

    pub fn flag_list(&self) -> Vec<&str> {
        self.flags
            .split(FLAG_SEPARATOR)
            .filter(|f| !f.is_empty())
            .collect()
    }
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `aggregates_<cube>_<YYYYmmdd_HHMMSS>.csv`, keeping only alphanumerics,
/// spaces, `-` and `_` of the cube name
pub fn file_name(cube_name: &str, at: DateTime<Local>) -> String {
    let safe: String = cube_name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    format!(
        "aggregates_{}_{}.csv",
        safe.trim_end(),
        at.format("%Y%m%d_%H%M%S")
    )
}

pub fn write_rows(path: &Path, rows: &[CsvRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write CSV row for {}", row.aggregate_id))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush CSV file: {}", path.display()))?;
    Ok(())
}

pub fn read_rows(path: &Path) -> Result<Vec<CsvRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<CsvRow>, csv::Error>>()
        .with_context(|| format!("Failed to parse CSV file: {}", path.display()))?;
    Ok(rows)
}

/// Write the listing to a timestamped file in `dir` and return its path
pub fn export(
    dir: &Path,
    cube_name: &str,
    aggregates: &[Aggregate],
    health: Option<&HealthReport>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    let path = dir.join(file_name(cube_name, Local::now()));
    let rows: Vec<CsvRow> = aggregates
        .iter()
        .map(|agg| CsvRow::from_aggregate(agg, health))
        .collect();
    write_rows(&path, &rows)?;

    tracing::info!(path = %path.display(), rows = rows.len(), "Exported aggregates to CSV");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{check, HealthThresholds};
    use crate::models::BuildStatus;
    use chrono::TimeZone;

    #[test]
    fn test_file_name() {
        let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            file_name("Sales/Model: v2 (EU)", at),
            "aggregates_SalesModel v2 EU_20260304_050607.csv"
        );
        assert_eq!(file_name("my_cube-1", at), "aggregates_my_cube-1_20260304_050607.csv");
    }

    #[test]
    fn test_export_then_read_back() {
        let now = Utc::now();
        let mut built = Aggregate::new("agg-1", "cat", "cube", BuildStatus::Built);
        built.name = "Sales, by day".to_string();
        built.row_count = Some(1_234);
        built.size_bytes = Some(98_765);
        built.build_duration_ms = Some(45_000);
        built.last_success_at = Some(now - chrono::Duration::days(10));
        built.last_build_at = built.last_success_at;
        let unbuilt = Aggregate::new("agg-2", "cat", "cube", BuildStatus::NeverBuilt);
        let aggregates = vec![built, unbuilt];

        let health = check(&aggregates, None, &HealthThresholds::default(), now);
        let dir = tempfile::tempdir().unwrap();
        let path = export(dir.path(), "Sales", &aggregates, Some(&health)).unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("aggregates_Sales_"));

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].aggregate_id, "agg-1");
        assert_eq!(rows[0].aggregate_name, "Sales, by day");
        assert_eq!(rows[0].rows, Some(1_234));
        assert_eq!(rows[0].size_bytes, Some(98_765));
        assert_eq!(rows[0].flag_list(), vec!["stale", "slow_build"]);
        assert_eq!(rows[1].aggregate_id, "agg-2");
        assert_eq!(rows[1].rows, None);
        assert_eq!(rows[1].flag_list(), vec!["unbuilt"]);
        assert_eq!(rows[1].status, "never_built");
    }

    #[test]
    fn test_export_without_health_has_no_flags() {
        let agg = Aggregate::new("a", "cat", "cube", BuildStatus::Built);
        let row = CsvRow::from_aggregate(&agg, None);
        assert!(row.flag_list().is_empty());
        assert_eq!(row.status, "built");
    }
}
