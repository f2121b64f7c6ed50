// Shared conversion helpers used by both deployment converters

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::models::installer::{Attribute, BatchRecord};
use crate::models::{AttributeCounts, BuildHistoryEntry, BuildOutcome};

/// Parse a server timestamp
///
/// Accepts RFC 3339 (with `Z` or an offset) and offset-less ISO forms, which
/// are read as UTC. Empty or unparseable input yields `None`.
pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let s = raw?.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Build duration in whole milliseconds
///
/// Uses the reported duration, else the span between start and end.
pub fn duration_ms(
    reported: Option<f64>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<u64> {
    if let Some(ms) = reported.filter(|v| *v >= 0.0) {
        return Some(ms.round() as u64);
    }
    match (start, end) {
        (Some(start), Some(end)) if end >= start => {
            u64::try_from((end - start).num_milliseconds()).ok()
        }
        _ => None,
    }
}

pub fn count_attributes(attributes: &[Attribute]) -> AttributeCounts {
    attributes
        .iter()
        .fold(AttributeCounts::default(), |mut counts, attr| {
            match attr.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
                Some("key") => counts.keys += 1,
                Some("measure") => counts.measures += 1,
                Some("dimension") => counts.dimensions += 1,
                _ => {}
            }
            counts
        })
}

/// Convert a batch record into a history entry
///
/// Batches that do not name an aggregate are attributed to the cube.
pub fn history_entry(record: BatchRecord, cube_id: &str) -> BuildHistoryEntry {
    let record_cube = record
        .cube_id
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| cube_id.to_string());
    let subject_id = record
        .aggregate_id
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| record_cube.clone());

    BuildHistoryEntry {
        subject_id,
        batch_id: record.id,
        cube_id: record_cube,
        started_at: parse_timestamp(record.start_time.as_deref())
            .or_else(|| parse_timestamp(record.create_date.as_deref())),
        ended_at: parse_timestamp(record.end_time.as_deref()),
        outcome: BuildOutcome::from_server(record.status.as_deref()),
        full_build: record.is_full_build.unwrap_or(false),
        triggered_by: record.triggered_by,
        batch_type: record.batch_type,
        estimate_ms: record.estimate_time,
        instance_build_time: record.sum_of_instance_build_times,
    }
}
