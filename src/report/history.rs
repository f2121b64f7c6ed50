// Build history summary

use chrono::Duration;
use std::fmt::Write;

use crate::models::{BuildHistoryEntry, BuildOutcome};

/// Entries shown in the recent timeline
const RECENT_ENTRIES: usize = 10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub running: usize,
    pub full_builds: usize,
    pub average_duration: Option<Duration>,
    pub shortest: Option<Duration>,
    pub longest: Option<Duration>,
    /// Newest first
    pub recent: Vec<BuildHistoryEntry>,
}

/// Parse an ISO 8601 duration such as `PT3.232S` or `P1DT2H`
pub fn parse_iso_duration(raw: &str) -> Option<Duration> {
    let rest = raw.trim().strip_prefix('P')?;
    let (date, time) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };
    if date.is_empty() && time.map_or(true, str::is_empty) {
        return None;
    }

    let mut millis = 0f64;
    let mut parse_part = |part: &str, units: &[(char, f64)]| -> Option<()> {
        let mut number = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                continue;
            }
            let scale = units.iter().find(|(unit, _)| *unit == c)?.1;
            let value: f64 = number.parse().ok()?;
            millis += value * scale;
            number.clear();
        }
        number.is_empty().then_some(())
    };

    parse_part(date, &[('W', 604_800_000.0), ('D', 86_400_000.0)])?;
    if let Some(time) = time {
        parse_part(time, &[('H', 3_600_000.0), ('M', 60_000.0), ('S', 1_000.0)])?;
    }
    // The cast saturates; anything beyond chrono's range is clamped to it
    Some(Duration::try_milliseconds(millis.round() as i64).unwrap_or(Duration::MAX))
}

/// Duration of one batch: wall clock when known, else summed instance build time
pub fn entry_duration(entry: &BuildHistoryEntry) -> Option<Duration> {
    entry.duration().or_else(|| {
        entry
            .instance_build_time
            .as_deref()
            .and_then(parse_iso_duration)
    })
}

pub fn summarize(entries: &[BuildHistoryEntry]) -> HistorySummary {
    let durations: Vec<Duration> = entries
        .iter()
        .filter(|e| e.outcome.is_finished())
        .filter_map(entry_duration)
        .collect();

    let mut recent = entries.to_vec();
    recent.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    recent.truncate(RECENT_ENTRIES);

    HistorySummary {
        total: entries.len(),
        successful: count(entries, |o| *o == BuildOutcome::Success),
        failed: count(entries, |o| *o == BuildOutcome::Failure),
        running: count(entries, |o| *o == BuildOutcome::Running),
        full_builds: entries.iter().filter(|e| e.full_build).count(),
        average_duration: (!durations.is_empty()).then(|| {
            let total: i128 = durations.iter().map(|d| i128::from(d.num_milliseconds())).sum();
            let average = total / durations.len() as i128;
            i64::try_from(average)
                .ok()
                .and_then(Duration::try_milliseconds)
                .unwrap_or(Duration::MAX)
        }),
        shortest: durations.iter().min().copied(),
        longest: durations.iter().max().copied(),
        recent,
    }
}

fn count(entries: &[BuildHistoryEntry], pred: impl Fn(&BuildOutcome) -> bool) -> usize {
    entries.iter().filter(|e| pred(&e.outcome)).count()
}

fn seconds(d: Duration) -> String {
    format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0)
}

pub fn render(summary: &HistorySummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Batches: {} (successful {}, failed {}, running {}, full builds {})",
        summary.total, summary.successful, summary.failed, summary.running, summary.full_builds
    );
    if let (Some(avg), Some(min), Some(max)) =
        (summary.average_duration, summary.shortest, summary.longest)
    {
        let _ = writeln!(
            out,
            "Duration: average {}, shortest {}, longest {}",
            seconds(avg),
            seconds(min),
            seconds(max)
        );
    }

    if !summary.recent.is_empty() {
        let _ = writeln!(out, "\nRecent batches:");
    }
    for entry in &summary.recent {
        let started = entry
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "  {:<19}  {:<8}  {:<11}  {:>9}  {}",
            started,
            entry.outcome.as_str(),
            if entry.full_build { "full" } else { "incremental" },
            entry_duration(entry).map(seconds).unwrap_or_else(|| "-".to_string()),
            entry.triggered_by.as_deref().unwrap_or("")
        );
    }
    out
}
