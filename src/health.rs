// Aggregate health checks
//
// Pure analysis over an already fetched listing and, optionally, the build
// history of the same cube. No I/O happens here.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::models::{Aggregate, BuildHistoryEntry, BuildOutcome, BuildStatus};

/// Limits the rules compare against
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Age of the last successful build beyond which an aggregate is stale
    pub stale_after: Duration,
    /// Multiple of the listing median above which an aggregate is oversized
    pub oversize_factor: f64,
    /// Build duration above which a build is reported as slow
    pub slow_build: Duration,
    /// Age of the most recent query beyond which an aggregate is idle
    pub idle_after: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            stale_after: Duration::days(7),
            oversize_factor: 10.0,
            slow_build: Duration::seconds(30),
            idle_after: Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Unbuilt,
    RepeatedFailure,
    Stale,
    Empty,
    Unused,
    Idle,
    Oversized,
    SlowBuild,
}

impl Rule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::Unbuilt => "unbuilt",
            Rule::RepeatedFailure => "repeated_failure",
            Rule::Stale => "stale",
            Rule::Empty => "empty",
            Rule::Unused => "unused",
            Rule::Idle => "idle",
            Rule::Oversized => "oversized",
            Rule::SlowBuild => "slow_build",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Rule::Unbuilt | Rule::RepeatedFailure => Severity::Critical,
            Rule::Stale | Rule::Empty | Rule::Unused | Rule::Idle => Severity::Warning,
            Rule::Oversized | Rule::SlowBuild => Severity::Info,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub rule: Rule,
    /// Aggregate id, or cube id for cube-wide build failures
    pub subject_id: String,
    pub message: String,
}

impl Finding {
    fn new(rule: Rule, subject_id: &str, message: String) -> Self {
        Self {
            severity: rule.severity(),
            rule,
            subject_id: subject_id.to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total_aggregates: usize,
    pub healthy: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub findings: Vec<Finding>,
    pub summary: HealthSummary,
    /// 0-100, lowered by subjects with critical and warning findings
    pub score: f64,
}

impl HealthReport {
    /// Rules that fired for one subject, in report order
    pub fn flags_for(&self, subject_id: &str) -> Vec<Rule> {
        self.findings
            .iter()
            .filter(|f| f.subject_id == subject_id)
            .map(|f| f.rule)
            .collect()
    }
}

/// Run every rule over the listing and history
pub fn check(
    aggregates: &[Aggregate],
    history: Option<&[BuildHistoryEntry]>,
    thresholds: &HealthThresholds,
    now: DateTime<Utc>,
) -> HealthReport {
    let mut findings = Vec::new();

    let row_median = median(aggregates.iter().filter_map(|a| a.row_count));
    let size_median = median(aggregates.iter().filter_map(|a| a.size_bytes));

    for agg in aggregates {
        if agg.never_successfully_built() {
            findings.push(Finding::new(
                Rule::Unbuilt,
                &agg.id,
                format!("never built successfully (status: {})", agg.status),
            ));
        }

        if let Some(last_success) = agg.last_success_at {
            let age = now - last_success;
            if age > thresholds.stale_after {
                findings.push(Finding::new(
                    Rule::Stale,
                    &agg.id,
                    format!("last successful build {} days ago", age.num_days()),
                ));
            }
        }

        if agg.status == BuildStatus::Built && agg.row_count == Some(0) {
            findings.push(Finding::new(
                Rule::Empty,
                &agg.id,
                "built but contains no rows".to_string(),
            ));
        }

        // Only a reported zero counts; servers that omit utilization are not flagged
        if agg.status == BuildStatus::Built
            && agg.query_utilization == Some(0.0)
            && agg.most_recent_query.is_none()
        {
            findings.push(Finding::new(
                Rule::Unused,
                &agg.id,
                "no query utilization".to_string(),
            ));
        }

        if let Some(last_query) = agg.most_recent_query {
            let idle = now - last_query;
            if idle > thresholds.idle_after {
                findings.push(Finding::new(
                    Rule::Idle,
                    &agg.id,
                    format!("last query {} days ago", idle.num_days()),
                ));
            }
        }

        let factor = thresholds.oversize_factor;
        let oversize: Vec<String> = [
            exceeds("rows", agg.row_count, row_median, factor),
            exceeds("bytes", agg.size_bytes, size_median, factor),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !oversize.is_empty() {
            findings.push(Finding::new(Rule::Oversized, &agg.id, oversize.join("; ")));
        }

        if let Some(ms) = agg.build_duration_ms {
            let slow_ms = u64::try_from(thresholds.slow_build.num_milliseconds()).unwrap_or(0);
            if ms > slow_ms {
                findings.push(Finding::new(
                    Rule::SlowBuild,
                    &agg.id,
                    format!("last build took {:.1}s", ms as f64 / 1000.0),
                ));
            }
        }
    }

    if let Some(history) = history {
        for (subject, failures) in failure_runs(history) {
            if failures >= 2 {
                findings.push(Finding::new(
                    Rule::RepeatedFailure,
                    subject,
                    format!("{} consecutive failed builds since the last success", failures),
                ));
            }
        }
    }

    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.subject_id.cmp(&b.subject_id))
            .then_with(|| a.rule.cmp(&b.rule))
            .then_with(|| a.message.cmp(&b.message))
    });

    let summary = summarize(aggregates, &findings);
    let score = score(&findings, aggregates.len());

    tracing::debug!(
        aggregates = aggregates.len(),
        findings = findings.len(),
        score = score,
        "Health check complete"
    );

    HealthReport {
        findings,
        summary,
        score,
    }
}

/// Median of the values, `None` when empty
fn median(values: impl Iterator<Item = u64>) -> Option<f64> {
    let mut values: Vec<u64> = values.collect();
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] as f64 + values[mid] as f64) / 2.0
    } else {
        values[mid] as f64
    })
}

fn exceeds(unit: &str, value: Option<u64>, median: Option<f64>, factor: f64) -> Option<String> {
    let value = value? as f64;
    let median = median.filter(|m| *m > 0.0)?;
    (value > factor * median).then(|| {
        format!(
            "{:.0} {} is {:.1}x the median of {:.0}",
            value,
            unit,
            value / median,
            median
        )
    })
}

/// Failures since the last success, per subject
///
/// Entries are walked newest first by start time. Entries without one keep
/// the server's newest-first listing order, behind the timed ones. Running,
/// partial and unknown outcomes neither extend nor break a run.
fn failure_runs(history: &[BuildHistoryEntry]) -> BTreeMap<&str, usize> {
    let mut by_subject: BTreeMap<&str, Vec<&BuildHistoryEntry>> = BTreeMap::new();
    for entry in history {
        by_subject.entry(entry.subject_id.as_str()).or_default().push(entry);
    }

    by_subject
        .into_iter()
        .map(|(subject, mut entries)| {
            entries.sort_by_key(|e| std::cmp::Reverse(e.started_at));
            let failures = entries
                .iter()
                .take_while(|e| e.outcome != BuildOutcome::Success)
                .filter(|e| e.outcome == BuildOutcome::Failure)
                .count();
            (subject, failures)
        })
        .collect()
}

fn summarize(aggregates: &[Aggregate], findings: &[Finding]) -> HealthSummary {
    let flagged: HashSet<&str> = findings.iter().map(|f| f.subject_id.as_str()).collect();
    HealthSummary {
        total_aggregates: aggregates.len(),
        healthy: aggregates
            .iter()
            .filter(|a| !flagged.contains(a.id.as_str()))
            .count(),
        critical: count(findings, Severity::Critical),
        warning: count(findings, Severity::Warning),
        info: count(findings, Severity::Info),
    }
}

fn count(findings: &[Finding], severity: Severity) -> usize {
    findings.iter().filter(|f| f.severity == severity).count()
}

/// `100 - issues/total*50 - warnings/total*25`, floored at 0
///
/// Issues and warnings count distinct subjects, not findings.
fn score(findings: &[Finding], total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let subjects = |severity: Severity| {
        findings
            .iter()
            .filter(|f| f.severity == severity)
            .map(|f| f.subject_id.as_str())
            .collect::<HashSet<_>>()
            .len() as f64
    };
    let total = total as f64;
    let score = 100.0 - subjects(Severity::Critical) / total * 50.0
        - subjects(Severity::Warning) / total * 25.0;
    score.max(0.0)
}
