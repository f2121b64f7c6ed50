// Aggregate statistics for one cube

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::Aggregate;

/// Aggregate id with the value it was ranked by
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub id: String,
    pub name: String,
    pub value: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateStatistics {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_subtype: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub total_build_ms: u64,
    pub average_build_ms: Option<f64>,
    pub total_rows: u64,
    pub average_rows: Option<f64>,
    pub average_query_utilization: Option<f64>,
    pub fastest_build: Option<Ranked>,
    pub slowest_build: Option<Ranked>,
    pub largest: Option<Ranked>,
    pub smallest: Option<Ranked>,
}

pub fn compute(aggregates: &[Aggregate]) -> AggregateStatistics {
    let mut stats = AggregateStatistics {
        total: aggregates.len(),
        ..Default::default()
    };

    for agg in aggregates {
        *stats
            .by_type
            .entry(label(agg.aggregate_type.as_deref()))
            .or_default() += 1;
        *stats
            .by_subtype
            .entry(label(agg.subtype.as_deref()))
            .or_default() += 1;
        *stats.by_status.entry(agg.status.to_string()).or_default() += 1;
    }

    let durations: Vec<(&Aggregate, u64)> = aggregates
        .iter()
        .filter_map(|a| a.build_duration_ms.map(|d| (a, d)))
        .collect();
    stats.total_build_ms = saturating_total(durations.iter().map(|(_, d)| *d));
    stats.average_build_ms = mean(durations.iter().map(|(_, d)| *d as f64));
    stats.fastest_build = rank(&durations, false);
    stats.slowest_build = rank(&durations, true);

    let rows: Vec<(&Aggregate, u64)> = aggregates
        .iter()
        .filter_map(|a| a.row_count.map(|r| (a, r)))
        .collect();
    stats.total_rows = saturating_total(rows.iter().map(|(_, r)| *r));
    stats.average_rows = mean(rows.iter().map(|(_, r)| *r as f64));
    stats.largest = rank(&rows, true);
    stats.smallest = rank(&rows, false);

    stats.average_query_utilization = mean(aggregates.iter().filter_map(|a| a.query_utilization));

    stats
}

fn label(value: Option<&str>) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Sum of server-reported counts, capped at `u64::MAX`
fn saturating_total(values: impl Iterator<Item = u64>) -> u64 {
    values.fold(0u64, u64::saturating_add)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Highest (or lowest) value; ties go to the smallest id
fn rank(values: &[(&Aggregate, u64)], highest: bool) -> Option<Ranked> {
    values
        .iter()
        .min_by(|(a, x), (b, y)| {
            let by_value = if highest { y.cmp(x) } else { x.cmp(y) };
            by_value.then_with(|| a.id.cmp(&b.id))
        })
        .map(|(agg, value)| Ranked {
            id: agg.id.clone(),
            name: agg.name.clone(),
            value: *value,
        })
}

pub fn render(stats: &AggregateStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Aggregates: {}", stats.total);

    for (title, counts) in [
        ("By type", &stats.by_type),
        ("By subtype", &stats.by_subtype),
        ("By status", &stats.by_status),
    ] {
        let _ = writeln!(out, "\n{}:", title);
        for (key, count) in counts {
            let _ = writeln!(out, "  {:<20} {}", key, count);
        }
    }

    let _ = writeln!(out, "\nBuild time:");
    let _ = writeln!(out, "  total    {:.1}s", stats.total_build_ms as f64 / 1000.0);
    if let Some(avg) = stats.average_build_ms {
        let _ = writeln!(out, "  average  {:.1}s", avg / 1000.0);
    }
    if let Some(r) = &stats.fastest_build {
        let _ = writeln!(out, "  fastest  {} ({:.1}s)", r.name, r.value as f64 / 1000.0);
    }
    if let Some(r) = &stats.slowest_build {
        let _ = writeln!(out, "  slowest  {} ({:.1}s)", r.name, r.value as f64 / 1000.0);
    }

    let _ = writeln!(out, "\nRows:");
    let _ = writeln!(out, "  total    {}", stats.total_rows);
    if let Some(avg) = stats.average_rows {
        let _ = writeln!(out, "  average  {:.0}", avg);
    }
    if let Some(r) = &stats.largest {
        let _ = writeln!(out, "  largest  {} ({} rows)", r.name, r.value);
    }
    if let Some(r) = &stats.smallest {
        let _ = writeln!(out, "  smallest {} ({} rows)", r.name, r.value);
    }

    if let Some(util) = stats.average_query_utilization {
        let _ = writeln!(out, "\nAverage query utilization: {:.2}", util);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BuildStatus;

    fn agg(id: &str, kind: &str, rows: Option<u64>, ms: Option<u64>) -> Aggregate {
        let mut a = Aggregate::new(id, "cat", "cube", BuildStatus::Built);
        a.aggregate_type = Some(kind.to_string());
        a.row_count = rows;
        a.build_duration_ms = ms;
        a
    }

    #[test]
    fn test_compute() {
        let mut failed = agg("c", "user_defined", None, None);
        failed.status = BuildStatus::Failed;
        let aggregates = vec![
            agg("a", "system", Some(100), Some(2_000)),
            agg("b", "system", Some(300), Some(1_000)),
            failed,
        ];

        let stats = compute(&aggregates);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get("system"), Some(&2));
        assert_eq!(stats.by_subtype.get("unknown"), Some(&3));
        assert_eq!(stats.by_status.get("failed"), Some(&1));
        assert_eq!(stats.total_rows, 400);
        assert_eq!(stats.average_rows, Some(200.0));
        assert_eq!(stats.total_build_ms, 3_000);
        assert_eq!(stats.fastest_build.as_ref().unwrap().id, "b");
        assert_eq!(stats.slowest_build.as_ref().unwrap().id, "a");
        assert_eq!(stats.largest.as_ref().unwrap().value, 300);
        assert_eq!(stats.smallest.as_ref().unwrap().id, "a");
        assert_eq!(stats.average_query_utilization, None);
    }

    #[test]
    fn test_totals_saturate() {
        let aggregates = vec![
            agg("a", "system", Some(u64::MAX), Some(u64::MAX)),
            agg("b", "system", Some(5), Some(5)),
        ];

        let stats = compute(&aggregates);
        assert_eq!(stats.total_rows, u64::MAX);
        assert_eq!(stats.total_build_ms, u64::MAX);
        assert_eq!(stats.largest.as_ref().unwrap().id, "a");
    }

    #[test]
    fn test_empty_listing() {
        let stats = compute(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.average_build_ms.is_none());
        assert!(stats.largest.is_none());
        assert!(render(&stats).starts_with("Aggregates: 0"));
    }
}
