use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==================================================================================================
// Catalogs and Cubes
// ==================================================================================================

/// A published catalog (project)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: String,
    pub name: String,
    pub cubes: Vec<Cube>,
}

/// A cube (model) inside exactly one catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cube {
    pub id: String,
    pub name: String,
    pub caption: Option<String>,
    pub catalog_id: String,
}

impl Cube {
    /// Caption when set, name otherwise
    pub fn display_name(&self) -> &str {
        self.caption
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.name)
    }
}

/// A rebuild or report target: one cube with its catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CubeTarget {
    pub catalog_id: String,
    pub catalog_name: String,
    pub cube_id: String,
    pub cube_name: String,
}

impl fmt::Display for CubeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.catalog_name, self.cube_name)
    }
}

// ==================================================================================================
// Aggregates
// ==================================================================================================

/// Build state of an aggregate as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStatus {
    NeverBuilt,
    Built,
    Building,
    Failed,
    /// Unrecognised server status, kept verbatim (lowercased)
    Other(String),
}

impl BuildStatus {
    pub fn from_server(raw: Option<&str>) -> Self {
        let raw = raw.map(|s| s.trim().to_ascii_lowercase()).unwrap_or_default();
        match raw.as_str() {
            "" | "never_built" | "unbuilt" | "none" => BuildStatus::NeverBuilt,
            "active" | "built" => BuildStatus::Built,
            "building" | "running" | "in_progress" | "pending" | "queued" => BuildStatus::Building,
            "failed" | "failure" | "error" => BuildStatus::Failed,
            _ => BuildStatus::Other(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BuildStatus::NeverBuilt => "never_built",
            BuildStatus::Built => "built",
            BuildStatus::Building => "building",
            BuildStatus::Failed => "failed",
            BuildStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of attributes per role in an aggregate definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeCounts {
    pub keys: usize,
    pub measures: usize,
    pub dimensions: usize,
}

/// Snapshot of one aggregate as returned by a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub id: String,
    pub name: String,
    pub catalog_id: String,
    pub cube_id: String,
    pub aggregate_type: Option<String>,
    pub subtype: Option<String>,
    pub status: BuildStatus,
    /// Server message for the latest build, usually the failure reason
    pub status_message: Option<String>,
    pub row_count: Option<u64>,
    pub size_bytes: Option<u64>,
    pub last_build_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub build_duration_ms: Option<u64>,
    pub query_utilization: Option<f64>,
    pub most_recent_query: Option<DateTime<Utc>>,
    pub table_name: Option<String>,
    pub table_schema: Option<String>,
    pub batch_id: Option<String>,
    pub connection_id: Option<String>,
    pub attributes: AttributeCounts,
}

impl Aggregate {
    /// Minimal aggregate with every optional field unset
    pub fn new(
        id: impl Into<String>,
        catalog_id: impl Into<String>,
        cube_id: impl Into<String>,
        status: BuildStatus,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            catalog_id: catalog_id.into(),
            cube_id: cube_id.into(),
            aggregate_type: None,
            subtype: None,
            status,
            status_message: None,
            row_count: None,
            size_bytes: None,
            last_build_at: None,
            last_success_at: None,
            build_duration_ms: None,
            query_utilization: None,
            most_recent_query: None,
            table_name: None,
            table_schema: None,
            batch_id: None,
            connection_id: None,
            attributes: AttributeCounts::default(),
        }
    }

    /// True when no build of this aggregate is known to have succeeded
    ///
    /// An aggregate that is building for the first time is not counted.
    pub fn never_successfully_built(&self) -> bool {
        self.last_success_at.is_none()
            && !matches!(self.status, BuildStatus::Built | BuildStatus::Building)
    }
}

// ==================================================================================================
// Build History
// ==================================================================================================

/// Result of a rebuild batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildOutcome {
    Success,
    Failure,
    Partial,
    Running,
    Other(String),
}

impl BuildOutcome {
    pub fn from_server(raw: Option<&str>) -> Self {
        let raw = raw.map(|s| s.trim().to_ascii_lowercase()).unwrap_or_default();
        match raw.as_str() {
            "done" | "success" | "succeeded" | "completed" | "complete" | "active" => {
                BuildOutcome::Success
            }
            "failed" | "failure" | "error" => BuildOutcome::Failure,
            "partial" | "partially_failed" | "partial_success" => BuildOutcome::Partial,
            "running" | "building" | "in_progress" | "pending" | "queued" => BuildOutcome::Running,
            _ => BuildOutcome::Other(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BuildOutcome::Success => "success",
            BuildOutcome::Failure => "failure",
            BuildOutcome::Partial => "partial",
            BuildOutcome::Running => "running",
            BuildOutcome::Other(s) => s,
        }
    }

    /// The batch has stopped, whatever the result
    pub fn is_finished(&self) -> bool {
        !matches!(self, BuildOutcome::Running)
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rebuild batch from the build history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildHistoryEntry {
    /// Aggregate id when the server reports one, the cube id for cube-wide batches
    pub subject_id: String,
    pub batch_id: Option<String>,
    pub cube_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: BuildOutcome,
    pub full_build: bool,
    pub triggered_by: Option<String>,
    pub batch_type: Option<String>,
    pub estimate_ms: Option<u64>,
    /// Summed instance build time as reported, e.g. `PT3.232S`
    pub instance_build_time: Option<String>,
}

impl BuildHistoryEntry {
    pub fn new(subject_id: impl Into<String>, outcome: BuildOutcome) -> Self {
        let subject_id = subject_id.into();
        Self {
            cube_id: subject_id.clone(),
            subject_id,
            batch_id: None,
            started_at: None,
            ended_at: None,
            outcome,
            full_build: false,
            triggered_by: None,
            batch_type: None,
            estimate_ms: None,
            instance_build_time: None,
        }
    }

    /// Wall-clock duration of a finished batch
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

// ==================================================================================================
// Pagination
// ==================================================================================================

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of items across all pages, when reported
    pub total: Option<u64>,
    /// Continuation token for the next page, when the server uses them
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            total: None,
            next_token: None,
        }
    }
}
