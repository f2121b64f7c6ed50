// Aggregate query service
//
// Typed operations over the platform API for both deployment flavours.
// Paginated listings are always returned complete.

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::{Capability, SessionManager};
use crate::config::{ConnectionConfig, InstanceType};
use crate::converters::container_to_domain::{aggregate_from_instance, catalog_from_record};
use crate::converters::core::history_entry;
use crate::converters::installer_to_domain::{aggregate_from_definition, catalog_from_project};
use crate::error::{ApiError, Result};
use crate::http_client::{AggregateHttpClient, ApiRequest};
use crate::models::container::{BatchHistoryPage, CatalogRecord, InstancePage, RebuildRequest};
use crate::models::installer::{AggregatePage, BatchPage, BatchRecord, Envelope, PublishedProject};
use crate::models::{Aggregate, BuildHistoryEntry, Catalog, Cube, CubeTarget, Page};

/// Names used when a headless target cannot be resolved
pub const UNKNOWN_CATALOG: &str = "Unknown Project";
pub const UNKNOWN_CUBE: &str = "Unknown Cube";

/// Tolerated clock difference between this host and the server when matching
/// a triggered rebuild against build history
const CLOCK_SKEW_SECS: i64 = 60;

/// History entries inspected per poll
const POLL_HISTORY_DEPTH: usize = 20;

/// Position of the next page to request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub limit: u32,
    pub offset: u64,
    /// 1-based page number for endpoints paginated by page
    pub page: u64,
    pub token: Option<String>,
}

impl PageCursor {
    fn first(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            offset: 0,
            page: 1,
            token: None,
        }
    }

    fn advance(&mut self, received: usize) {
        self.offset += received as u64;
        self.page += 1;
    }
}

/// Polling behaviour of `wait_for_rebuild`
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// How waiting for a rebuild ended
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The batch stopped; inspect the entry's outcome for the result
    Finished(BuildHistoryEntry),
    TimedOut,
    /// Local polling stopped; the server job keeps running
    Cancelled,
}

/// Acknowledgement of a rebuild trigger
#[derive(Debug, Clone)]
pub struct RebuildReceipt {
    pub catalog_id: String,
    pub cube_id: String,
    pub full_build: bool,
    pub requested_at: DateTime<Utc>,
    /// Batch id when the server returns one
    pub batch_id: Option<String>,
    pub response: Value,
}

pub struct AggregateService {
    http: AggregateHttpClient,
    config: Arc<ConnectionConfig>,
    page_size: u32,
}

impl AggregateService {
    pub fn new(http: AggregateHttpClient, page_size: u32) -> Self {
        let config = Arc::clone(http.sessions().config());
        Self {
            http,
            config,
            page_size: page_size.max(1),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.http.sessions()
    }

    pub fn instance_type(&self) -> InstanceType {
        self.config.instance_type()
    }

    fn org_segment(&self) -> Result<&str> {
        segment(&self.config.organization, "organization")
    }

    // ==============================================================================================
    // Catalogs and cubes
    // ==============================================================================================

    /// All published catalogs with their cubes
    pub async fn list_catalogs(&self) -> Result<Vec<Catalog>> {
        let catalogs = match self.instance_type() {
            InstanceType::Installer => {
                let path = format!("/projects/published/orgId/{}", self.org_segment()?);
                let value = self.call(ApiRequest::get(path)).await?;
                let envelope: Envelope<Vec<PublishedProject>> = decode(value, "catalog list")?;
                envelope
                    .response
                    .into_iter()
                    .map(catalog_from_project)
                    .collect::<Vec<_>>()
            }
            InstanceType::Container => {
                let value = self.call(ApiRequest::get("/v1/catalogs")).await?;
                let records: Vec<CatalogRecord> = decode(unwrap_data(value), "catalog list")?;
                records.into_iter().map(catalog_from_record).collect()
            }
        };

        tracing::debug!(catalogs = catalogs.len(), "Listed catalogs");
        Ok(catalogs)
    }

    /// Cubes of one catalog
    pub async fn list_cubes(&self, catalog_id: &str) -> Result<Vec<Cube>> {
        self.list_catalogs()
            .await?
            .into_iter()
            .find(|c| c.id == catalog_id)
            .map(|c| c.cubes)
            .ok_or_else(|| ApiError::NotFound {
                message: format!("catalog '{}' does not exist", catalog_id),
            })
    }

    /// Every cube of every catalog as a target
    pub async fn list_cube_targets(&self) -> Result<Vec<CubeTarget>> {
        Ok(self
            .list_catalogs()
            .await?
            .into_iter()
            .flat_map(|catalog| {
                let Catalog { id, name, cubes } = catalog;
                cubes.into_iter().map(move |cube| CubeTarget {
                    catalog_id: id.clone(),
                    catalog_name: name.clone(),
                    cube_name: cube.display_name().to_string(),
                    cube_id: cube.id,
                })
            })
            .collect())
    }

    /// Resolve display names for a catalog/cube pair
    ///
    /// Unknown identifiers resolve to placeholder names instead of failing, so
    /// headless runs can still proceed against ids the listing does not show.
    pub async fn find_cube(&self, catalog_id: &str, cube_id: &str) -> Result<CubeTarget> {
        let catalogs = self.list_catalogs().await?;
        let catalog = catalogs.iter().find(|c| c.id == catalog_id);
        let cube = catalog.and_then(|c| c.cubes.iter().find(|m| m.id == cube_id));

        if cube.is_none() {
            tracing::warn!(
                catalog_id = %catalog_id,
                cube_id = %cube_id,
                "Target not found in published catalogs"
            );
        }

        Ok(CubeTarget {
            catalog_id: catalog_id.to_string(),
            catalog_name: catalog
                .map(|c| c.name.clone())
                .unwrap_or_else(|| UNKNOWN_CATALOG.to_string()),
            cube_id: cube_id.to_string(),
            cube_name: cube
                .map(|m| m.display_name().to_string())
                .unwrap_or_else(|| UNKNOWN_CUBE.to_string()),
        })
    }

    // ==============================================================================================
    // Aggregates
    // ==============================================================================================

    /// Complete aggregate listing of one cube, following every page
    pub async fn list_aggregates(&self, catalog_id: &str, cube_id: &str) -> Result<Vec<Aggregate>> {
        segment(catalog_id, "catalog id")?;
        segment(cube_id, "cube id")?;

        let aggregates = collect_pages("aggregates", self.page_size, None, move |cursor| {
            self.fetch_aggregate_page(catalog_id, cube_id, cursor)
        })
        .await?;

        tracing::info!(
            catalog_id = %catalog_id,
            cube_id = %cube_id,
            aggregates = aggregates.len(),
            "Listed aggregates"
        );
        Ok(aggregates)
    }

    async fn fetch_aggregate_page(
        &self,
        catalog_id: &str,
        cube_id: &str,
        cursor: PageCursor,
    ) -> Result<Page<Aggregate>> {
        match self.instance_type() {
            InstanceType::Installer => {
                let request = ApiRequest::get(format!("/aggregates/orgId/{}", self.org_segment()?))
                    .query("limit", cursor.limit)
                    .query("offset", cursor.offset)
                    .query("projectId", catalog_id)
                    .query("cubeId", cube_id);
                let envelope: Envelope<AggregatePage> =
                    decode(self.call(request).await?, "aggregate page")?;
                let page = envelope.response;
                Ok(Page {
                    items: page
                        .data
                        .into_iter()
                        .map(|def| aggregate_from_definition(def, catalog_id, cube_id))
                        .collect(),
                    total: page.total,
                    next_token: None,
                })
            }
            InstanceType::Container => {
                let mut request = ApiRequest::get("/v1/aggregates/instances")
                    .query("catalogId", catalog_id)
                    .query("modelId", cube_id)
                    .query("limit", cursor.limit);
                request = match &cursor.token {
                    Some(token) => request.query("pageToken", token),
                    None => request.query("offset", cursor.offset),
                };
                let page: InstancePage = decode(self.call(request).await?, "aggregate page")?;
                Ok(Page {
                    items: page
                        .data
                        .into_iter()
                        .map(|rec| aggregate_from_instance(rec, catalog_id, cube_id))
                        .collect(),
                    total: page.total,
                    next_token: page.next_page_token,
                })
            }
        }
    }

    /// Aggregate listings for several cubes, fetched with bounded concurrency
    ///
    /// Results keep the order of `targets`.
    pub async fn list_all_aggregates(
        &self,
        targets: &[CubeTarget],
        concurrency: usize,
    ) -> Result<Vec<(CubeTarget, Vec<Aggregate>)>> {
        futures::stream::iter(targets.iter().cloned())
            .map(|target| async move {
                let aggregates = self
                    .list_aggregates(&target.catalog_id, &target.cube_id)
                    .await?;
                Ok::<_, ApiError>((target, aggregates))
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await
    }

    // ==============================================================================================
    // Build history and rebuilds
    // ==============================================================================================

    /// Most recent rebuild batches of a cube, at most `max_entries`
    ///
    /// Container deployments serve this from the private API, which needs the
    /// OAuth client credentials.
    pub async fn get_build_history(
        &self,
        catalog_id: &str,
        cube_id: &str,
        max_entries: usize,
    ) -> Result<Vec<BuildHistoryEntry>> {
        segment(catalog_id, "catalog id")?;
        segment(cube_id, "cube id")?;
        if max_entries == 0 {
            return Ok(Vec::new());
        }

        let limit = self.page_size.min(u32::try_from(max_entries).unwrap_or(u32::MAX));
        let entries = collect_pages("build history", limit, Some(max_entries), move |cursor| {
            self.fetch_history_page(catalog_id, cube_id, cursor)
        })
        .await?;

        tracing::debug!(cube_id = %cube_id, entries = entries.len(), "Fetched build history");
        Ok(entries)
    }

    async fn fetch_history_page(
        &self,
        catalog_id: &str,
        cube_id: &str,
        cursor: PageCursor,
    ) -> Result<Page<BuildHistoryEntry>> {
        let (records, total): (Vec<BatchRecord>, Option<u64>) = match self.instance_type() {
            InstanceType::Installer => {
                let request = ApiRequest::get(format!(
                    "/aggregate-batch/orgId/{}/history",
                    self.org_segment()?
                ))
                .query("limit", cursor.limit)
                .query("offset", cursor.offset)
                .query("projectId", catalog_id)
                .query("cubeId", cube_id);
                let envelope: Envelope<BatchPage> =
                    decode(self.call(request).await?, "build history page")?;
                (envelope.response.data, envelope.response.total)
            }
            InstanceType::Container => {
                let request = ApiRequest::get("/wapi/p/aggregate/batch-history")
                    .query("page", cursor.page)
                    .query("limit", cursor.limit)
                    .query("catalogId", catalog_id)
                    .query("modelId", cube_id)
                    .capability(Capability::PrivateApi);
                let value = self.call(request).await?;
                if value.is_array() {
                    (decode(value, "build history page")?, None)
                } else {
                    let page: BatchHistoryPage = decode(value, "build history page")?;
                    (page.data, page.total)
                }
            }
        };

        Ok(Page {
            items: records
                .into_iter()
                .map(|record| history_entry(record, cube_id))
                .collect(),
            total,
            next_token: None,
        })
    }

    /// Ask the server to rebuild every aggregate of a cube
    ///
    /// Sent once: a trigger that fails after reaching the server is not
    /// repeated, so check the build history before triggering again.
    pub async fn trigger_rebuild(
        &self,
        catalog_id: &str,
        cube_id: &str,
        full_build: bool,
    ) -> Result<RebuildReceipt> {
        let catalog = segment(catalog_id, "catalog id")?;
        let cube = segment(cube_id, "cube id")?;
        let requested_at = Utc::now();

        let request = match self.instance_type() {
            InstanceType::Installer => ApiRequest::post(format!(
                "/aggregate-batch/orgId/{}/projectId/{}",
                self.org_segment()?,
                catalog
            ))
            .query("cubeId", cube)
            .query("isFullBuild", full_build),
            InstanceType::Container => {
                let body = serde_json::to_value(RebuildRequest::default())
                    .map_err(|e| ApiError::Internal(e.into()))?;
                ApiRequest::post(format!(
                    "/v1/aggregates-batch/catalogs/{}/models/{}",
                    catalog, cube
                ))
                .query("isFullBuild", full_build)
                .json(body)
            }
        };

        tracing::info!(
            catalog_id = %catalog_id,
            cube_id = %cube_id,
            full_build = full_build,
            "Triggering aggregate rebuild"
        );
        let response = self.call(request).await?;
        let batch_id = batch_id_of(&response);
        tracing::info!(batch_id = ?batch_id, "Rebuild accepted");

        Ok(RebuildReceipt {
            catalog_id: catalog_id.to_string(),
            cube_id: cube_id.to_string(),
            full_build,
            requested_at,
            batch_id,
            response,
        })
    }

    /// Poll build history until the batch started at or after `since` stops
    ///
    /// Ends early when `cancel` fires or `options.timeout` elapses. Neither
    /// affects the server job.
    pub async fn wait_for_rebuild(
        &self,
        target: &CubeTarget,
        since: DateTime<Utc>,
        options: &PollOptions,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome> {
        let deadline = tokio::time::Instant::now() + options.timeout;
        let threshold = since - chrono::Duration::seconds(CLOCK_SKEW_SECS);
        let mut polls = 0u32;

        loop {
            polls += 1;
            let history = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(cube = %target, "Rebuild polling cancelled");
                    return Ok(WaitOutcome::Cancelled);
                }
                result = self.get_build_history(
                    &target.catalog_id,
                    &target.cube_id,
                    POLL_HISTORY_DEPTH,
                ) => result?,
            };

            let current = history
                .into_iter()
                .filter(|e| e.started_at.is_some_and(|s| s >= threshold))
                .max_by_key(|e| e.started_at);

            match current {
                Some(entry) if entry.outcome.is_finished() => {
                    tracing::info!(
                        cube = %target,
                        outcome = %entry.outcome,
                        polls = polls,
                        "Rebuild finished"
                    );
                    return Ok(WaitOutcome::Finished(entry));
                }
                Some(_) => tracing::debug!(cube = %target, polls = polls, "Rebuild still running"),
                None => {
                    tracing::debug!(cube = %target, polls = polls, "Rebuild not yet in history")
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(cube = %target, polls = polls, "Gave up waiting for rebuild");
                return Ok(WaitOutcome::TimedOut);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(cube = %target, "Rebuild polling cancelled");
                    return Ok(WaitOutcome::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline.min(now + options.interval)) => {}
            }
        }
    }

    async fn call(&self, request: ApiRequest) -> Result<Value> {
        self.http.execute(&request).await.map_err(ApiError::from)
    }
}

/// Drain a paginated listing into one sequence
///
/// Token pagination is followed while the server hands out tokens; otherwise
/// offsets advance until `total` is reached or an empty or short page arrives.
pub async fn collect_pages<T, F, Fut>(
    what: &str,
    limit: u32,
    max_items: Option<usize>,
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(PageCursor) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items: Vec<T> = Vec::new();
    let mut seen_tokens: HashSet<String> = HashSet::new();
    let mut cursor = PageCursor::first(limit);

    loop {
        let page = fetch(cursor.clone()).await?;
        let received = page.items.len();
        items.extend(page.items);

        tracing::debug!(
            what = what,
            offset = cursor.offset,
            page = cursor.page,
            received = received,
            total = ?page.total,
            "Fetched page"
        );

        if max_items.is_some_and(|max| items.len() >= max) {
            break;
        }

        if let Some(token) = page.next_token.filter(|t| !t.is_empty()) {
            if received == 0 {
                return Err(ApiError::ServerError {
                    status: None,
                    message: format!("{} pagination made no progress", what),
                });
            }
            if !seen_tokens.insert(token.clone()) {
                return Err(ApiError::ServerError {
                    status: None,
                    message: format!("{} pagination repeated continuation token '{}'", what, token),
                });
            }
            cursor.advance(received);
            cursor.token = Some(token);
            continue;
        }

        if received == 0 {
            break;
        }
        match page.total {
            Some(total) if items.len() as u64 >= total => break,
            None if received < cursor.limit as usize => break,
            _ => {}
        }
        if cursor.token.is_some() {
            // Token chain ended without a total
            break;
        }
        cursor.advance(received);
    }

    if let Some(max) = max_items {
        items.truncate(max);
    }
    Ok(items)
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ApiError::ServerError {
        status: None,
        message: format!("unexpected {} payload: {}", what, e),
    })
}

/// Unwrap `{"data": [...]}` listings; bare arrays pass through
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_array) => {
            map.remove("data").unwrap_or_default()
        }
        other => other,
    }
}

/// Check an identifier before placing it in a URL path
fn segment<'a>(id: &'a str, what: &str) -> Result<&'a str> {
    if id.trim().is_empty() {
        return Err(ApiError::ValidationError(format!("{} must not be empty", what)));
    }
    if id.chars().any(|c| matches!(c, '/' | '?' | '#' | '%') || c.is_whitespace()) {
        return Err(ApiError::ValidationError(format!(
            "{} '{}' contains characters not allowed in a path",
            what, id
        )));
    }
    Ok(id)
}

fn batch_id_of(response: &Value) -> Option<String> {
    let body = response.get("response").unwrap_or(response);
    ["id", "batchId"]
        .iter()
        .find_map(|key| body.get(*key))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn numbered(range: std::ops::Range<u32>) -> Vec<u32> {
        range.collect()
    }

    #[tokio::test]
    async fn test_offset_pagination_until_total() {
        let cursors = Mutex::new(Vec::new());
        let items = collect_pages("numbers", 2, None, |cursor| {
            cursors.lock().unwrap().push(cursor.offset);
            let start = cursor.offset as u32;
            async move {
                Ok(Page {
                    items: numbered(start..(start + 2).min(5)),
                    total: Some(5),
                    next_token: None,
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![0, 1, 2, 3, 4]);
        assert_eq!(*cursors.lock().unwrap(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_short_page_without_total_ends() {
        let calls = Mutex::new(0);
        let items = collect_pages("numbers", 3, None, |cursor| {
            *calls.lock().unwrap() += 1;
            let start = cursor.offset as u32;
            async move {
                let end = (start + 3).min(7);
                Ok(Page::new(numbered(start..end)))
            }
        })
        .await
        .unwrap();

        assert_eq!(items, numbered(0..7));
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_token_pagination() {
        let items = collect_pages("numbers", 10, None, |cursor| async move {
            let (items, next) = match cursor.token.as_deref() {
                None => (vec![1, 2], Some("t1")),
                Some("t1") => (vec![3], Some("t2")),
                Some("t2") => (vec![4, 5], None),
                Some(other) => panic!("unexpected token {}", other),
            };
            Ok(Page {
                items,
                total: None,
                next_token: next.map(String::from),
            })
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_repeated_token_is_an_error() {
        let result = collect_pages("numbers", 10, None, |_cursor| async move {
            Ok(Page {
                items: vec![1],
                total: None,
                next_token: Some("same".to_string()),
            })
        })
        .await;

        assert!(matches!(result, Err(ApiError::ServerError { .. })));
    }

    #[tokio::test]
    async fn test_empty_page_with_token_is_an_error() {
        let result: Result<Vec<u32>> = collect_pages("numbers", 10, None, |_cursor| async move {
            Ok(Page {
                items: vec![],
                total: None,
                next_token: Some("again".to_string()),
            })
        })
        .await;

        assert!(matches!(result, Err(ApiError::ServerError { .. })));
    }

    #[tokio::test]
    async fn test_empty_page_stops_before_total() {
        let items = collect_pages("numbers", 2, None, |cursor| async move {
            let items = if cursor.offset == 0 { vec![1, 2] } else { vec![] };
            Ok(Page {
                items,
                total: Some(10),
                next_token: None,
            })
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_max_items_truncates() {
        let items = collect_pages("numbers", 4, Some(6), |cursor| {
            let start = cursor.offset as u32;
            async move {
                Ok(Page {
                    items: numbered(start..start + 4),
                    total: Some(100),
                    next_token: None,
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(items, numbered(0..6));
    }

    #[test]
    fn test_segment_validation() {
        assert_eq!(segment("abc-123", "cube id").unwrap(), "abc-123");
        assert!(matches!(segment("", "cube id"), Err(ApiError::ValidationError(_))));
        assert!(matches!(segment("a/b", "cube id"), Err(ApiError::ValidationError(_))));
        assert!(matches!(segment("a b", "cube id"), Err(ApiError::ValidationError(_))));
    }

    #[test]
    fn test_unwrap_data_and_batch_id() {
        assert_eq!(unwrap_data(json!({"data": [1, 2]})), json!([1, 2]));
        assert_eq!(unwrap_data(json!([3])), json!([3]));
        assert_eq!(unwrap_data(json!({"data": "x"})), json!({"data": "x"}));

        assert_eq!(batch_id_of(&json!({"id": "b-1"})).as_deref(), Some("b-1"));
        assert_eq!(batch_id_of(&json!({"response": {"batchId": 42}})).as_deref(), Some("42"));
        assert_eq!(batch_id_of(&Value::Null), None);
    }
}
