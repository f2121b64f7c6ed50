// Wire formats of the container deployment API (camelCase, no envelope)

use serde::{Deserialize, Serialize};

use super::installer::BatchRecord;
use super::lenient;

// ==================================================================================================
// Catalogs
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

// ==================================================================================================
// Aggregate Instances
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePage {
    #[serde(default)]
    pub data: Vec<InstanceRecord>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub total: Option<u64>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub offset: Option<u64>,
    #[serde(default, alias = "continuationToken")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub id: String,
    #[serde(default)]
    pub definition_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub aggregate_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub catalog_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub table_schema: Option<String>,
    #[serde(default)]
    pub build_query_id: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub stats: Option<InstanceStatsRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatsRecord {
    #[serde(default)]
    pub materialization_start_time: Option<String>,
    #[serde(default)]
    pub materialization_end_time: Option<String>,
    /// Milliseconds
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub build_duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub number_of_rows: Option<u64>,
    #[serde(default, alias = "size", deserialize_with = "lenient::u64_opt")]
    pub size_in_bytes: Option<u64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub query_utilization: Option<f64>,
    #[serde(default)]
    pub most_recent_query: Option<String>,
}

// ==================================================================================================
// Build History (private API)
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchHistoryPage {
    #[serde(default)]
    pub data: Vec<BatchRecord>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub total: Option<u64>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub page: Option<u64>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub limit: Option<u64>,
}

// ==================================================================================================
// Rebuild
// ==================================================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildRequest {
    pub grace_period_overrides: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_page_with_token() {
        let page: InstancePage = serde_json::from_value(json!({
            "data": [{
                "id": "i-1",
                "definitionId": "d-1",
                "status": "active",
                "stats": {"numberOfRows": 10, "buildDuration": 2500}
            }],
            "total": 5,
            "continuationToken": "abc"
        }))
        .unwrap();

        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
        assert_eq!(page.data[0].definition_id.as_deref(), Some("d-1"));
        assert_eq!(
            page.data[0].stats.as_ref().unwrap().number_of_rows,
            Some(10)
        );
    }

    #[test]
    fn test_rebuild_request_body() {
        let body = serde_json::to_value(RebuildRequest::default()).unwrap();
        assert_eq!(body, json!({"gracePeriodOverrides": {}}));
    }
}
