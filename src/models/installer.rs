// Wire formats of the installer deployment API
//
// Every response is wrapped in a `{"response": ...}` envelope. Aggregate
// records use snake_case, batch records camelCase.

use serde::{Deserialize, Serialize};

use super::lenient;

// ==================================================================================================
// Envelope
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub response: T,
}

// ==================================================================================================
// Projects
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedProject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cubes: Vec<PublishedCube>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedCube {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

// ==================================================================================================
// Aggregates
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatePage {
    #[serde(default)]
    pub data: Vec<AggregateDefinition>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub total: Option<u64>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub aggregate_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default, alias = "projectId")]
    pub project_id: Option<String>,
    #[serde(default, alias = "cubeId")]
    pub cube_id: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub stats: Option<DefinitionStats>,
    #[serde(default)]
    pub latest_instance: Option<Instance>,
    #[serde(default)]
    pub active_instance: Option<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionStats {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub average_build_duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub query_utilization: Option<f64>,
    #[serde(default)]
    pub most_recent_query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub table_schema: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub stats: Option<InstanceStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceStats {
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
    pub size_bytes: Option<u64>,
}

// ==================================================================================================
// Build History
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPage {
    #[serde(default)]
    pub data: Vec<BatchRecord>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub total: Option<u64>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub offset: Option<u64>,
}

/// Rebuild batch record, shared by both deployment flavours
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub is_full_build: Option<bool>,
    #[serde(default)]
    pub batch_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::u64_opt")]
    pub estimate_time: Option<u64>,
    #[serde(default)]
    pub sum_of_instance_build_times: Option<String>,
    #[serde(default)]
    pub create_date: Option<String>,
    #[serde(default, alias = "definitionId")]
    pub aggregate_id: Option<String>,
    #[serde(default, alias = "modelId")]
    pub cube_id: Option<String>,
    #[serde(default, alias = "createdBy", alias = "user")]
    pub triggered_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aggregate_page_deserializes() {
        let body = json!({
            "response": {
                "data": [{
                    "id": "agg-1",
                    "name": "Sales by Day",
                    "type": "system",
                    "subtype": "query_based",
                    "attributes": [{"type": "key"}, {"type": "measure"}],
                    "stats": {"query_utilization": 12, "most_recent_query": "2026-10-01T10:00:00Z"},
                    "latest_instance": {
                        "id": "inst-1",
                        "status": "active",
                        "stats": {"build_duration": 1500.0, "number_of_rows": "420"}
                    }
                }],
                "total": 1,
                "limit": 200,
                "offset": 0
            }
        });

        let page: Envelope<AggregatePage> = serde_json::from_value(body).unwrap();
        let def = &page.response.data[0];
        assert_eq!(def.aggregate_type.as_deref(), Some("system"));
        assert_eq!(def.attributes.len(), 2);
        let stats = def.latest_instance.as_ref().unwrap().stats.as_ref().unwrap();
        assert_eq!(stats.number_of_rows, Some(420));
        assert_eq!(stats.build_duration, Some(1500.0));
        assert_eq!(page.response.total, Some(1));
    }

    #[test]
    fn test_batch_record_aliases() {
        let record: BatchRecord = serde_json::from_value(json!({
            "id": "b1",
            "status": "failed",
            "startTime": "2026-10-01T10:00:00Z",
            "isFullBuild": true,
            "definitionId": "agg-9",
            "createdBy": "admin"
        }))
        .unwrap();
        assert_eq!(record.aggregate_id.as_deref(), Some("agg-9"));
        assert_eq!(record.triggered_by.as_deref(), Some("admin"));
        assert_eq!(record.is_full_build, Some(true));
    }
}
