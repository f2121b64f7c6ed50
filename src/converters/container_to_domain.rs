// Container wire format → domain conversion

use crate::models::container::{CatalogRecord, InstanceRecord};
use crate::models::{Aggregate, AttributeCounts, BuildStatus, Catalog, Cube};

use super::core::{duration_ms, parse_timestamp};

pub fn catalog_from_record(record: CatalogRecord) -> Catalog {
    let catalog_id = record.id;
    let cubes = record
        .models
        .into_iter()
        .map(|model| Cube {
            name: model.name.unwrap_or_else(|| model.id.clone()),
            id: model.id,
            caption: model.caption,
            catalog_id: catalog_id.clone(),
        })
        .collect();

    Catalog {
        name: record.name.unwrap_or_else(|| catalog_id.clone()),
        id: catalog_id,
        cubes,
    }
}

/// Convert one aggregate instance
///
/// The aggregate is identified by its definition id; the instance id is the
/// fallback when the definition is not reported.
pub fn aggregate_from_instance(
    record: InstanceRecord,
    catalog_id: &str,
    cube_id: &str,
) -> Aggregate {
    let status = BuildStatus::from_server(record.status.as_deref());
    let stats = record.stats.unwrap_or_default();
    let started = parse_timestamp(stats.materialization_start_time.as_deref());
    let ended = parse_timestamp(stats.materialization_end_time.as_deref());

    let id = record
        .definition_id
        .filter(|d| !d.is_empty())
        .unwrap_or(record.id);

    Aggregate {
        name: record.name.unwrap_or_else(|| id.clone()),
        catalog_id: record
            .catalog_id
            .unwrap_or_else(|| catalog_id.to_string()),
        cube_id: record.model_id.unwrap_or_else(|| cube_id.to_string()),
        aggregate_type: record.aggregate_type,
        subtype: record.subtype,
        status_message: record.message,
        row_count: stats.number_of_rows,
        size_bytes: stats.size_in_bytes,
        last_build_at: ended.or(started),
        last_success_at: if status == BuildStatus::Built {
            ended.or(started)
        } else {
            None
        },
        build_duration_ms: duration_ms(stats.build_duration, started, ended),
        query_utilization: stats.query_utilization,
        most_recent_query: parse_timestamp(stats.most_recent_query.as_deref()),
        table_name: record.table_name,
        table_schema: record.table_schema,
        batch_id: record.batch_id.or(record.build_query_id),
        connection_id: record.connection_id,
        attributes: AttributeCounts::default(),
        status,
        id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalog_models_become_cubes() {
        let record: CatalogRecord = serde_json::from_value(json!({
            "id": "cat-1",
            "name": "Retail",
            "models": [{"id": "m-1", "name": "sales", "caption": "Sales"}]
        }))
        .unwrap();

        let catalog = catalog_from_record(record);
        assert_eq!(catalog.cubes[0].display_name(), "Sales");
        assert_eq!(catalog.cubes[0].catalog_id, "cat-1");
    }

    #[test]
    fn test_instance_conversion() {
        let record: InstanceRecord = serde_json::from_value(json!({
            "id": "inst-1",
            "definitionId": "def-1",
            "status": "active",
            "tableName": "agg_def_1",
            "buildQueryId": "q-9",
            "stats": {
                "materializationStartTime": "2026-10-01T10:00:00Z",
                "materializationEndTime": "2026-10-01T10:01:00Z",
                "numberOfRows": 77
            }
        }))
        .unwrap();

        let agg = aggregate_from_instance(record, "cat-1", "m-1");
        assert_eq!(agg.id, "def-1");
        assert_eq!(agg.status, BuildStatus::Built);
        assert_eq!(agg.row_count, Some(77));
        assert_eq!(agg.build_duration_ms, Some(60_000));
        assert_eq!(agg.batch_id.as_deref(), Some("q-9"));
        assert!(agg.last_success_at.is_some());
        assert_eq!(agg.cube_id, "m-1");
    }

    #[test]
    fn test_failed_instance_has_no_success() {
        let record: InstanceRecord =
            serde_json::from_value(json!({"id": "inst-2", "status": "failed"})).unwrap();
        let agg = aggregate_from_instance(record, "cat-1", "m-1");
        assert_eq!(agg.id, "inst-2");
        assert!(agg.last_success_at.is_none());
        assert!(agg.never_successfully_built());
    }
}
