// Installer wire format → domain conversion

use crate::models::installer::{AggregateDefinition, Instance, PublishedProject};
use crate::models::{Aggregate, BuildStatus, Catalog, Cube};

use super::core::{count_attributes, duration_ms, parse_timestamp};

pub fn catalog_from_project(project: PublishedProject) -> Catalog {
    let catalog_id = project.id;
    let cubes = project
        .cubes
        .into_iter()
        .map(|cube| Cube {
            name: cube.name.unwrap_or_else(|| cube.id.clone()),
            id: cube.id,
            caption: cube.caption,
            catalog_id: catalog_id.clone(),
        })
        .collect();

    Catalog {
        name: project.name.unwrap_or_else(|| catalog_id.clone()),
        id: catalog_id,
        cubes,
    }
}

fn instance_status(instance: Option<&Instance>) -> BuildStatus {
    match instance {
        Some(inst) => BuildStatus::from_server(inst.status.as_deref()),
        None => BuildStatus::NeverBuilt,
    }
}

/// Convert an aggregate definition with its latest and active instances
///
/// The status comes from the latest instance. Row counts and the last
/// successful build come from whichever instance is serving queries.
pub fn aggregate_from_definition(
    def: AggregateDefinition,
    catalog_id: &str,
    cube_id: &str,
) -> Aggregate {
    let latest = def.latest_instance.as_ref();
    let status = instance_status(latest);

    let serving = if status == BuildStatus::Built {
        latest
    } else {
        def.active_instance
            .as_ref()
            .filter(|a| instance_status(Some(a)) == BuildStatus::Built)
    };

    let latest_stats = latest.and_then(|i| i.stats.clone()).unwrap_or_default();
    let serving_stats = serving.and_then(|i| i.stats.clone()).unwrap_or_default();

    let started = parse_timestamp(latest_stats.materialization_start_time.as_deref());
    let ended = parse_timestamp(latest_stats.materialization_end_time.as_deref());
    let definition_stats = def.stats.clone().unwrap_or_default();
    let instance = serving.or(latest);

    Aggregate {
        name: def.name.clone().unwrap_or_else(|| def.id.clone()),
        catalog_id: def
            .project_id
            .clone()
            .unwrap_or_else(|| catalog_id.to_string()),
        cube_id: def.cube_id.clone().unwrap_or_else(|| cube_id.to_string()),
        aggregate_type: def.aggregate_type.clone(),
        subtype: def.subtype.clone(),
        status_message: latest.and_then(|i| i.message.clone()),
        row_count: serving_stats.number_of_rows.or(latest_stats.number_of_rows),
        size_bytes: serving_stats.size_bytes.or(latest_stats.size_bytes),
        last_build_at: ended.or(started),
        last_success_at: serving.and_then(|i| {
            let stats = i.stats.as_ref()?;
            parse_timestamp(stats.materialization_end_time.as_deref())
                .or_else(|| parse_timestamp(stats.materialization_start_time.as_deref()))
        }),
        build_duration_ms: duration_ms(latest_stats.build_duration, started, ended),
        query_utilization: definition_stats.query_utilization,
        most_recent_query: parse_timestamp(definition_stats.most_recent_query.as_deref()),
        table_name: instance.and_then(|i| i.table_name.clone()),
        table_schema: instance.and_then(|i| i.table_schema.clone()),
        batch_id: latest.and_then(|i| i.batch_id.clone()),
        connection_id: instance.and_then(|i| i.connection_id.clone()),
        attributes: count_attributes(&def.attributes),
        status,
        id: def.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(value: serde_json::Value) -> AggregateDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_catalog_from_project() {
        let project: PublishedProject = serde_json::from_value(json!({
            "id": "p1",
            "name": "Retail",
            "cubes": [{"id": "c1", "name": "Sales"}, {"id": "c2"}]
        }))
        .unwrap();

        let catalog = catalog_from_project(project);
        assert_eq!(catalog.name, "Retail");
        assert_eq!(catalog.cubes.len(), 2);
        assert_eq!(catalog.cubes[1].name, "c2");
        assert!(catalog.cubes.iter().all(|c| c.catalog_id == "p1"));
    }

    #[test]
    fn test_active_aggregate() {
        let agg = aggregate_from_definition(
            definition(json!({
                "id": "a1",
                "name": "By Day",
                "type": "system",
                "attributes": [{"type": "key"}, {"type": "measure"}, {"type": "measure"}],
                "stats": {"query_utilization": 4},
                "latest_instance": {
                    "status": "active",
                    "table_name": "agg_a1",
                    "stats": {
                        "materialization_start_time": "2026-10-01T10:00:00Z",
                        "materialization_end_time": "2026-10-01T10:00:30Z",
                        "number_of_rows": 1200
                    }
                }
            })),
            "p1",
            "c1",
        );

        assert_eq!(agg.status, BuildStatus::Built);
        assert_eq!(agg.row_count, Some(1200));
        assert_eq!(agg.build_duration_ms, Some(30_000));
        assert_eq!(agg.last_success_at, agg.last_build_at);
        assert!(agg.last_success_at.is_some());
        assert_eq!(agg.attributes.measures, 2);
        assert_eq!(agg.attributes.keys, 1);
        assert_eq!(agg.table_name.as_deref(), Some("agg_a1"));
        assert_eq!(agg.catalog_id, "p1");
        assert_eq!(agg.query_utilization, Some(4.0));
    }

    #[test]
    fn test_failed_rebuild_keeps_serving_instance() {
        let agg = aggregate_from_definition(
            definition(json!({
                "id": "a2",
                "latest_instance": {
                    "status": "failed",
                    "message": "disk full",
                    "stats": {"materialization_start_time": "2026-10-02T10:00:00Z"}
                },
                "active_instance": {
                    "status": "active",
                    "stats": {
                        "materialization_end_time": "2026-09-20T10:00:00Z",
                        "number_of_rows": 50
                    }
                }
            })),
            "p1",
            "c1",
        );

        assert_eq!(agg.status, BuildStatus::Failed);
        assert_eq!(agg.status_message.as_deref(), Some("disk full"));
        assert_eq!(agg.row_count, Some(50));
        assert_eq!(
            agg.last_success_at.map(|d| d.to_rfc3339()),
            Some("2026-09-20T10:00:00+00:00".to_string())
        );
        assert!(!agg.never_successfully_built());
    }

    #[test]
    fn test_never_built_aggregate() {
        let agg = aggregate_from_definition(definition(json!({"id": "a3"})), "p1", "c1");
        assert_eq!(agg.status, BuildStatus::NeverBuilt);
        assert_eq!(agg.name, "a3");
        assert!(agg.last_success_at.is_none());
        assert!(agg.never_successfully_built());
    }
}
