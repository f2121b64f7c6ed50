// Data models: domain snapshots plus the wire formats of both deployments

pub mod aggregate;
pub mod container;
pub mod installer;

pub use aggregate::{
    Aggregate, AttributeCounts, BuildHistoryEntry, BuildOutcome, BuildStatus, Catalog, Cube,
    CubeTarget, Page,
};

/// Number fields the server sends as integers, floats or numeric strings
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_f64(value: Option<Value>) -> Option<f64> {
        match value? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(as_f64(Option::<Value>::deserialize(deserializer)?).filter(|v| v.is_finite()))
    }

    pub fn u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        if let Some(Value::Number(n)) = &value {
            if let Some(v) = n.as_u64() {
                return Ok(Some(v));
            }
        }
        Ok(as_f64(value)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u64))
    }

    #[cfg(test)]
    mod tests {
        use serde::Deserialize;
        use serde_json::json;

        #[derive(Deserialize)]
        struct Probe {
            #[serde(default, deserialize_with = "super::u64_opt")]
            rows: Option<u64>,
            #[serde(default, deserialize_with = "super::f64_opt")]
            ratio: Option<f64>,
        }

        #[test]
        fn test_lenient_numbers() {
            let p: Probe = serde_json::from_value(json!({"rows": "12", "ratio": 0.5})).unwrap();
            assert_eq!(p.rows, Some(12));
            assert_eq!(p.ratio, Some(0.5));

            let p: Probe = serde_json::from_value(json!({"rows": 3.6, "ratio": "x"})).unwrap();
            assert_eq!(p.rows, Some(4));
            assert_eq!(p.ratio, None);

            let p: Probe = serde_json::from_value(json!({"rows": null})).unwrap();
            assert_eq!(p.rows, None);

            let p: Probe = serde_json::from_value(json!({"rows": -1})).unwrap();
            assert_eq!(p.rows, None);
        }
    }
}
