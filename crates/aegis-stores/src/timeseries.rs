//! Time-series store driver seam and InfluxDB implementation.

use async_trait::async_trait;
use influxdb::{Client, InfluxDbWriteable, ReadQuery, Timestamp};
use serde::Deserialize;
use std::collections::BTreeMap;

use aegis_core::config::InfluxEndpoint;

use crate::error::{StoreError, StoreResult};
use crate::types::SeriesPoint;

/// Driver seam for the time-series store.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> StoreResult<()>;

    /// Points in the window `(start, end]` across all measurements,
    /// pivoted per field. `None` start returns everything up to `end`.
    async fn query_window(
        &self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<Vec<SeriesPoint>>;

    /// Write points into the store.
    async fn write_points(&self, points: &[SeriesPoint]) -> StoreResult<()>;

    /// Flush buffered writes.
    async fn flush(&self) -> StoreResult<()>;
}

/// InfluxDB-backed time-series store.
pub struct InfluxTimeSeriesStore {
    client: Client,
}

/// InfluxQL JSON response shape.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    series: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    name: String,
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl InfluxTimeSeriesStore {
    /// Connect to the endpoint.
    pub fn connect(endpoint: &InfluxEndpoint) -> Self {
        let mut client = Client::new(endpoint.url.clone(), endpoint.database.clone());
        if let (Some(username), Some(password)) = (&endpoint.username, &endpoint.password) {
            client = client.with_auth(username.clone(), password.clone());
        }
        Self { client }
    }

    fn parse_time_ms(value: &serde_json::Value) -> Option<i64> {
        match value {
            serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis()),
            serde_json::Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Pivot one response row into a `SeriesPoint`. String columns are
    /// treated as tags, numeric columns as fields.
    fn row_to_point(series: &Series, row: &[serde_json::Value]) -> Option<SeriesPoint> {
        let time_index = series.columns.iter().position(|c| c == "time")?;
        let timestamp_ms = Self::parse_time_ms(row.get(time_index)?)?;

        let mut tags = BTreeMap::new();
        let mut fields = BTreeMap::new();
        for (column, value) in series.columns.iter().zip(row.iter()) {
            if column == "time" {
                continue;
            }
            match value {
                serde_json::Value::Number(n) => {
                    if let Some(v) = n.as_f64() {
                        fields.insert(column.clone(), v);
                    }
                }
                serde_json::Value::String(s) => {
                    tags.insert(column.clone(), s.clone());
                }
                _ => {}
            }
        }

        if fields.is_empty() {
            return None;
        }
        Some(SeriesPoint {
            measurement: series.name.clone(),
            timestamp_ms,
            tags,
            fields,
        })
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxTimeSeriesStore {
    async fn ping(&self) -> StoreResult<()> {
        self.client
            .ping()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn query_window(
        &self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<Vec<SeriesPoint>> {
        let query = match start {
            Some(start) => format!(
                "SELECT * FROM /.*/ WHERE time > {}ms AND time <= {}ms",
                start.timestamp_millis(),
                end.timestamp_millis()
            ),
            None => format!(
                "SELECT * FROM /.*/ WHERE time <= {}ms",
                end.timestamp_millis()
            ),
        };

        let raw = self
            .client
            .query(ReadQuery::new(query))
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let response: QueryResponse =
            serde_json::from_str(&raw).map_err(|e| StoreError::Data(e.to_string()))?;

        let mut points = Vec::new();
        for result in &response.results {
            for series in &result.series {
                for row in &series.values {
                    if let Some(point) = Self::row_to_point(series, row) {
                        points.push(point);
                    }
                }
            }
        }
        points.sort_by_key(|p| p.timestamp_ms);
        Ok(points)
    }

    async fn write_points(&self, points: &[SeriesPoint]) -> StoreResult<()> {
        for point in points {
            let mut write = Timestamp::Milliseconds(point.timestamp_ms as u128)
                .into_query(point.measurement.clone());
            for (field, value) in &point.fields {
                write = write.add_field(field.clone(), *value);
            }
            for (tag, value) in &point.tags {
                write = write.add_tag(tag.clone(), value.clone());
            }
            self.client
                .query(write)
                .await
                .map_err(|e| StoreError::Write(e.to_string()))?;
        }
        Ok(())
    }

    async fn flush(&self) -> StoreResult<()> {
        // The HTTP write path is unbuffered.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_to_point_pivots_tags_and_fields() {
        let series = Series {
            name: "cpu".to_string(),
            columns: vec![
                "time".to_string(),
                "host".to_string(),
                "value".to_string(),
            ],
            values: vec![],
        };
        let row = vec![
            serde_json::json!("2024-01-01T00:00:00Z"),
            serde_json::json!("node-1"),
            serde_json::json!(0.5),
        ];
        let point = InfluxTimeSeriesStore::row_to_point(&series, &row).unwrap();
        assert_eq!(point.measurement, "cpu");
        assert_eq!(point.tags.get("host").unwrap(), "node-1");
        assert_eq!(*point.fields.get("value").unwrap(), 0.5);
    }

    #[test]
    fn test_row_without_fields_dropped() {
        let series = Series {
            name: "cpu".to_string(),
            columns: vec!["time".to_string(), "host".to_string()],
            values: vec![],
        };
        let row = vec![
            serde_json::json!(1700000000000i64),
            serde_json::json!("node-1"),
        ];
        assert!(InfluxTimeSeriesStore::row_to_point(&series, &row).is_none());
    }

    #[test]
    fn test_parse_query_response() {
        let raw = r#"{
            "results": [{
                "statement_id": 0,
                "series": [{
                    "name": "cpu",
                    "columns": ["time", "value"],
                    "values": [["2024-01-01T00:00:00Z", 0.1], ["2024-01-01T00:01:00Z", 0.2]]
                }]
            }]
        }"#;
        let response: QueryResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.results[0].series[0].values.len(), 2);
    }
}
