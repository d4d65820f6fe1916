use chrono::{DateTime, TimeZone, Utc};
use neo4rs::query;
use serde_json::{Map, Value};
use tracing::debug;

use marketlens_common::{EngineError, EngineResult, GraphRow};

use crate::cypher::build_label_search;
use crate::GraphClient;

/// Properties projected into every GraphRow regardless of label, when present.
const COMMON_PROPS: &[&str] = &[
    "name", "title", "summary", "description", "url", "aliases", "ticker", "sector",
    "quality_score", "is_featured", "synced", "ontology_status", "graph_degree",
    "event_chain_id",
];

/// Read-side access to the knowledge graph: keyword search across the
/// configured labels, projected to `{properties, labels, ts}` rows.
/// Raw driver objects never leave this module.
pub struct GraphSearcher {
    client: GraphClient,
    keys_map: Vec<(String, Vec<String>)>,
    cypher: String,
}

impl GraphSearcher {
    pub fn new(client: GraphClient, keys_map: Vec<(String, Vec<String>)>) -> Self {
        let cypher = build_label_search(&keys_map);
        Self {
            client,
            keys_map,
            cypher,
        }
    }

    /// Search all configured labels for a term. `lookback_days = 0` disables
    /// the time window.
    pub async fn search(
        &self,
        term: &str,
        limit: i64,
        lookback_days: u32,
    ) -> EngineResult<Vec<GraphRow>> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let cutoff_ms: i64 = if lookback_days == 0 {
            0
        } else {
            (Utc::now() - chrono::Duration::days(lookback_days as i64)).timestamp_millis()
        };

        let q = query(&self.cypher)
            .param("q", term.as_str())
            .param("limit", limit)
            .param("cutoff", cutoff_ms);

        debug!(term = %term, limit, cutoff_ms, "graph label search");

        let mut stream = self
            .client
            .graph
            .execute(q)
            .await
            .map_err(map_graph_err)?;

        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(map_graph_err)? {
            if let Some(graph_row) = row_to_graph_row(&row, &self.keys_map) {
                rows.push(graph_row);
            }
        }
        Ok(rows)
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }
}

fn map_graph_err(e: neo4rs::Error) -> EngineError {
    let text = e.to_string();
    if text.contains("Syntax") || text.contains("SyntaxError") || text.contains("ParameterMissing")
    {
        EngineError::Query(text)
    } else {
        EngineError::unavailable("graph", text)
    }
}

fn row_to_graph_row(row: &neo4rs::Row, keys_map: &[(String, Vec<String>)]) -> Option<GraphRow> {
    let node: neo4rs::Node = row.get("n").ok()?;
    let labels: Vec<String> = row.get("labels").unwrap_or_default();

    let mut properties = Map::new();
    let mut wanted: Vec<&str> = COMMON_PROPS.to_vec();
    for (label, keys) in keys_map {
        if labels.iter().any(|l| l == label) {
            wanted.extend(keys.iter().map(|k| k.as_str()));
        }
    }

    for key in wanted {
        if properties.contains_key(key) {
            continue;
        }
        if let Some(value) = node_prop_value(&node, key) {
            properties.insert(key.to_string(), value);
        }
    }

    let ts = row
        .get::<i64>("ts")
        .ok()
        .and_then(epoch_millis_to_datetime)
        .or_else(|| {
            row.get::<String>("ts")
                .ok()
                .and_then(|s| parse_timestamp(&s))
        });
    if let Some(ts) = ts {
        properties.insert("ts".to_string(), Value::String(ts.to_rfc3339()));
    }

    Some(GraphRow {
        properties,
        labels,
        ts,
    })
}

/// Try a property as each of the scalar Bolt types we care about.
fn node_prop_value(node: &neo4rs::Node, key: &str) -> Option<Value> {
    if let Ok(s) = node.get::<String>(key) {
        return Some(Value::String(s));
    }
    if let Ok(b) = node.get::<bool>(key) {
        return Some(Value::Bool(b));
    }
    if let Ok(i) = node.get::<i64>(key) {
        return Some(Value::Number(i.into()));
    }
    if let Ok(f) = node.get::<f64>(key) {
        return serde_json::Number::from_f64(f).map(Value::Number);
    }
    if let Ok(list) = node.get::<Vec<String>>(key) {
        return Some(Value::Array(list.into_iter().map(Value::String).collect()));
    }
    None
}

fn epoch_millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    // Values small enough to be epoch seconds are treated as such.
    if ms == 0 {
        return None;
    }
    if ms.abs() < 100_000_000_000 {
        Utc.timestamp_opt(ms, 0).single()
    } else {
        Utc.timestamp_millis_opt(ms).single()
    }
}

/// Parse ISO-8601 or bare-date timestamps from graph properties.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|ndt| Utc.from_utc_datetime(&ndt));
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        return epoch_millis_to_datetime(epoch);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        let ts = parse_timestamp("2025-06-01T09:30:00+09:00").unwrap();
        assert_eq!(ts.timezone(), Utc);
    }

    #[test]
    fn parses_bare_date() {
        let ts = parse_timestamp("2025-06-01").unwrap();
        assert_eq!(ts.format("%Y-%m-%d").to_string(), "2025-06-01");
    }

    #[test]
    fn parses_epoch_millis_string() {
        let ts = parse_timestamp("1717200000000").unwrap();
        assert_eq!(ts.format("%Y").to_string(), "2024");
    }

    #[test]
    fn epoch_seconds_not_misread_as_millis() {
        let ts = epoch_millis_to_datetime(1_717_200_000).unwrap();
        assert_eq!(ts.format("%Y").to_string(), "2024");
    }

    #[test]
    fn empty_string_is_none() {
        assert!(parse_timestamp("").is_none());
    }
}
