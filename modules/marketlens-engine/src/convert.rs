//! Conversions from backend rows into context items, including promotion
//! of optional upstream quality metadata onto the typed fields.

use serde_json::json;

use marketlens_common::{
    ContextItem, ContextSource, ContextType, GraphRow, NewsHit, OntologyStatus, StockSnapshot,
};

/// Fraction of query tokens found in an item's text. Collection stamps
/// this as the item's relevance before context engineering refines it.
pub fn keyword_relevance(query: &str, text: &str) -> f32 {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let hits = tokens.iter().filter(|t| text.contains(**t)).count();
    hits as f32 / tokens.len() as f32
}

pub fn graph_row_to_context(row: &GraphRow) -> ContextItem {
    let item_type = graph_row_type(&row.labels);
    let mut item = ContextItem::new(ContextSource::Graph, item_type, row.properties.clone());
    item.timestamp = row.ts;
    item.confidence = 0.8;
    apply_hybrid_metadata(&mut item);
    item
}

pub fn graph_row_type(labels: &[String]) -> ContextType {
    let has = |l: &str| labels.iter().any(|x| x == l);
    if has("Company") {
        ContextType::Company
    } else if has("News") {
        ContextType::News
    } else if has("Event") || has("Program") {
        ContextType::Event
    } else if has("Financial") || has("Contract") {
        ContextType::Financial
    } else {
        ContextType::Analysis
    }
}

pub fn news_hit_to_context(hit: &NewsHit) -> ContextItem {
    let mut content = serde_json::Map::new();
    content.insert("title".into(), json!(hit.title));
    content.insert("url".into(), json!(hit.url));
    if let Some(summary) = &hit.summary {
        content.insert("summary".into(), json!(summary));
    }
    for (k, v) in &hit.metadata {
        content.entry(k.clone()).or_insert_with(|| v.clone());
    }

    let mut item = ContextItem::new(ContextSource::Search, ContextType::News, content);
    item.timestamp = hit.published_at;
    item.confidence = (hit.score / 10.0).clamp(0.0, 1.0);
    apply_hybrid_metadata(&mut item);
    item
}

pub fn snapshot_to_context(snapshot: &StockSnapshot) -> ContextItem {
    let mut content = serde_json::Map::new();
    content.insert("title".into(), json!(format!("{} 시세", snapshot.symbol)));
    content.insert(
        "summary".into(),
        json!(format!(
            "현재가 {} ({:+.2}%), 거래량 {}",
            snapshot.last, snapshot.change_pct, snapshot.volume
        )),
    );
    content.insert("symbol".into(), json!(snapshot.symbol));
    content.insert("last".into(), json!(snapshot.last));
    content.insert("change_pct".into(), json!(snapshot.change_pct));

    let mut item = ContextItem::new(ContextSource::Market, ContextType::Stock, content);
    item.timestamp = Some(snapshot.as_of);
    item.confidence = 0.95;
    item
}

/// Promote backend-supplied quality metadata from the content map onto the
/// typed fields. Absent fields keep their defaults; the context engineer
/// computes fallbacks later.
pub fn apply_hybrid_metadata(item: &mut ContextItem) {
    if let Some(q) = item.content.get("quality_score").and_then(|v| v.as_f64()) {
        item.quality_score = Some((q as f32).clamp(0.0, 1.0));
    }
    if let Some(f) = item.content.get("is_featured").and_then(|v| v.as_bool()) {
        item.is_featured = f;
    }
    if let Some(s) = item.content.get("synced").and_then(|v| v.as_bool()) {
        item.synced = s;
    }
    if let Some(d) = item.content.get("graph_degree").and_then(|v| v.as_u64()) {
        item.graph_degree = d as u32;
    }
    if let Some(id) = item.content.get("event_chain_id").and_then(|v| v.as_str()) {
        item.event_chain_id = Some(id.to_string());
    }
    if let Some(status) = item.content.get("ontology_status").and_then(|v| v.as_str()) {
        item.ontology_status = match status {
            "pending" => OntologyStatus::Pending,
            "processing" => OntologyStatus::Processing,
            "completed" => OntologyStatus::Completed,
            "failed" => OntologyStatus::Failed,
            _ => OntologyStatus::Unknown,
        };
    }
    if item.timestamp.is_none() {
        if let Some(raw) = item.content.get("created_date").and_then(|v| v.as_str()) {
            item.timestamp = marketlens_graph::parse_timestamp(raw);
        }
    }
}
