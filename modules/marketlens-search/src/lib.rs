//! OpenSearch client for the news index: hybrid lexical + vector retrieval
//! with client-side re-ranking.

mod types;

pub mod query;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use marketlens_common::{EngineError, EngineResult, NewsHit};

use query::{build_hybrid_body, combined_score};
use types::{RawHit, SearchResponse};

/// REST client for the news search backend.
pub struct SearchClient {
    base_url: String,
    index: String,
    user: String,
    password: String,
    http: reqwest::Client,
    timeout: std::time::Duration,
}

impl SearchClient {
    pub fn new(
        base_url: &str,
        index: &str,
        user: &str,
        password: &str,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Hybrid search: lexical multi-match plus optional k-NN, re-ranked by
    /// `bm25 * alpha + cosine * beta + recency_bonus`. Returns at most
    /// `size` hits, best first.
    pub async fn hybrid(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        lookback_days: u32,
        size: usize,
    ) -> EngineResult<Vec<NewsHit>> {
        let cutoff = (Utc::now() - chrono::Duration::days(lookback_days.max(1) as i64))
            .format("%Y-%m-%d")
            .to_string();
        let body = build_hybrid_body(query_text, query_vector, &cutoff, size);

        let url = format!("{}/{}/_search", self.base_url, self.index);
        debug!(index = %self.index, query = %query_text, size, "hybrid search");

        let mut request = self.http.post(&url).timeout(self.timeout).json(&body);
        if !self.user.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.password));
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(if status.is_client_error() {
                EngineError::Query(format!("search rejected query ({status}): {text}"))
            } else {
                EngineError::Upstream(format!("search error ({status}): {text}"))
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("search response body: {e}")))?;

        let mut hits = parsed.hits.hits;
        if let Some(vector) = query_vector {
            hits = rerank_by_vector(hits, vector);
        }
        hits.truncate(size);

        Ok(hits.into_iter().map(to_news_hit).collect())
    }

    /// Connectivity probe for readiness checks.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/_cluster/health", self.base_url);
        let mut request = self
            .http
            .get(&url)
            .timeout(std::time::Duration::from_secs(5));
        if !self.user.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.password));
        }
        match request.send().await {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }
}

fn classify(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::timeout("search", 0)
    } else if e.is_connect() {
        EngineError::unavailable("search", e.to_string())
    } else {
        EngineError::Upstream(format!("search: {e}"))
    }
}

fn rerank_by_vector(hits: Vec<RawHit>, query_vector: &[f32]) -> Vec<RawHit> {
    let max_bm25 = hits
        .iter()
        .filter_map(|h| h.score)
        .fold(0.0f32, f32::max);
    let now = Utc::now();

    let mut scored: Vec<(RawHit, f32)> = hits
        .into_iter()
        .map(|hit| {
            let cosine = hit
                .source
                .get("vector_field")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    let doc: Vec<f32> = arr
                        .iter()
                        .filter_map(|x| x.as_f64().map(|f| f as f32))
                        .collect();
                    ai_cosine(query_vector, &doc)
                })
                .unwrap_or(0.0);
            let age_days = parse_created_date(&hit.source)
                .map(|d| (now - d).num_days().max(0) as f32)
                .unwrap_or(365.0);
            let score = combined_score(hit.score.unwrap_or(0.0), max_bm25, cosine, age_days);
            (hit, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(hit, _)| hit).collect()
}

// Local copy of the cosine helper; the search crate stays independent of
// the ai-client crate.
fn ai_cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn parse_created_date(source: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let raw = source.get("created_date").and_then(|v| v.as_str())?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

fn to_news_hit(hit: RawHit) -> NewsHit {
    let title = hit
        .source
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let url = hit
        .source
        .get("url")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let summary = hit
        .source
        .get("summary")
        .or_else(|| hit.source.get("content"))
        .and_then(|v| v.as_str())
        .map(|s| s.chars().take(500).collect());
    let published_at = parse_created_date(&hit.source);

    let highlights = hit
        .highlight
        .as_ref()
        .map(|h| {
            h.values()
                .filter_map(|v| v.as_array())
                .flatten()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    // Carry the remaining upstream fields through untouched.
    let mut metadata = hit.source;
    for consumed in ["title", "url", "summary", "content", "vector_field"] {
        metadata.remove(consumed);
    }

    NewsHit {
        id: hit.id,
        title,
        url,
        summary,
        published_at,
        score: hit.score.unwrap_or(0.0),
        highlights,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_hit(id: &str, score: f32, source: Value) -> RawHit {
        RawHit {
            id: id.to_string(),
            score: Some(score),
            source: source.as_object().cloned().unwrap_or_default(),
            highlight: None,
        }
    }

    #[test]
    fn vector_rerank_promotes_semantic_match() {
        let query = vec![1.0f32, 0.0];
        let hits = vec![
            raw_hit(
                "lexical",
                10.0,
                json!({"vector_field": [0.0, 1.0], "created_date": "2025-07-01"}),
            ),
            raw_hit(
                "semantic",
                2.0,
                json!({"vector_field": [1.0, 0.0], "created_date": "2025-07-01"}),
            ),
        ];
        let reranked = rerank_by_vector(hits, &query);
        assert_eq!(reranked[0].id, "semantic");
    }

    #[test]
    fn hit_without_vector_scores_zero_cosine() {
        let query = vec![1.0f32, 0.0];
        let hits = vec![
            raw_hit("no_vec", 1.0, json!({"created_date": "2025-07-01"})),
            raw_hit(
                "with_vec",
                1.0,
                json!({"vector_field": [1.0, 0.0], "created_date": "2025-07-01"}),
            ),
        ];
        let reranked = rerank_by_vector(hits, &query);
        assert_eq!(reranked[0].id, "with_vec");
    }

    #[test]
    fn news_hit_carries_quality_metadata() {
        let hit = raw_hit(
            "1",
            3.0,
            json!({
                "title": "삼성전자 HBM 수주",
                "url": "https://news.example/1",
                "content": "본문",
                "quality_score": 0.8,
                "is_featured": true
            }),
        );
        let news = to_news_hit(hit);
        assert_eq!(news.title, "삼성전자 HBM 수주");
        assert_eq!(news.metadata.get("quality_score"), Some(&json!(0.8)));
        assert_eq!(news.metadata.get("is_featured"), Some(&json!(true)));
        assert!(news.metadata.get("title").is_none());
    }

    #[test]
    fn summary_falls_back_to_content_truncated() {
        let long_body: String = "가".repeat(600);
        let hit = raw_hit("1", 1.0, json!({"title": "t", "content": long_body}));
        let news = to_news_hit(hit);
        assert_eq!(news.summary.unwrap().chars().count(), 500);
    }
}
