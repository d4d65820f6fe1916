//! Hybrid search request bodies for the news index.

use serde_json::{json, Value};

/// Lexical weight in the combined hybrid score.
pub const BM25_ALPHA: f32 = 0.4;
/// Vector weight in the combined hybrid score.
pub const COSINE_BETA: f32 = 0.6;

/// Build the search body: lexical multi-match over title^4/content^2 plus
/// a phrase boost on the title, bounded by a created_date window. When a
/// query vector is present a k-NN clause joins the `should` set and the
/// stored vector is pulled back for client-side re-ranking.
pub fn build_hybrid_body(
    query_text: &str,
    query_vector: Option<&[f32]>,
    cutoff_date: &str,
    size: usize,
) -> Value {
    let mut should = vec![
        json!({
            "multi_match": {
                "query": query_text,
                "fields": ["title^4", "content^2"],
                "type": "best_fields",
                "fuzziness": "AUTO"
            }
        }),
        json!({
            "match_phrase": {
                "title": { "query": query_text, "boost": 2.0 }
            }
        }),
    ];

    let mut source_fields = vec![
        "title",
        "content",
        "summary",
        "url",
        "created_date",
        "quality_score",
        "is_featured",
        "synced",
        "ontology_status",
        "graph_degree",
        "event_chain_id",
    ];

    // Over-fetch when a vector is present; the client-side re-rank prunes.
    let fetch_size = if let Some(vector) = query_vector {
        should.push(json!({
            "knn": {
                "vector_field": { "vector": vector, "k": size }
            }
        }));
        source_fields.push("vector_field");
        size * 2
    } else {
        size
    };

    json!({
        "size": fetch_size,
        "query": {
            "bool": {
                "should": should,
                "minimum_should_match": 1,
                "filter": [
                    { "range": { "created_date": { "gte": cutoff_date } } }
                ]
            }
        },
        "sort": [
            { "_score": { "order": "desc" } },
            { "created_date": { "order": "desc" } }
        ],
        "highlight": {
            "fields": { "title": {}, "content": {} }
        },
        "_source": source_fields
    })
}

/// Combined hybrid score: normalized BM25, cosine, and a recency bonus
/// that decays with a 30-day time constant.
pub fn combined_score(bm25: f32, max_bm25: f32, cosine: f32, age_days: f32) -> f32 {
    let bm25_norm = if max_bm25 > 0.0 { bm25 / max_bm25 } else { 0.0 };
    let recency_bonus = 0.1 * (-age_days / 30.0).exp();
    bm25_norm * BM25_ALPHA + cosine * COSINE_BETA + recency_bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_body_has_field_boosts() {
        let body = build_hybrid_body("삼성전자", None, "2025-01-01", 20);
        let text = body.to_string();
        assert!(text.contains("title^4"));
        assert!(text.contains("content^2"));
        assert!(!text.contains("knn"));
        assert_eq!(body["size"], 20);
    }

    #[test]
    fn vector_body_adds_knn_and_overfetches() {
        let vector = vec![0.1f32; 4];
        let body = build_hybrid_body("HBM", Some(&vector), "2025-01-01", 20);
        assert!(body.to_string().contains("knn"));
        assert_eq!(body["size"], 40);
    }

    #[test]
    fn sort_breaks_ties_by_created_date() {
        let body = build_hybrid_body("q", None, "2025-01-01", 5);
        let sort = body["sort"].as_array().unwrap();
        assert_eq!(sort.len(), 2);
        assert!(sort[1]["created_date"].is_object());
    }

    #[test]
    fn combined_score_favors_cosine() {
        // Same lexical score, different cosine: higher cosine must win.
        let low = combined_score(5.0, 10.0, 0.2, 10.0);
        let high = combined_score(5.0, 10.0, 0.9, 10.0);
        assert!(high > low);
    }

    #[test]
    fn recency_bonus_decays() {
        let fresh = combined_score(0.0, 1.0, 0.0, 0.0);
        let stale = combined_score(0.0, 1.0, 0.0, 365.0);
        assert!(fresh > stale);
        assert!(stale < 0.01);
    }

    #[test]
    fn zero_max_bm25_does_not_divide_by_zero() {
        let score = combined_score(0.0, 0.0, 0.5, 0.0);
        assert!(score.is_finite());
    }
}
