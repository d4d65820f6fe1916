//! Label-aware search query generation.
//!
//! Each configured label contributes one UNION branch that matches its
//! searchable attributes with direct property access, so Neo4j text
//! indexes stay usable. Generic `ANY(k IN keys(n) ...)` scans defeat
//! those indexes and are deliberately avoided.

/// Build the label-aware search Cypher for the configured key map.
///
/// Every branch projects uniformly to `n, labels, ts` where `ts` is the
/// earliest defined of published_at / award_date / lastSeenAt. Parameters:
/// `$q` (lowercased term), `$limit`, `$cutoff` (epoch millis, 0 disables
/// the time window).
pub fn build_label_search(keys_map: &[(String, Vec<String>)]) -> String {
    let fallback;
    let keys_map = if keys_map.is_empty() {
        fallback = vec![
            ("Company".to_string(), vec!["name".to_string()]),
            (
                "News".to_string(),
                vec!["title".to_string(), "summary".to_string()],
            ),
        ];
        &fallback
    } else {
        keys_map
    };

    let mut blocks = Vec::with_capacity(keys_map.len());
    for (label, keys) in keys_map {
        let alias = label_alias(label);
        let predicates: Vec<String> = keys
            .iter()
            .map(|k| format!("toLower(coalesce(toString({alias}.{k}), '')) CONTAINS $q"))
            .collect();
        let predicate = predicates.join(" OR ");

        blocks.push(format!(
            "  MATCH ({alias}:{label})\n  \
             WHERE ({predicate})\n    \
             AND ($cutoff = 0 OR coalesce({alias}.published_at, {alias}.award_date, {alias}.lastSeenAt, 0) >= $cutoff)\n  \
             RETURN {alias} AS n, labels({alias}) AS labels,\n         \
             coalesce({alias}.published_at, {alias}.award_date, {alias}.lastSeenAt) AS ts"
        ));
    }

    let unioned = blocks.join("\n  UNION\n");

    // coalesce keeps rows without a timestamp at the tail of the ordering
    format!(
        "CALL {{\n{unioned}\n}}\nRETURN n, labels, ts\nORDER BY coalesce(ts, 0) DESC\nLIMIT $limit"
    )
}

fn label_alias(label: &str) -> &'static str {
    match label.to_lowercase().as_str() {
        "company" => "c",
        "news" => "nw",
        "event" => "e",
        "technology" => "t",
        "theme" => "th",
        "program" => "p",
        "agency" => "ag",
        _ => "n",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(pairs: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        pairs
            .iter()
            .map(|(l, ks)| {
                (
                    l.to_string(),
                    ks.iter().map(|k| k.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn builds_one_branch_per_label() {
        let cypher = build_label_search(&keys(&[
            ("Company", &["name"]),
            ("News", &["title", "summary"]),
        ]));
        assert_eq!(cypher.matches("MATCH").count(), 2);
        assert_eq!(cypher.matches("UNION").count(), 1);
        assert!(cypher.contains("LIMIT $limit"));
    }

    #[test]
    fn uses_direct_attribute_access() {
        let cypher = build_label_search(&keys(&[("Company", &["name"])]));
        assert!(cypher.contains("toLower(coalesce(toString(c.name), '')) CONTAINS $q"));
        assert!(!cypher.contains("keys("));
    }

    #[test]
    fn projects_uniform_row_shape() {
        let cypher = build_label_search(&keys(&[("News", &["title"])]));
        assert!(cypher.contains("RETURN nw AS n, labels(nw) AS labels"));
        assert!(cypher.contains("coalesce(nw.published_at, nw.award_date, nw.lastSeenAt) AS ts"));
    }

    #[test]
    fn empty_map_falls_back_to_company_and_news() {
        let cypher = build_label_search(&[]);
        assert!(cypher.contains(":Company"));
        assert!(cypher.contains(":News"));
    }
}
