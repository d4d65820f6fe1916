use marketlens_common::Query;

use super::{refine_keywords, resolve_symbol, search_query_from, FastDeps, HandlerOutput};
use crate::context::EngineerOptions;
use crate::convert::{graph_row_to_context, news_hit_to_context, snapshot_to_context};
use crate::fetcher::FetchPlan;
use crate::formatter;

/// Catch-all handler: glossary questions answered from the static
/// template, everything else via fan-out across all backends.
pub async fn handle_general(deps: &FastDeps, query: &Query) -> HandlerOutput {
    if let Some(markdown) = formatter::render_glossary(&query.text) {
        return HandlerOutput {
            response_type: "general_qa".to_string(),
            markdown,
            sources: Vec::new(),
            graph_samples: Vec::new(),
            partial: false,
        };
    }

    let keywords = refine_keywords(deps, query).await;
    let graph_term = keywords
        .first()
        .cloned()
        .unwrap_or_else(|| query.text.clone());
    let search_query = search_query_from(&keywords, &query.text);

    let mut plan = FetchPlan::new(deps.lookback_days)
        .with_graph(&graph_term, 30)
        .with_search(&search_query, 15);
    if let Some(symbol) = resolve_symbol(deps, query).await {
        plan = plan.with_market(&symbol);
    }
    let outcome = deps.fetcher.fetch(&plan).await;

    let mut items = Vec::new();
    for row in outcome.graph_rows() {
        items.push(graph_row_to_context(row));
    }
    for hit in outcome.news_hits() {
        items.push(news_hit_to_context(hit));
    }
    if let Some(snapshot) = outcome.snapshot() {
        items.push(snapshot_to_context(snapshot));
    }

    let opts = EngineerOptions {
        lightweight: true,
        lookback_days: deps.lookback_days,
        prune_limit: 20,
    };
    let (items, _) = deps.engineer.run(items, &query.text, None, &opts).await;

    let sources = formatter::citations_from_items(&items);
    let graph_samples = formatter::trim_graph_samples(outcome.graph_rows());
    let partial = outcome.partial();
    let markdown =
        formatter::render_general(&query.text, &items, &sources, &graph_samples, partial);

    HandlerOutput {
        response_type: "general_qa".to_string(),
        markdown,
        sources,
        graph_samples,
        partial,
    }
}
