use marketlens_common::Query;

use super::{refine_keywords, search_query_from, FastDeps, HandlerOutput};
use crate::context::EngineerOptions;
use crate::convert::{graph_row_to_context, news_hit_to_context};
use crate::fetcher::FetchPlan;
use crate::formatter;

/// News lookup: graph + search in parallel, rerank, templated answer.
pub async fn handle_news(deps: &FastDeps, query: &Query) -> HandlerOutput {
    let keywords = refine_keywords(deps, query).await;
    let graph_term = keywords
        .first()
        .cloned()
        .unwrap_or_else(|| query.text.clone());
    let search_query = search_query_from(&keywords, &query.text);

    let plan = FetchPlan::new(deps.lookback_days)
        .with_graph(&graph_term, 50)
        .with_search(&search_query, 20);
    let outcome = deps.fetcher.fetch(&plan).await;

    let mut items = Vec::new();
    for row in outcome.graph_rows() {
        items.push(graph_row_to_context(row));
    }
    for hit in outcome.news_hits() {
        items.push(news_hit_to_context(hit));
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
    let markdown = formatter::render_news(&query.text, &items, &sources, &graph_samples, partial);

    HandlerOutput {
        response_type: "news_inquiry".to_string(),
        markdown,
        sources,
        graph_samples,
        partial,
    }
}
