use marketlens_common::Query;

use super::{refine_keywords, resolve_symbol, search_query_from, FastDeps, HandlerOutput};
use crate::context::EngineerOptions;
use crate::convert::news_hit_to_context;
use crate::fetcher::FetchPlan;
use crate::formatter;

/// Stock briefing: quote + related news in parallel.
pub async fn handle_stock(deps: &FastDeps, query: &Query) -> HandlerOutput {
    let keywords = refine_keywords(deps, query).await;
    let search_query = search_query_from(&keywords, &query.text);
    let symbol = resolve_symbol(deps, query).await;

    let mut plan = FetchPlan::new(deps.lookback_days).with_search(&search_query, 15);
    if let Some(symbol) = &symbol {
        plan = plan.with_market(symbol);
    }
    let outcome = deps.fetcher.fetch(&plan).await;

    let items: Vec<_> = outcome.news_hits().iter().map(news_hit_to_context).collect();
    let opts = EngineerOptions {
        lightweight: true,
        lookback_days: deps.lookback_days,
        prune_limit: 20,
    };
    let (items, _) = deps.engineer.run(items, &query.text, None, &opts).await;

    let sources = formatter::citations_from_items(&items);
    // A symbol we could not resolve is a degraded answer, not an error.
    let partial = outcome.partial() || symbol.is_none();
    let markdown = formatter::render_stock(
        &query.text,
        outcome.snapshot(),
        &items,
        &sources,
        partial,
    );

    HandlerOutput {
        response_type: "stock_analysis".to_string(),
        markdown,
        sources,
        graph_samples: Vec::new(),
        partial,
    }
}
