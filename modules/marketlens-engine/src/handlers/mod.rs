//! Fast handlers: parallel hybrid retrieval, lightweight context
//! engineering, templated composition. Soft budget 1.5 s; partial results
//! are served rather than errors.

mod general;
mod news;
mod stock;

pub use general::handle_general;
pub use news::handle_news;
pub use stock::handle_stock;

use std::sync::Arc;
use std::time::Duration;

use ai_client::{ChatModel, GenerateOptions};
use marketlens_common::{Citation, GraphRow, Query};

use crate::backends::MarketBackend;
use crate::breaker::{BreakerRegistry, BACKEND_MARKET};
use crate::context::ContextEngineer;
use crate::fetcher::ParallelFetcher;
use crate::workflow::json::extract_array;

/// Shared dependencies for the fast path.
pub struct FastDeps {
    pub fetcher: Arc<ParallelFetcher>,
    pub engineer: Arc<ContextEngineer>,
    pub chat_model: Arc<dyn ChatModel>,
    pub market: Arc<dyn MarketBackend>,
    pub breakers: Arc<BreakerRegistry>,
    pub lookback_days: u32,
}

#[derive(Debug)]
pub struct HandlerOutput {
    pub response_type: String,
    pub markdown: String,
    pub sources: Vec<Citation>,
    pub graph_samples: Vec<GraphRow>,
    pub partial: bool,
}

/// Hard budget for the optional LM keyword assist.
const KEYWORD_LLM_BUDGET: Duration = Duration::from_secs(1);

/// Rule-based keywords first; one bounded LM call only when the rules came
/// up empty; the raw query as the last resort.
pub(crate) async fn refine_keywords(deps: &FastDeps, query: &Query) -> Vec<String> {
    if !query.keywords.is_empty() {
        return query.keywords.clone();
    }

    let prompt = crate::prompts::extract_keywords(&query.text);
    let opts = GenerateOptions {
        temperature: 0.0,
        max_tokens: 100,
        timeout: KEYWORD_LLM_BUDGET,
    };
    if let Ok(response) = deps.chat_model.generate(&prompt, &opts).await {
        if let Some(keywords) = extract_array::<String>(&response) {
            let keywords: Vec<String> = keywords
                .into_iter()
                .filter(|k| !k.trim().is_empty())
                .take(5)
                .collect();
            if !keywords.is_empty() {
                return keywords;
            }
        }
    }

    vec![query.text.clone()]
}

/// Search query from the leading keywords. Joining every keyword collapses
/// recall, so only the top two participate.
pub(crate) fn search_query_from(keywords: &[String], fallback: &str) -> String {
    let joined = keywords
        .iter()
        .take(2)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        fallback.to_string()
    } else {
        joined
    }
}

/// Resolve a tradable symbol: explicit ticker in the query, else a symbol
/// lookup on the first company entity (breaker-guarded).
pub(crate) async fn resolve_symbol(deps: &FastDeps, query: &Query) -> Option<String> {
    if let Some(ticker) = query.entities.tickers.iter().next() {
        return Some(ticker.clone());
    }

    let company = query.entities.companies.iter().next()?;
    let breaker = deps.breakers.get(BACKEND_MARKET);
    match breaker.call(deps.market.search_symbols(company, 1)).await {
        Ok(matches) => matches.into_iter().next().map(|m| m.symbol),
        Err(_) => None,
    }
}
