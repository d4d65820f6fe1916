//! Parallel fan-out across the retrieval backends.
//!
//! Each branch runs behind its breaker with per-call timeout and the
//! adapter retry policy. Partial failure is tolerated: the aggregate
//! reports per-branch results and timings, and total wall time is the
//! slowest successful branch.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::debug;

use marketlens_common::{EngineError, EngineResult, GraphRow, NewsHit, StockSnapshot};

use crate::backends::{GraphBackend, MarketBackend, SearchBackend};
use crate::breaker::{BreakerRegistry, BACKEND_GRAPH, BACKEND_MARKET, BACKEND_SEARCH};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub graph_term: Option<String>,
    pub graph_limit: i64,
    pub search_query: Option<String>,
    pub search_vector: Option<Vec<f32>>,
    pub search_size: usize,
    pub market_symbol: Option<String>,
    pub lookback_days: u32,
}

impl FetchPlan {
    pub fn new(lookback_days: u32) -> Self {
        Self {
            graph_term: None,
            graph_limit: 50,
            search_query: None,
            search_vector: None,
            search_size: 20,
            market_symbol: None,
            lookback_days,
        }
    }

    pub fn with_graph(mut self, term: &str, limit: i64) -> Self {
        self.graph_term = Some(term.to_string());
        self.graph_limit = limit;
        self
    }

    pub fn with_search(mut self, query: &str, size: usize) -> Self {
        self.search_query = Some(query.to_string());
        self.search_size = size;
        self
    }

    pub fn with_search_vector(mut self, vector: Vec<f32>) -> Self {
        self.search_vector = Some(vector);
        self
    }

    pub fn with_market(mut self, symbol: &str) -> Self {
        self.market_symbol = Some(symbol.to_string());
        self
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub graph: Option<EngineResult<Vec<GraphRow>>>,
    pub search: Option<EngineResult<Vec<NewsHit>>>,
    pub market: Option<EngineResult<StockSnapshot>>,
    pub timings: Vec<(String, std::time::Duration)>,
}

impl FetchOutcome {
    /// At least one requested branch failed.
    pub fn partial(&self) -> bool {
        matches!(&self.graph, Some(Err(_)))
            || matches!(&self.search, Some(Err(_)))
            || matches!(&self.market, Some(Err(_)))
    }

    /// At least one branch returned usable data.
    pub fn any_data(&self) -> bool {
        matches!(&self.graph, Some(Ok(rows)) if !rows.is_empty())
            || matches!(&self.search, Some(Ok(hits)) if !hits.is_empty())
            || matches!(&self.market, Some(Ok(_)))
    }

    pub fn graph_rows(&self) -> &[GraphRow] {
        match &self.graph {
            Some(Ok(rows)) => rows,
            _ => &[],
        }
    }

    pub fn news_hits(&self) -> &[NewsHit] {
        match &self.search {
            Some(Ok(hits)) => hits,
            _ => &[],
        }
    }

    pub fn snapshot(&self) -> Option<&StockSnapshot> {
        match &self.market {
            Some(Ok(snap)) => Some(snap),
            _ => None,
        }
    }
}

/// Sized from the connection pool width; a saturated backend is skipped
/// rather than queued so the fast path stays within budget.
const DEFAULT_BACKEND_CONCURRENCY: usize = 16;

pub struct ParallelFetcher {
    graph: Arc<dyn GraphBackend>,
    search: Arc<dyn SearchBackend>,
    market: Arc<dyn MarketBackend>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    graph_permits: Arc<Semaphore>,
    search_permits: Arc<Semaphore>,
    market_permits: Arc<Semaphore>,
}

impl ParallelFetcher {
    pub fn new(
        graph: Arc<dyn GraphBackend>,
        search: Arc<dyn SearchBackend>,
        market: Arc<dyn MarketBackend>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            graph,
            search,
            market,
            breakers,
            retry,
            graph_permits: Arc::new(Semaphore::new(DEFAULT_BACKEND_CONCURRENCY)),
            search_permits: Arc::new(Semaphore::new(DEFAULT_BACKEND_CONCURRENCY)),
            market_permits: Arc::new(Semaphore::new(DEFAULT_BACKEND_CONCURRENCY)),
        }
    }

    pub fn with_concurrency(mut self, per_backend: usize) -> Self {
        self.graph_permits = Arc::new(Semaphore::new(per_backend));
        self.search_permits = Arc::new(Semaphore::new(per_backend));
        self.market_permits = Arc::new(Semaphore::new(per_backend));
        self
    }

    /// Execute all requested branches concurrently. Branch order in the
    /// outcome is fixed (graph, search, market) so downstream merges are
    /// deterministic.
    pub async fn fetch(&self, plan: &FetchPlan) -> FetchOutcome {
        let started = Instant::now();

        let graph_task = async {
            let term = plan.graph_term.as_deref()?;
            let branch_start = Instant::now();
            let Ok(_permit) = self.graph_permits.try_acquire() else {
                return Some((
                    Err(EngineError::Overload { retry_after_s: 1 }),
                    branch_start.elapsed(),
                ));
            };
            let breaker = self.breakers.get(BACKEND_GRAPH);
            let result = self
                .retry
                .run(|| breaker.call(self.graph.search(term, plan.graph_limit, plan.lookback_days)))
                .await;
            Some((result, branch_start.elapsed()))
        };

        let search_task = async {
            let query = plan.search_query.as_deref()?;
            let branch_start = Instant::now();
            let Ok(_permit) = self.search_permits.try_acquire() else {
                return Some((
                    Err(EngineError::Overload { retry_after_s: 1 }),
                    branch_start.elapsed(),
                ));
            };
            let breaker = self.breakers.get(BACKEND_SEARCH);
            let result = self
                .retry
                .run(|| {
                    breaker.call(self.search.hybrid(
                        query,
                        plan.search_vector.as_deref(),
                        plan.lookback_days,
                        plan.search_size,
                    ))
                })
                .await;
            Some((result, branch_start.elapsed()))
        };

        let market_task = async {
            let symbol = plan.market_symbol.as_deref()?;
            let branch_start = Instant::now();
            let Ok(_permit) = self.market_permits.try_acquire() else {
                return Some((
                    Err(EngineError::Overload { retry_after_s: 1 }),
                    branch_start.elapsed(),
                ));
            };
            let breaker = self.breakers.get(BACKEND_MARKET);
            let result = self
                .retry
                .run(|| breaker.call(self.market.quote(symbol)))
                .await;
            Some((result, branch_start.elapsed()))
        };

        let (graph, search, market) = tokio::join!(graph_task, search_task, market_task);

        let mut timings = Vec::new();
        let graph = graph.map(|(r, d)| {
            timings.push(("graph".to_string(), d));
            r
        });
        let search = search.map(|(r, d)| {
            timings.push(("search".to_string(), d));
            r
        });
        let market = market.map(|(r, d)| {
            timings.push(("market".to_string(), d));
            r
        });

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            graph_ok = matches!(&graph, Some(Ok(_))),
            search_ok = matches!(&search, Some(Ok(_))),
            market_ok = matches!(&market, Some(Ok(_))),
            "parallel fetch complete"
        );

        FetchOutcome {
            graph,
            search,
            market,
            timings,
        }
    }
}

