//! Trait seams over the retrieval backends.
//!
//! The engine depends on these traits only; production wires in the
//! adapter crates, tests wire in stubs. Network I/O happens strictly
//! below this boundary.

use async_trait::async_trait;

use marketlens_common::{EngineResult, GraphRow, NewsHit, StockSnapshot, SymbolMatch};

#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn search(
        &self,
        term: &str,
        limit: i64,
        lookback_days: u32,
    ) -> EngineResult<Vec<GraphRow>>;

    async fn ready(&self) -> bool;
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn hybrid(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        lookback_days: u32,
        size: usize,
    ) -> EngineResult<Vec<NewsHit>>;

    async fn ready(&self) -> bool;
}

#[async_trait]
pub trait MarketBackend: Send + Sync {
    async fn quote(&self, symbol: &str) -> EngineResult<StockSnapshot>;

    async fn search_symbols(&self, q: &str, limit: usize) -> EngineResult<Vec<SymbolMatch>>;

    async fn ready(&self) -> bool;
}

// --- Production impls wrapping the adapter crates ---

#[async_trait]
impl GraphBackend for marketlens_graph::GraphSearcher {
    async fn search(
        &self,
        term: &str,
        limit: i64,
        lookback_days: u32,
    ) -> EngineResult<Vec<GraphRow>> {
        marketlens_graph::GraphSearcher::search(self, term, limit, lookback_days).await
    }

    async fn ready(&self) -> bool {
        self.client().ping().await
    }
}

#[async_trait]
impl SearchBackend for marketlens_search::SearchClient {
    async fn hybrid(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        lookback_days: u32,
        size: usize,
    ) -> EngineResult<Vec<NewsHit>> {
        marketlens_search::SearchClient::hybrid(self, query_text, query_vector, lookback_days, size)
            .await
    }

    async fn ready(&self) -> bool {
        self.ping().await
    }
}

#[async_trait]
impl MarketBackend for market_client::MarketClient {
    async fn quote(&self, symbol: &str) -> EngineResult<StockSnapshot> {
        market_client::MarketClient::quote(self, symbol).await
    }

    async fn search_symbols(&self, q: &str, limit: usize) -> EngineResult<Vec<SymbolMatch>> {
        market_client::MarketClient::search_symbols(self, q, limit).await
    }

    async fn ready(&self) -> bool {
        self.ping().await
    }
}
