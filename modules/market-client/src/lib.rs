//! Market-data feed client: spot quotes and symbol lookup.
//!
//! The feed is a plain JSON REST service; swapping in a broker API means
//! reimplementing this client against the same two methods.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use marketlens_common::{EngineError, EngineResult, StockSnapshot, SymbolMatch};

pub struct MarketClient {
    base_url: String,
    http: reqwest::Client,
    timeout: std::time::Duration,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    symbol: String,
    last: f64,
    #[serde(default)]
    change: f64,
    #[serde(default)]
    change_pct: f64,
    #[serde(default)]
    volume: u64,
    #[serde(default)]
    as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SymbolSearchResponse {
    #[serde(default)]
    results: Vec<SymbolRow>,
}

#[derive(Debug, Deserialize)]
struct SymbolRow {
    symbol: String,
    name: String,
}

impl MarketClient {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Latest quote for one symbol.
    pub async fn quote(&self, symbol: &str) -> EngineResult<StockSnapshot> {
        let url = format!("{}/quote/{}", self.base_url, symbol);
        debug!(symbol, "market quote request");

        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 404 {
                EngineError::Query(format!("unknown symbol {symbol}"))
            } else {
                EngineError::Upstream(format!("market error ({status}): {text}"))
            });
        }

        let body: QuoteResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("quote body: {e}")))?;

        Ok(StockSnapshot {
            symbol: body.symbol,
            last: body.last,
            change: body.change,
            change_pct: body.change_pct,
            volume: body.volume,
            as_of: body.as_of.unwrap_or_else(Utc::now),
        })
    }

    /// Resolve a free-text company name to listed symbols.
    pub async fn search_symbols(&self, q: &str, limit: usize) -> EngineResult<Vec<SymbolMatch>> {
        let url = format!("{}/symbols", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .query(&[("q", q), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Upstream(format!(
                "symbol search error ({status})"
            )));
        }

        let body: SymbolSearchResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("symbol search body: {e}")))?;

        Ok(body
            .results
            .into_iter()
            .map(|r| SymbolMatch {
                symbol: r.symbol,
                name: r.name,
            })
            .collect())
    }

    /// Connectivity probe for readiness checks.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(std::time::Duration::from_secs(3))
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }
}

fn classify(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::timeout("market", 0)
    } else if e.is_connect() {
        EngineError::unavailable("market", e.to_string())
    } else {
        EngineError::Upstream(format!("market: {e}"))
    }
}
