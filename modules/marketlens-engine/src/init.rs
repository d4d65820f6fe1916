//! Process lifecycle: wire the configuration into a running engine, and
//! drain it on shutdown. Connections are pooled once here and reused for
//! the life of the process.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use ai_client::{OllamaChat, OllamaEmbedder};
use marketlens_common::Config;
use marketlens_graph::{GraphClient, GraphSearcher};
use marketlens_search::SearchClient;

use crate::backends::{GraphBackend, MarketBackend, SearchBackend};
use crate::breaker::{BreakerConfig, BreakerRegistry, BACKEND_LLM};
use crate::cache::disk::DiskCache;
use crate::cache::kv::DisabledKv;
use crate::cache::{CacheConfig, MultiLevelCache};
use crate::context::ContextEngineer;
use crate::fetcher::ParallelFetcher;
use crate::handlers::FastDeps;
use crate::observability::{tracer_from_config, Metrics};
use crate::retry::{Backoff, RetryPolicy};
use crate::router::{QueryRouter, RouterConfig};
use crate::workflow::DeepWorkflow;

/// Everything a server binary needs: the router plus the probes that back
/// readiness reporting.
pub struct Engine {
    pub router: Arc<QueryRouter>,
    pub graph: Arc<dyn GraphBackend>,
    pub search: Arc<dyn SearchBackend>,
    pub market: Arc<dyn MarketBackend>,
    pub breakers: Arc<BreakerRegistry>,
    pub metrics: Arc<Metrics>,
    cache: Arc<MultiLevelCache>,
}

impl Engine {
    /// Connect pools, verify credentials, and assemble the pipeline.
    pub async fn init(config: &Config) -> Result<Self> {
        config.log_redacted();

        let graph_client = GraphClient::connect(
            &config.neo4j_uri,
            &config.neo4j_user,
            &config.neo4j_password,
            &config.neo4j_database,
        )
        .await
        .context("connecting to Neo4j")?;
        let graph: Arc<dyn GraphBackend> = Arc::new(GraphSearcher::new(
            graph_client,
            config.graph_search_keys.clone(),
        ));

        let search_client = SearchClient::new(
            &config.opensearch_url,
            &config.news_index,
            &config.opensearch_user,
            &config.opensearch_password,
            config.search_timeout(),
        );
        if !search_client.ping().await {
            warn!("search backend not reachable at init, continuing degraded");
        }
        let search: Arc<dyn SearchBackend> = Arc::new(search_client);

        let market: Arc<dyn MarketBackend> = Arc::new(market_client::MarketClient::new(
            &config.market_api_url,
            config.market_timeout(),
        ));

        let chat_model = Arc::new(OllamaChat::new(&config.ollama_base_url, &config.chat_model));
        let report_model = Arc::new(OllamaChat::new(
            &config.ollama_base_url,
            &config.report_model,
        ));
        let ollama_embedder = Arc::new(OllamaEmbedder::new(
            &config.ollama_base_url,
            &config.embed_model,
            config.embed_dim,
        ));
        let embedder: Arc<dyn ai_client::EmbedModel> = ollama_embedder.clone();
        if ollama_embedder.ping().await {
            info!(model = %config.embed_model, dim = config.embed_dim, "embedder ready");
        } else {
            warn!("embedder not reachable at init, semantic scoring degrades to keywords");
        }

        let llm_call_timeout = Duration::from_millis(config.llm_timeout_ms) + Duration::from_secs(5);
        let breakers = Arc::new(BreakerRegistry::new(|name| {
            let mut breaker_config = BreakerConfig {
                failure_threshold: config.breaker_failure_threshold,
                recovery_timeout: Duration::from_secs(config.breaker_recovery_s),
                half_open_success_threshold: config.breaker_half_open_probes,
                call_timeout: Duration::from_secs(config.breaker_call_timeout_s),
            };
            // LM calls run far longer than retrieval; their breaker timeout
            // sits above the per-node budget so the node deadline fires first.
            if name == BACKEND_LLM {
                breaker_config.call_timeout = llm_call_timeout;
            }
            breaker_config
        }));

        let retry = RetryPolicy {
            max_attempts: config.retry_max_attempts,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            strategy: Backoff::ExponentialJitter,
            jitter: 0.1,
        };

        // L2 is a capability seam: no distributed store ships in this build,
        // so the disabled implementation is always selected.
        if config.cache_l2_enabled {
            warn!("CACHE_L2_ENABLED set but no distributed KV is configured in this build");
        }
        let l3 = config
            .cache_l3_enabled
            .then(|| DiskCache::open(&config.cache_l3_dir, config.cache_l3_max_gb));
        let cache = Arc::new(MultiLevelCache::new(
            CacheConfig {
                l1_max_items: config.cache_l1_max_items,
                l1_max_mb: config.cache_l1_max_mb,
                l1_default_ttl: Duration::from_secs(config.cache_l1_ttl_s),
                l2_default_ttl: Duration::from_secs(config.cache_l2_ttl_s),
                l3_default_ttl: Duration::from_secs(config.cache_l3_ttl_s),
            },
            Box::new(DisabledKv),
            l3,
        ));

        let tracer = tracer_from_config(
            config.trace_url.as_deref(),
            config.trace_secret.as_deref(),
        );

        let fetcher = Arc::new(ParallelFetcher::new(
            graph.clone(),
            search.clone(),
            market.clone(),
            breakers.clone(),
            retry,
        ));
        let engineer = Arc::new(ContextEngineer::new(Some(embedder.clone())));

        let workflow = Arc::new(DeepWorkflow::new(
            report_model,
            Some(embedder),
            fetcher.clone(),
            engineer.clone(),
            cache.clone(),
            breakers.clone(),
            tracer,
        ));

        let fast = FastDeps {
            fetcher,
            engineer,
            chat_model,
            market: market.clone(),
            breakers: breakers.clone(),
            lookback_days: config.lookback_days,
        };

        let metrics = Arc::new(Metrics::default());
        let router = Arc::new(QueryRouter::new(
            fast,
            workflow,
            breakers.clone(),
            metrics.clone(),
            RouterConfig {
                deep_threshold: config.deep_threshold,
                lookback_days: config.lookback_days,
                deep_max_concurrent: config.deep_max_concurrent,
            },
        ));

        info!("engine initialized");
        Ok(Self {
            router,
            graph,
            search,
            market,
            breakers,
            metrics,
            cache,
        })
    }

    /// Per-backend readiness plus breaker states, for `/health/ready`.
    pub async fn readiness(&self) -> Value {
        let (graph_ready, search_ready, market_ready) = tokio::join!(
            self.graph.ready(),
            self.search.ready(),
            self.market.ready()
        );

        let breakers: Vec<Value> = self
            .breakers
            .snapshots()
            .await
            .into_iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "state": s.state.to_string(),
                    "consecutive_failures": s.consecutive_failures,
                })
            })
            .collect();

        json!({
            "backends": {
                "graph": graph_ready,
                "search": search_ready,
                "market": market_ready,
            },
            "breakers": breakers,
            "degradation": self.breakers.degradation_level().await,
        })
    }

    /// Bounded drain: wait for in-flight requests, persist cache entries
    /// worth keeping, then let pools drop.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        let deadline = std::time::Instant::now() + drain_timeout;
        loop {
            let active = self.metrics.active_requests.load(Ordering::Relaxed);
            if active <= 0 {
                break;
            }
            if std::time::Instant::now() >= deadline {
                warn!(active, "drain timeout reached with requests in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let flushed = self.cache.flush_to_disk().await;
        if flushed > 0 {
            info!(flushed, "cache entries persisted to disk tier");
        }
        info!("engine shut down");
    }
}
