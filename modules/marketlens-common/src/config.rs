use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j (bolt protocol via neo4rs driver)
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub neo4j_database: String,
    pub graph_timeout_ms: u64,

    // OpenSearch news index
    pub opensearch_url: String,
    pub opensearch_user: String,
    pub opensearch_password: String,
    pub news_index: String,
    pub search_timeout_ms: u64,

    // Market data feed
    pub market_api_url: String,
    pub market_timeout_ms: u64,

    // Language models (two-model strategy: small for the fast path,
    // larger for the deep workflow) and embeddings, all via Ollama
    pub ollama_base_url: String,
    pub chat_model: String,
    pub report_model: String,
    pub embed_model: String,
    pub embed_dim: usize,
    pub llm_timeout_ms: u64,

    // Cache tiers
    pub cache_l1_max_items: usize,
    pub cache_l1_max_mb: usize,
    pub cache_l1_ttl_s: u64,
    pub cache_l2_enabled: bool,
    pub cache_l2_url: Option<String>,
    pub cache_l2_prefix: String,
    pub cache_l2_ttl_s: u64,
    pub cache_l3_enabled: bool,
    pub cache_l3_dir: std::path::PathBuf,
    pub cache_l3_max_gb: f64,
    pub cache_l3_ttl_s: u64,

    // Router
    pub deep_threshold: f32,
    pub deep_max_concurrent: usize,

    // Breakers (shared defaults, per-backend override via BREAKER_<NAME>_*)
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_s: u64,
    pub breaker_half_open_probes: u32,
    pub breaker_call_timeout_s: u64,

    // Retry
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    // Context engineering
    pub lookback_days: u32,
    /// Label → searchable attribute list, JSON override via GRAPH_SEARCH_KEYS.
    pub graph_search_keys: Vec<(String, Vec<String>)>,

    // Optional tracing sink
    pub trace_url: Option<String>,
    pub trace_secret: Option<String>,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            neo4j_uri: required_env("NEO4J_URI"),
            neo4j_user: required_env("NEO4J_USER"),
            neo4j_password: required_env("NEO4J_PASSWORD"),
            neo4j_database: env::var("NEO4J_DATABASE").unwrap_or_else(|_| "neo4j".to_string()),
            graph_timeout_ms: env_u64("GRAPH_TIMEOUT_MS", 5_000),

            opensearch_url: required_env("OPENSEARCH_URL"),
            opensearch_user: env::var("OPENSEARCH_USER").unwrap_or_default(),
            opensearch_password: env::var("OPENSEARCH_PASSWORD").unwrap_or_default(),
            news_index: env::var("NEWS_INDEX").unwrap_or_else(|_| "news_articles".to_string()),
            search_timeout_ms: env_u64("SEARCH_TIMEOUT_MS", 5_000),

            market_api_url: env::var("MARKET_API_URL").unwrap_or_default(),
            market_timeout_ms: env_u64("MARKET_TIMEOUT_MS", 3_000),

            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "llama3.1:8b".to_string()),
            report_model: env::var("REPORT_MODEL").unwrap_or_else(|_| "qwen2.5:32b".to_string()),
            embed_model: env::var("EMBED_MODEL").unwrap_or_else(|_| "bge-m3".to_string()),
            embed_dim: env_u64("EMBED_DIM", 1024) as usize,
            llm_timeout_ms: env_u64("LLM_TIMEOUT_MS", 45_000),

            cache_l1_max_items: env_u64("CACHE_L1_MAX_ITEMS", 512) as usize,
            cache_l1_max_mb: env_u64("CACHE_L1_MAX_MB", 100) as usize,
            cache_l1_ttl_s: env_u64("CACHE_L1_TTL_S", 600),
            cache_l2_enabled: env_bool("CACHE_L2_ENABLED", false),
            cache_l2_url: env::var("CACHE_L2_URL").ok(),
            cache_l2_prefix: env::var("CACHE_L2_PREFIX")
                .unwrap_or_else(|_| "marketlens:".to_string()),
            cache_l2_ttl_s: env_u64("CACHE_L2_TTL_S", 3_600),
            cache_l3_enabled: env_bool("CACHE_L3_ENABLED", false),
            cache_l3_dir: std::path::PathBuf::from(
                env::var("CACHE_L3_DIR").unwrap_or_else(|_| "data/cache".to_string()),
            ),
            cache_l3_max_gb: env::var("CACHE_L3_MAX_GB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            cache_l3_ttl_s: env_u64("CACHE_L3_TTL_S", 86_400),

            deep_threshold: env::var("ROUTER_DEEP_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.85),
            deep_max_concurrent: env_u64("DEEP_MAX_CONCURRENT", 4) as usize,

            breaker_failure_threshold: env_u64("BREAKER_FAILURE_THRESHOLD", 5) as u32,
            breaker_recovery_s: env_u64("BREAKER_RECOVERY_S", 60),
            breaker_half_open_probes: env_u64("BREAKER_HALF_OPEN_PROBES", 3) as u32,
            breaker_call_timeout_s: env_u64("BREAKER_CALL_TIMEOUT_S", 10),

            retry_max_attempts: env_u64("RETRY_MAX_ATTEMPTS", 3) as u32,
            retry_initial_delay_ms: env_u64("RETRY_INITIAL_DELAY_MS", 200),
            retry_max_delay_ms: env_u64("RETRY_MAX_DELAY_MS", 5_000),

            lookback_days: env_u64("LOOKBACK_DAYS", 180) as u32,
            graph_search_keys: parse_graph_search_keys(
                env::var("GRAPH_SEARCH_KEYS").ok().as_deref(),
            ),

            trace_url: env::var("TRACE_URL").ok(),
            trace_secret: env::var("TRACE_SECRET").ok(),

            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
        }
    }

    pub fn graph_timeout(&self) -> Duration {
        Duration::from_millis(self.graph_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn market_timeout(&self) -> Duration {
        Duration::from_millis(self.market_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }

    /// Log lengths of sensitive values without exposing them.
    pub fn log_redacted(&self) {
        let vars = [
            ("NEO4J_URI", &self.neo4j_uri),
            ("NEO4J_PASSWORD", &self.neo4j_password),
            ("OPENSEARCH_URL", &self.opensearch_url),
            ("OPENSEARCH_PASSWORD", &self.opensearch_password),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

/// Default label → searchable-attribute map for the Cypher builder.
/// Direct attribute access keeps Neo4j text indexes usable.
pub fn default_graph_search_keys() -> Vec<(String, Vec<String>)> {
    [
        ("Company", vec!["name", "aliases"]),
        ("News", vec!["title", "summary"]),
        ("Event", vec!["title", "description"]),
        ("Technology", vec!["name"]),
        ("Theme", vec!["name"]),
        ("Program", vec!["name"]),
        ("Agency", vec!["name"]),
    ]
    .into_iter()
    .map(|(label, keys)| {
        (
            label.to_string(),
            keys.into_iter().map(|k| k.to_string()).collect(),
        )
    })
    .collect()
}

fn parse_graph_search_keys(raw: Option<&str>) -> Vec<(String, Vec<String>)> {
    let Some(raw) = raw else {
        return default_graph_search_keys();
    };
    match serde_json::from_str::<std::collections::BTreeMap<String, Vec<String>>>(raw) {
        Ok(map) if !map.is_empty() => map.into_iter().collect(),
        _ => {
            tracing::warn!("GRAPH_SEARCH_KEYS is not a valid label map, using defaults");
            default_graph_search_keys()
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}
