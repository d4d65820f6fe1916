//! Scoring constants shared between the context engineer and the deep
//! workflow's quality check. Tunable, but tests assert invariants
//! (monotonicity, additivity) rather than exact values.

/// Confidence floor below which items are dropped in the relevance cascade.
pub const CONFIDENCE_FLOOR: f32 = 0.3;

/// Half-life in days for the recency decay applied to retrieved items.
pub const RECENCY_HALF_LIFE_DAYS: f64 = 60.0;

/// Minimum pairwise dissimilarity enforced in diversity mode.
pub const DIVERSITY_TAU: f32 = 0.15;

/// Cosine similarity at or above which two items count as near-duplicates.
pub const NEAR_DUP_THRESHOLD: f32 = 0.85;

/// Sliding window width for near-duplicate detection.
pub const NEAR_DUP_WINDOW: usize = 5;

/// Items kept after the semantic filter (before rerank/prune).
pub const SEMANTIC_TOP_M: usize = 50;

/// Items kept after final pruning.
pub const FINAL_PRUNE_LIMIT: usize = 30;

/// Bonus folded into confidence for editorially featured items.
pub const FEATURED_BONUS: f32 = 0.3;

/// Bonus folded into confidence for items already synced into the graph.
pub const SYNCED_BONUS: f32 = 0.2;

/// Report quality below this triggers one enhancement pass.
pub const QUALITY_RETRY_FLOOR: f32 = 0.4;

// Reranker weights. base + schema + plan = 1.0.
pub const W_SEMANTIC: f32 = 0.30;
pub const W_SOURCE: f32 = 0.12;
pub const W_RECENCY: f32 = 0.08;
pub const W_QUALITY: f32 = 0.15;
pub const W_FEATURED: f32 = 0.10;
pub const W_SYNCED: f32 = 0.05;
pub const W_DEGREE_CAP: f32 = 0.10;
pub const W_PLAN: f32 = 0.20;
