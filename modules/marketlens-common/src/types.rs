use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// --- Intent & Query ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    NewsInquiry,
    StockAnalysis,
    Comparison,
    Trend,
    GeneralQa,
    Unknown,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::NewsInquiry => write!(f, "news_inquiry"),
            Intent::StockAnalysis => write!(f, "stock_analysis"),
            Intent::Comparison => write!(f, "comparison"),
            Intent::Trend => write!(f, "trend"),
            Intent::GeneralQa => write!(f, "general_qa"),
            Intent::Unknown => write!(f, "unknown"),
        }
    }
}

/// Entities extracted from a query. BTreeSet keeps iteration deterministic
/// so keyword lists and cache fingerprints are stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    pub companies: BTreeSet<String>,
    pub products: BTreeSet<String>,
    pub sectors: BTreeSet<String>,
    pub tickers: BTreeSet<String>,
}

impl Entities {
    pub fn company_count(&self) -> usize {
        self.companies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
            && self.products.is_empty()
            && self.sectors.is_empty()
            && self.tickers.is_empty()
    }
}

/// A classified query: original text plus everything derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub keywords: Vec<String>,
    pub entities: Entities,
    pub intent: Intent,
    pub confidence: f32,
}

// --- Analysis depth ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    Shallow,
    #[default]
    Standard,
    Deep,
    Comprehensive,
}

impl AnalysisDepth {
    /// Depth classification from a complexity score in [0,1].
    pub fn from_score(score: f32) -> Self {
        if score >= 0.9 {
            AnalysisDepth::Comprehensive
        } else if score >= 0.85 {
            AnalysisDepth::Deep
        } else if score >= 0.7 {
            AnalysisDepth::Standard
        } else {
            AnalysisDepth::Shallow
        }
    }

    /// Overall deep-path deadline for this depth.
    pub fn timeout(&self) -> std::time::Duration {
        let secs = match self {
            AnalysisDepth::Shallow => 60,
            AnalysisDepth::Standard => 90,
            AnalysisDepth::Deep => 120,
            AnalysisDepth::Comprehensive => 180,
        };
        std::time::Duration::from_secs(secs)
    }

    /// Context cap applied by cross-validation.
    pub fn max_contexts(&self) -> usize {
        match self {
            AnalysisDepth::Shallow => 20,
            AnalysisDepth::Standard => 40,
            AnalysisDepth::Deep => 80,
            AnalysisDepth::Comprehensive => 150,
        }
    }
}

impl std::fmt::Display for AnalysisDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisDepth::Shallow => write!(f, "shallow"),
            AnalysisDepth::Standard => write!(f, "standard"),
            AnalysisDepth::Deep => write!(f, "deep"),
            AnalysisDepth::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

impl std::str::FromStr for AnalysisDepth {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shallow" => Ok(AnalysisDepth::Shallow),
            "standard" => Ok(AnalysisDepth::Standard),
            "deep" => Ok(AnalysisDepth::Deep),
            "comprehensive" => Ok(AnalysisDepth::Comprehensive),
            _ => Err(()),
        }
    }
}

// --- Context items ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Graph,
    Search,
    Market,
}

impl ContextSource {
    /// Relative trust weight used by the relevance cascade.
    pub fn weight(&self) -> f32 {
        match self {
            ContextSource::Graph => 1.3,
            ContextSource::Search => 1.0,
            ContextSource::Market => 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    News,
    Company,
    Event,
    Financial,
    Analysis,
    Stock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OntologyStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[default]
    Unknown,
}

/// The unit of retrieved evidence. Upstream backends may or may not supply
/// the hybrid-quality fields; the context engineer computes fallbacks when
/// they are absent, so downstream code can rely on them unconditionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub source: ContextSource,
    pub item_type: ContextType,
    pub content: Map<String, Value>,
    pub timestamp: Option<DateTime<Utc>>,
    pub confidence: f32,
    pub relevance: f32,

    // Backend-supplied quality metadata (optional upstream)
    pub quality_score: Option<f32>,
    pub is_featured: bool,
    pub synced: bool,
    pub ontology_status: OntologyStatus,
    pub graph_degree: u32,
    pub event_chain_id: Option<String>,

    // Scores populated during context engineering
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_score: Option<f32>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl ContextItem {
    pub fn new(source: ContextSource, item_type: ContextType, content: Map<String, Value>) -> Self {
        Self {
            source,
            item_type,
            content,
            timestamp: None,
            confidence: 0.5,
            relevance: 0.0,
            quality_score: None,
            is_featured: false,
            synced: false,
            ontology_status: OntologyStatus::Unknown,
            graph_degree: 0,
            event_chain_id: None,
            source_weight: None,
            recency_score: None,
            semantic_score: None,
            metadata_score: None,
            embedding: None,
        }
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(|v| v.as_str())
    }

    pub fn title(&self) -> &str {
        self.str_field("title")
            .or_else(|| self.str_field("name"))
            .unwrap_or("")
    }

    pub fn summary(&self) -> &str {
        self.str_field("summary")
            .or_else(|| self.str_field("content"))
            .unwrap_or("")
    }

    /// Title + summary, the text used for embeddings and keyword matching.
    pub fn text(&self) -> String {
        let title = self.title();
        let summary = self.summary();
        if summary.is_empty() {
            title.to_string()
        } else {
            format!("{title} {summary}")
        }
    }
}

// --- Backend rows ---

/// One row from the graph backend, flattened to properties + labels + a
/// comparable instant. Raw driver objects never leave the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRow {
    pub properties: Map<String, Value>,
    pub labels: Vec<String>,
    pub ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsHit {
    pub id: String,
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub score: f32,
    #[serde(default)]
    pub highlights: Vec<String>,
    /// Remaining upstream fields (quality_score, is_featured, synced, ...).
    /// Optional per-item metadata is carried through untouched; its absence
    /// must never break the pipeline.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub symbol: String,
    pub last: f64,
    pub change: f64,
    pub change_pct: f64,
    pub volume: u64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub symbol: String,
    pub name: String,
}

// --- Deep analysis artifacts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisApproach {
    #[default]
    Balanced,
    Quantitative,
    Qualitative,
    Temporal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisPlan {
    #[serde(default)]
    pub primary_focus: Vec<String>,
    #[serde(default)]
    pub comparison_axes: Vec<String>,
    #[serde(default)]
    pub required_data_types: Vec<ContextType>,
    #[serde(default)]
    pub key_questions: Vec<String>,
    #[serde(default)]
    pub approach: AnalysisApproach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Quantitative,
    #[default]
    Qualitative,
    Temporal,
    Comparative,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: InsightKind,
    pub finding: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub significance: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    NewsEntity,
    FinancialNews,
    EventMarket,
    SupplyChain,
    #[default]
    Competitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type", default)]
    pub kind: RelationshipKind,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub impact: Impact,
    #[serde(default)]
    pub implication: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhySection {
    #[serde(default)]
    pub causes: Vec<String>,
    #[serde(default)]
    pub analysis: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HowSection {
    #[serde(default)]
    pub mechanisms: Vec<String>,
    #[serde(default)]
    pub analysis: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub probability: String,
    #[serde(default)]
    pub impact: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatIfSection {
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoWhatSection {
    #[serde(default)]
    pub investor_implications: String,
    #[serde(default)]
    pub actionable: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepReasoning {
    #[serde(default)]
    pub why: WhySection,
    #[serde(default)]
    pub how: HowSection,
    #[serde(default)]
    pub what_if: WhatIfSection,
    #[serde(default)]
    pub so_what: SoWhatSection,
}

impl DeepReasoning {
    /// A reasoning block counts as present when any quadrant has content.
    pub fn is_populated(&self) -> bool {
        !self.why.causes.is_empty()
            || !self.how.mechanisms.is_empty()
            || !self.what_if.scenarios.is_empty()
            || !self.so_what.investor_implications.is_empty()
    }
}

// --- Response envelope ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Full,
    Degraded,
    Minimal,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub processing_time_ms: u64,
    pub intent: Intent,
    pub confidence: f32,
    pub complexity_score: f32,
    pub analysis_depth: AnalysisDepth,
    pub processing_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub fallback_used: bool,
    pub graph_samples_shown: usize,
    pub degradation: DegradationLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub response_type: String,
    pub markdown: String,
    pub sources: Vec<Citation>,
    pub graph_samples: Vec<GraphRow>,
    pub meta: ResponseMeta,
}

// --- Requests ---

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub force_deep: bool,
}

fn default_lookback_days() -> u32 {
    180
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub query: String,
    #[serde(default)]
    pub analysis_depth: Option<AnalysisDepth>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_thresholds() {
        assert_eq!(AnalysisDepth::from_score(0.0), AnalysisDepth::Shallow);
        assert_eq!(AnalysisDepth::from_score(0.69), AnalysisDepth::Shallow);
        assert_eq!(AnalysisDepth::from_score(0.7), AnalysisDepth::Standard);
        assert_eq!(AnalysisDepth::from_score(0.85), AnalysisDepth::Deep);
        assert_eq!(AnalysisDepth::from_score(0.89), AnalysisDepth::Deep);
        assert_eq!(AnalysisDepth::from_score(0.9), AnalysisDepth::Comprehensive);
        assert_eq!(AnalysisDepth::from_score(1.0), AnalysisDepth::Comprehensive);
    }

    #[test]
    fn depth_timeouts_match_config() {
        assert_eq!(AnalysisDepth::Shallow.timeout().as_secs(), 60);
        assert_eq!(AnalysisDepth::Comprehensive.timeout().as_secs(), 180);
    }

    #[test]
    fn context_item_text_joins_title_and_summary() {
        let mut content = Map::new();
        content.insert("title".into(), Value::String("삼성전자 실적".into()));
        content.insert("summary".into(), Value::String("영업이익 증가".into()));
        let item = ContextItem::new(ContextSource::Search, ContextType::News, content);
        assert_eq!(item.text(), "삼성전자 실적 영업이익 증가");
    }

    #[test]
    fn deep_reasoning_default_is_unpopulated() {
        assert!(!DeepReasoning::default().is_populated());
    }

    #[test]
    fn insight_parses_with_missing_optionals() {
        let insight: Insight =
            serde_json::from_str(r#"{"title": "t", "finding": "f"}"#).unwrap();
        assert_eq!(insight.confidence, 0.5);
        assert!(insight.evidence.is_empty());
    }
}
