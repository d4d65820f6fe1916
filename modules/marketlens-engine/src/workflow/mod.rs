//! The deep-analysis pipeline: a strictly forward DAG of ten nodes, each
//! mutating one field of the workflow state. Node failures append a
//! diagnostic and the workflow continues on whatever state exists.

pub mod json;
mod nodes;
mod quality_check;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use ai_client::{ChatModel, EmbedModel, GenerateOptions};
use marketlens_common::{
    AnalysisDepth, AnalysisPlan, ContextItem, DeepReasoning, EngineError, EngineResult, Entities,
    GraphRow, Insight, Query, Relationship,
};

use crate::breaker::{BreakerRegistry, BACKEND_LLM};
use crate::cache::MultiLevelCache;
use crate::context::ContextEngineer;
use crate::fetcher::ParallelFetcher;
use crate::observability::{StageTimings, Tracer};

pub use quality_check::compute_quality;

/// Structured output of the analyze_query node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryAnalysis {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub complexity: AnalysisDepth,
    #[serde(default)]
    pub analysis_requirements: Vec<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default = "default_output_type")]
    pub expected_output_type: String,
}

fn default_output_type() -> String {
    "standard".to_string()
}

#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub depth: AnalysisDepth,
    pub lookback_days: u32,
    pub domain: Option<String>,
    pub symbol: Option<String>,
}

/// Single mutable record threaded through the DAG. Each node owns exactly
/// one field; downstream nodes read what upstream wrote.
pub struct WorkflowState {
    pub query: Query,
    pub request: WorkflowRequest,
    pub query_analysis: Option<QueryAnalysis>,
    pub analysis_plan: Option<AnalysisPlan>,
    pub contexts: Vec<ContextItem>,
    pub graph_samples: Vec<GraphRow>,
    pub diversity_score: f32,
    pub insights: Vec<Insight>,
    pub relationships: Vec<Relationship>,
    pub deep_reasoning: Option<DeepReasoning>,
    pub draft_report: String,
    pub quality_score: f32,
    pub retry_count: u32,
    pub timings: StageTimings,
    pub diagnostics: Vec<String>,
    pub partial: bool,
}

impl WorkflowState {
    pub fn new(query: Query, request: WorkflowRequest) -> Self {
        Self {
            query,
            request,
            query_analysis: None,
            analysis_plan: None,
            contexts: Vec::new(),
            graph_samples: Vec::new(),
            diversity_score: 0.0,
            insights: Vec::new(),
            relationships: Vec::new(),
            deep_reasoning: None,
            draft_report: String::new(),
            quality_score: 0.0,
            retry_count: 0,
            timings: StageTimings::new(),
            diagnostics: Vec::new(),
            partial: false,
        }
    }

    pub fn diagnose(&mut self, node: &str, detail: impl std::fmt::Display) {
        warn!(node, %detail, "workflow node degraded");
        self.diagnostics.push(format!("{node}: {detail}"));
    }
}

/// Streaming events emitted by the runner; the transport adapter maps them
/// onto server-sent events one-to-one.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Progress {
        node: String,
        progress: f32,
        message: String,
    },
    Step {
        node: String,
        elapsed_ms: u64,
        counters: Value,
    },
    Data(Value),
    Final(Value),
    Error {
        message: String,
    },
    Done,
}

/// Node name → cumulative completion fraction for progress reporting.
pub const NODE_PROGRESS: &[(&str, f32)] = &[
    ("analyze_query", 0.08),
    ("plan_analysis", 0.12),
    ("collect_parallel_data", 0.18),
    ("apply_context_engineering", 0.25),
    ("cross_validate_contexts", 0.30),
    ("generate_insights", 0.45),
    ("analyze_relationships", 0.60),
    ("deep_reasoning", 0.75),
    ("synthesize_report", 0.85),
    ("quality_check", 0.95),
    ("enhance_report", 1.0),
];

fn progress_for(node: &str) -> f32 {
    NODE_PROGRESS
        .iter()
        .find(|(n, _)| *n == node)
        .map(|(_, p)| *p)
        .unwrap_or(0.0)
}

/// Per-node LM budget cap. The effective budget is the smaller of this and
/// the remaining workflow deadline.
const NODE_LLM_CAP: std::time::Duration = std::time::Duration::from_secs(45);

/// Minimum LM budget worth attempting; below this the node degrades
/// immediately instead of starting a doomed call.
const MIN_LLM_BUDGET: std::time::Duration = std::time::Duration::from_secs(2);

pub struct DeepWorkflow {
    pub(crate) report_model: Arc<dyn ChatModel>,
    pub(crate) embedder: Option<Arc<dyn EmbedModel>>,
    pub(crate) fetcher: Arc<ParallelFetcher>,
    pub(crate) engineer: Arc<ContextEngineer>,
    pub(crate) cache: Arc<MultiLevelCache>,
    pub(crate) breakers: Arc<BreakerRegistry>,
    pub(crate) tracer: Arc<dyn Tracer>,
}

impl DeepWorkflow {
    pub fn new(
        report_model: Arc<dyn ChatModel>,
        embedder: Option<Arc<dyn EmbedModel>>,
        fetcher: Arc<ParallelFetcher>,
        engineer: Arc<ContextEngineer>,
        cache: Arc<MultiLevelCache>,
        breakers: Arc<BreakerRegistry>,
        tracer: Arc<dyn Tracer>,
    ) -> Self {
        Self {
            report_model,
            embedder,
            fetcher,
            engineer,
            cache,
            breakers,
            tracer,
        }
    }

    /// Run the full DAG. The caller owns the overall deadline (the router
    /// wraps this in a timeout); nodes size their LM budgets from
    /// `deadline` so a late node cannot overrun it.
    pub async fn run(
        &self,
        mut state: WorkflowState,
        events: Option<mpsc::Sender<WorkflowEvent>>,
    ) -> WorkflowState {
        let deadline = Instant::now() + state.request.depth.timeout();
        let emitter = EventEmitter { sender: events };

        macro_rules! node {
            ($name:expr, $call:expr) => {{
                emitter
                    .progress($name, &format!("{} 시작", $name))
                    .await;
                let started = Instant::now();
                $call;
                let elapsed = started.elapsed();
                state.timings.record($name, elapsed);
                emitter
                    .step($name, elapsed.as_millis() as u64, counters(&state))
                    .await;
            }};
        }

        node!("analyze_query", self.analyze_query(&mut state, deadline).await);
        node!("plan_analysis", self.plan_analysis(&mut state, deadline).await);
        node!(
            "collect_parallel_data",
            self.collect_parallel_data(&mut state).await
        );
        node!(
            "apply_context_engineering",
            self.apply_context_engineering(&mut state).await
        );
        node!(
            "cross_validate_contexts",
            nodes::cross_validate_contexts(&mut state)
        );
        node!(
            "generate_insights",
            self.generate_insights(&mut state, deadline).await
        );
        node!(
            "analyze_relationships",
            self.analyze_relationships(&mut state, deadline).await
        );
        node!("deep_reasoning", self.deep_reasoning(&mut state, deadline).await);
        node!(
            "synthesize_report",
            self.synthesize_report(&mut state, deadline).await
        );
        node!("quality_check", nodes::quality_check(&mut state));

        if state.quality_score < marketlens_common::quality::QUALITY_RETRY_FLOOR
            && state.retry_count < 1
        {
            state.retry_count += 1;
            node!("enhance_report", self.enhance_report(&mut state, deadline).await);
            node!("quality_check", nodes::quality_check(&mut state));
        }

        info!(
            quality = state.quality_score,
            contexts = state.contexts.len(),
            insights = state.insights.len(),
            relationships = state.relationships.len(),
            diagnostics = state.diagnostics.len(),
            "deep workflow complete"
        );

        emitter
            .finish(json!({
                "quality_score": state.quality_score,
                "contexts_count": state.contexts.len(),
                "insights_count": state.insights.len(),
                "relationships_count": state.relationships.len(),
                "retry_count": state.retry_count,
            }))
            .await;

        state
    }

    /// One LM call bounded by the node cap and the remaining deadline, and
    /// guarded by the llm breaker. Degrades to an error well before the
    /// workflow deadline would be overrun.
    pub(crate) async fn llm_call(&self, stage: &str, prompt: &str, deadline: Instant) -> EngineResult<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining < MIN_LLM_BUDGET {
            return Err(EngineError::timeout("llm", 0));
        }
        let budget = remaining.min(NODE_LLM_CAP);

        self.tracer.record(
            stage,
            json!({"model": self.report_model.model_name(), "budget_ms": budget.as_millis() as u64}),
        );

        let opts = GenerateOptions::default().with_timeout(budget);
        let breaker = self.breakers.get(BACKEND_LLM);
        let started = Instant::now();
        let result = breaker.call(self.report_model.generate(prompt, &opts)).await;

        self.tracer.record(
            stage,
            json!({"elapsed_ms": started.elapsed().as_millis() as u64, "ok": result.is_ok()}),
        );
        result
    }
}

fn counters(state: &WorkflowState) -> Value {
    json!({
        "contexts": state.contexts.len(),
        "insights": state.insights.len(),
        "relationships": state.relationships.len(),
        "quality_score": state.quality_score,
    })
}

struct EventEmitter {
    sender: Option<mpsc::Sender<WorkflowEvent>>,
}

impl EventEmitter {
    async fn progress(&self, node: &str, message: &str) {
        if let Some(sender) = &self.sender {
            let _ = sender
                .send(WorkflowEvent::Progress {
                    node: node.to_string(),
                    progress: progress_for(node),
                    message: message.to_string(),
                })
                .await;
        }
    }

    async fn step(&self, node: &str, elapsed_ms: u64, counters: Value) {
        if let Some(sender) = &self.sender {
            let _ = sender
                .send(WorkflowEvent::Step {
                    node: node.to_string(),
                    elapsed_ms,
                    counters,
                })
                .await;
        }
    }

    async fn finish(&self, summary: Value) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(WorkflowEvent::Data(summary)).await;
        }
    }
}
