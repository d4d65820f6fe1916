//! Query routing: classify, score, dispatch to the fast path or the deep
//! workflow under a bounded timeout, and never return a raw error for
//! anything the fast path can still answer.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use marketlens_common::{
    AnalysisDepth, ChatRequest, DegradationLevel, EngineError, EngineResult, Intent, Query,
    ReportRequest, Response, ResponseMeta,
};

use crate::breaker::BreakerRegistry;
use crate::complexity;
use crate::formatter;
use crate::handlers::{self, FastDeps, HandlerOutput};
use crate::intent::IntentClassifier;
use crate::observability::Metrics;
use crate::workflow::{DeepWorkflow, WorkflowEvent, WorkflowRequest, WorkflowState};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub deep_threshold: f32,
    pub lookback_days: u32,
    pub deep_max_concurrent: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            deep_threshold: 0.85,
            lookback_days: 180,
            deep_max_concurrent: 4,
        }
    }
}

pub struct QueryRouter {
    classifier: IntentClassifier,
    fast: FastDeps,
    workflow: Arc<DeepWorkflow>,
    deep_gate: Arc<Semaphore>,
    breakers: Arc<BreakerRegistry>,
    pub metrics: Arc<Metrics>,
    config: RouterConfig,
}

impl QueryRouter {
    pub fn new(
        fast: FastDeps,
        workflow: Arc<DeepWorkflow>,
        breakers: Arc<BreakerRegistry>,
        metrics: Arc<Metrics>,
        config: RouterConfig,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            deep_gate: Arc::new(Semaphore::new(config.deep_max_concurrent)),
            fast,
            workflow,
            breakers,
            metrics,
            config,
        }
    }

    /// Main entry point. Fails only on validation; every other failure is
    /// degraded into a structured response.
    pub async fn route(&self, request: &ChatRequest) -> EngineResult<Response> {
        let started = Instant::now();
        if request.query.trim().is_empty() {
            return Err(EngineError::Validation("query must not be empty".into()));
        }

        self.metrics.active_requests.fetch_add(1, Ordering::Relaxed);
        let result = self.route_inner(request, started).await;
        self.metrics.active_requests.fetch_sub(1, Ordering::Relaxed);
        self.metrics.response_seconds.observe(started.elapsed());
        result
    }

    async fn route_inner(
        &self,
        request: &ChatRequest,
        started: Instant,
    ) -> EngineResult<Response> {
        let query = self.classifier.classify(&request.query);
        self.metrics.record_intent(query.intent);

        let score = complexity::score(&query, request.force_deep);
        let depth = AnalysisDepth::from_score(score);
        let go_deep = score >= self.config.deep_threshold
            || request.force_deep
            || complexity::has_deep_marker(&query.text);

        info!(
            intent = %query.intent,
            confidence = query.confidence,
            complexity = score,
            depth = %depth,
            deep = go_deep,
            "routing decision"
        );

        let degradation = self.breakers.degradation_level().await;
        if degradation == DegradationLevel::Emergency {
            return Ok(self.emergency_response(&query, score, depth, started).await);
        }

        if go_deep {
            match self.try_deep(&query, score, depth, None, started).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(error = %e, "deep path failed, falling back to fast handler");
                    self.metrics.queries_fallback.fetch_add(1, Ordering::Relaxed);
                    let mut response = self
                        .fast_response(&query, score, depth, started, "deep_fallback")
                        .await;
                    response.meta.fallback_used = true;
                    response.meta.partial = true;
                    return Ok(response);
                }
            }
        }

        self.metrics.queries_fast.fetch_add(1, Ordering::Relaxed);
        Ok(self.fast_response(&query, score, depth, started, "fast").await)
    }

    /// Synchronous deep-analysis request: explicit depth and parameters,
    /// same fallback contract as deep routing.
    pub async fn report(&self, request: &ReportRequest) -> EngineResult<Response> {
        let started = Instant::now();
        if request.query.trim().is_empty() {
            return Err(EngineError::Validation("query must not be empty".into()));
        }

        let query = self.classifier.classify(&request.query);
        let score = complexity::score(&query, true);
        let depth = request.analysis_depth.unwrap_or(AnalysisDepth::Standard);
        let workflow_request = WorkflowRequest {
            depth,
            lookback_days: request.lookback_days,
            domain: request.domain.clone(),
            symbol: request.symbol.clone(),
        };

        match self
            .try_deep(&query, score, depth, Some(workflow_request), started)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(error = %e, "report generation failed, fast fallback");
                let mut response = self
                    .fast_response(&query, score, depth, started, "deep_fallback")
                    .await;
                response.meta.fallback_used = true;
                response.meta.partial = true;
                Ok(response)
            }
        }
    }

    /// Streaming deep analysis. Events arrive on the returned channel; the
    /// final response is delivered as a `Final` event before `Done`.
    pub fn stream_report(
        self: &Arc<Self>,
        request: ReportRequest,
    ) -> mpsc::Receiver<WorkflowEvent> {
        let (tx, rx) = mpsc::channel(32);
        let router = Arc::clone(self);

        tokio::spawn(async move {
            let started = Instant::now();
            if request.query.trim().is_empty() {
                let _ = tx
                    .send(WorkflowEvent::Error {
                        message: "query must not be empty".into(),
                    })
                    .await;
                let _ = tx.send(WorkflowEvent::Done).await;
                return;
            }

            let query = router.classifier.classify(&request.query);
            let score = complexity::score(&query, true);
            let depth = request.analysis_depth.unwrap_or(AnalysisDepth::Standard);
            let workflow_request = WorkflowRequest {
                depth,
                lookback_days: request.lookback_days,
                domain: request.domain.clone(),
                symbol: request.symbol.clone(),
            };

            let outcome = router
                .run_deep_with_events(&query, score, depth, workflow_request, started, tx.clone())
                .await;

            match outcome {
                Ok(response) => {
                    let payload = serde_json::to_value(&response).unwrap_or_default();
                    let _ = tx.send(WorkflowEvent::Final(payload)).await;
                }
                Err(e) => {
                    let _ = tx
                        .send(WorkflowEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
            let _ = tx.send(WorkflowEvent::Done).await;
        });

        rx
    }

    async fn try_deep(
        &self,
        query: &Query,
        score: f32,
        depth: AnalysisDepth,
        explicit: Option<WorkflowRequest>,
        started: Instant,
    ) -> EngineResult<Response> {
        let workflow_request = explicit.unwrap_or(WorkflowRequest {
            depth,
            lookback_days: self.config.lookback_days,
            domain: None,
            symbol: None,
        });

        // Admission control: refuse above the soft cap; the caller renders
        // the refusal through the fast path.
        let _permit = self
            .deep_gate
            .clone()
            .try_acquire_owned()
            .map_err(|_| EngineError::Overload { retry_after_s: 30 })?;

        let state = WorkflowState::new(query.clone(), workflow_request);
        let deadline = depth.timeout();
        let state = tokio::time::timeout(deadline, self.workflow.run(state, None))
            .await
            .map_err(|_| EngineError::timeout("deep_workflow", deadline.as_millis() as u64))?;

        self.deep_state_to_response(state, score, depth, started)
            .await
    }

    async fn run_deep_with_events(
        &self,
        query: &Query,
        score: f32,
        depth: AnalysisDepth,
        workflow_request: WorkflowRequest,
        started: Instant,
        events: mpsc::Sender<WorkflowEvent>,
    ) -> EngineResult<Response> {
        let _permit = self
            .deep_gate
            .clone()
            .try_acquire_owned()
            .map_err(|_| EngineError::Overload { retry_after_s: 30 })?;

        let state = WorkflowState::new(query.clone(), workflow_request);
        let deadline = depth.timeout();
        let state = tokio::time::timeout(deadline, self.workflow.run(state, Some(events)))
            .await
            .map_err(|_| EngineError::timeout("deep_workflow", deadline.as_millis() as u64))?;

        self.deep_state_to_response(state, score, depth, started)
            .await
    }

    async fn deep_state_to_response(
        &self,
        state: WorkflowState,
        score: f32,
        depth: AnalysisDepth,
        started: Instant,
    ) -> EngineResult<Response> {
        // A deep run that produced no analytical substance is a failure;
        // the fast path gives a better answer than an empty report.
        let has_substance = !state.insights.is_empty()
            || !state.relationships.is_empty()
            || state
                .deep_reasoning
                .as_ref()
                .map(|r| r.is_populated())
                .unwrap_or(false);
        if !has_substance {
            return Err(EngineError::Upstream(
                "deep workflow produced no insights, relationships, or reasoning".into(),
            ));
        }

        self.metrics.queries_deep.fetch_add(1, Ordering::Relaxed);
        for (_, elapsed) in state.timings.stages() {
            self.metrics.stage_seconds.observe(*elapsed);
        }

        let sources = formatter::citations_from_items(&state.contexts);
        let graph_samples = formatter::trim_graph_samples(&state.graph_samples);
        let markdown = formatter::render_deep_report(&state, &sources);

        Ok(Response {
            response_type: "deep_report".to_string(),
            markdown,
            meta: ResponseMeta {
                processing_time_ms: started.elapsed().as_millis() as u64,
                intent: state.query.intent,
                confidence: state.query.confidence,
                complexity_score: score,
                analysis_depth: depth,
                processing_method: "deep".to_string(),
                quality_score: Some(state.quality_score),
                partial: state.partial,
                fallback_used: false,
                graph_samples_shown: graph_samples.len(),
                degradation: self.breakers.degradation_level().await,
            },
            sources,
            graph_samples,
        })
    }

    async fn fast_response(
        &self,
        query: &Query,
        score: f32,
        depth: AnalysisDepth,
        started: Instant,
        method: &str,
    ) -> Response {
        let output = self.dispatch_fast(query).await;
        self.output_to_response(query, output, score, depth, started, method)
            .await
    }

    async fn dispatch_fast(&self, query: &Query) -> HandlerOutput {
        match query.intent {
            Intent::NewsInquiry => handlers::handle_news(&self.fast, query).await,
            Intent::StockAnalysis => handlers::handle_stock(&self.fast, query).await,
            _ => handlers::handle_general(&self.fast, query).await,
        }
    }

    async fn output_to_response(
        &self,
        query: &Query,
        output: HandlerOutput,
        score: f32,
        depth: AnalysisDepth,
        started: Instant,
        method: &str,
    ) -> Response {
        Response {
            response_type: output.response_type,
            markdown: output.markdown,
            meta: ResponseMeta {
                processing_time_ms: started.elapsed().as_millis() as u64,
                intent: query.intent,
                confidence: query.confidence,
                complexity_score: score,
                analysis_depth: depth,
                processing_method: method.to_string(),
                quality_score: None,
                partial: output.partial,
                fallback_used: false,
                graph_samples_shown: output.graph_samples.len(),
                degradation: self.breakers.degradation_level().await,
            },
            sources: output.sources,
            graph_samples: output.graph_samples,
        }
    }

    /// Every retrieval backend is open: serve the canned notice.
    async fn emergency_response(
        &self,
        query: &Query,
        score: f32,
        depth: AnalysisDepth,
        started: Instant,
    ) -> Response {
        self.metrics.queries_error.fetch_add(1, Ordering::Relaxed);
        let markdown = format!(
            "## 일시적인 서비스 장애\n\n현재 모든 데이터 소스에 접근할 수 없습니다. \
             잠시 후 다시 시도해 주세요.\n\n**요청**: {}\n",
            query.text
        );
        Response {
            response_type: "service_notice".to_string(),
            markdown,
            sources: Vec::new(),
            graph_samples: Vec::new(),
            meta: ResponseMeta {
                processing_time_ms: started.elapsed().as_millis() as u64,
                intent: query.intent,
                confidence: query.confidence,
                complexity_score: score,
                analysis_depth: depth,
                processing_method: "emergency".to_string(),
                quality_score: None,
                partial: true,
                fallback_used: true,
                graph_samples_shown: 0,
                degradation: DegradationLevel::Emergency,
            },
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }
}
