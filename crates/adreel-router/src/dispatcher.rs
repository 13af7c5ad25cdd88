//! Dispatcher.
//!
//! [`Router::route_execution`] walks the ranked candidates until one engine
//! accepts the work. Engine-side trouble of any kind (errors, timeouts,
//! exhaustion, cancellation) degrades the result to `partial_success` with
//! all artifacts preserved. `failed` is reserved for plans rejected before
//! any engine is considered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adreel_models::{
    Artifacts, Capability, CostProfile, EngineEntry, EngineId, EngineLocation, ExecutionPlan, Job,
    JobId, JobType, RouterPhase, RouterResult, RouterStatus,
};

use crate::config::RouterConfig;
use crate::engine::{EngineError, EngineOutcome, EngineRequest};
use crate::events::{EventEmitter, EventSink};
use crate::matcher::get_compatible_engines;
use crate::metrics;
use crate::registry::{EngineRegistry, RegistrySnapshot};
use crate::scorer::{score_engines, ScoringConstraints};
use crate::stats::SuccessStats;

pub const NO_COMPATIBLE_ENGINE: &str = "no compatible engine";
pub const NO_ENGINE_SATISFIES_CONSTRAINTS: &str = "no engine satisfies constraints";
pub const ALL_ENGINES_FAILED: &str = "all engines failed";
pub const CANCELLED: &str = "cancelled";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Destination for jobs created for asynchronous engines.
#[async_trait]
pub trait JobSink: Send + Sync {
    /// Persist a queued job. Returns its id.
    async fn enqueue_job(&self, job: Job) -> Result<JobId, BoxError>;
}

/// One routing request.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteInput {
    pub plan: ExecutionPlan,
    /// Upstream creative blueprint, passed through untouched
    #[serde(default)]
    pub blueprint: serde_json::Value,
    /// Upstream analysis, passed through untouched
    #[serde(default)]
    pub analysis: serde_json::Value,
    #[serde(default)]
    pub preferred_engine_id: Option<EngineId>,
    #[serde(default)]
    pub max_cost_profile: Option<CostProfile>,
    #[serde(default)]
    pub force_location: Option<EngineLocation>,
    /// Per-attempt deadline; the router default applies when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Priority of the job created for an async engine
    #[serde(default)]
    pub priority: i32,
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
}

impl RouteInput {
    pub fn new(plan: ExecutionPlan) -> Self {
        Self {
            plan,
            blueprint: serde_json::Value::Null,
            analysis: serde_json::Value::Null,
            preferred_engine_id: None,
            max_cost_profile: None,
            force_location: None,
            timeout_ms: None,
            priority: 0,
            cancel: None,
        }
    }

    pub fn with_blueprint(mut self, blueprint: serde_json::Value) -> Self {
        self.blueprint = blueprint;
        self
    }

    pub fn with_analysis(mut self, analysis: serde_json::Value) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_preferred_engine(mut self, engine_id: impl Into<String>) -> Self {
        self.preferred_engine_id = Some(engine_id.into());
        self
    }

    pub fn with_max_cost(mut self, max: CostProfile) -> Self {
        self.max_cost_profile = Some(max);
        self
    }

    pub fn with_location(mut self, location: EngineLocation) -> Self {
        self.force_location = Some(location);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

enum Dispatched {
    Completed { output_ref: String },
    Enqueued,
}

struct AttemptFailure {
    kind: &'static str,
    message: String,
    /// Counts against the engine's success rate
    engine_fault: bool,
}

impl AttemptFailure {
    fn engine(err: EngineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            engine_fault: true,
        }
    }

    fn enqueue(message: impl Into<String>) -> Self {
        Self {
            kind: "enqueue",
            message: message.into(),
            engine_fault: false,
        }
    }
}

/// Routes plans to engines.
pub struct Router {
    registry: Arc<EngineRegistry>,
    stats: Arc<SuccessStats>,
    jobs: Option<Arc<dyn JobSink>>,
    config: RouterConfig,
}

impl Router {
    pub fn new(registry: Arc<EngineRegistry>, config: RouterConfig) -> Self {
        Self {
            registry,
            stats: Arc::new(SuccessStats::new(config.stats_window)),
            jobs: None,
            config,
        }
    }

    /// Enable asynchronous engines by giving the router somewhere to put jobs.
    pub fn with_job_sink(mut self, jobs: Arc<dyn JobSink>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Share success statistics with other components.
    pub fn with_stats(mut self, stats: Arc<SuccessStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<SuccessStats> {
        &self.stats
    }

    /// Route one plan. Never returns an error and never panics for
    /// engine-side causes; see the module docs for the status contract.
    pub async fn route_execution(&self, input: RouteInput, sink: &dyn EventSink) -> RouterResult {
        let started = Instant::now();
        let result = self.route(JobId::new(), input, sink).await;

        metrics::record_route(
            result.status,
            result.reason.as_deref(),
            started.elapsed().as_secs_f64(),
        );
        info!(
            job_id = %result.job_id,
            status = %result.status,
            attempted = ?result.attempted_engines,
            "Routing finished"
        );
        result
    }

    async fn route(&self, job_id: JobId, input: RouteInput, sink: &dyn EventSink) -> RouterResult {
        let RouteInput {
            plan,
            blueprint,
            analysis,
            preferred_engine_id,
            max_cost_profile,
            force_location,
            timeout_ms,
            priority,
            cancel,
        } = input;
        let cancel = cancel.unwrap_or_default();
        let deadline = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.engine_timeout);
        let mut artifacts = Artifacts::new(plan, blueprint, analysis);

        if let Err(e) = artifacts.plan.validate() {
            warn!(%job_id, error = %e, "Rejecting invalid plan");
            return RouterResult {
                status: RouterStatus::Failed,
                job_id,
                attempted_engines: Vec::new(),
                artifacts,
                reason: Some(e.to_string()),
                human_message: format!("The plan was rejected before dispatch: {e}"),
            };
        }

        let mut events = EventEmitter::new(sink, job_id.clone());
        events.emit(
            RouterPhase::RouteStarted,
            None,
            format!(
                "routing plan {} ({} segments, {:.1}s)",
                artifacts.plan.plan_id,
                artifacts.plan.timeline.len(),
                artifacts.plan.total_duration()
            ),
        );

        let snapshot = self.registry.snapshot();
        let compatible = get_compatible_engines(&artifacts.plan, &snapshot);
        let constraints = ScoringConstraints {
            max_cost_profile,
            force_location,
        };
        let mut candidates = score_engines(&compatible, &constraints, &self.stats.snapshot());

        if let Some(preferred) = preferred_engine_id.as_deref() {
            match candidates.iter().position(|e| e.id == preferred) {
                Some(index) => {
                    let entry = candidates.remove(index);
                    candidates.insert(0, entry);
                }
                None => debug!(
                    %job_id,
                    preferred,
                    "Preferred engine is not compatible or violates constraints; ignoring"
                ),
            }
        }

        events.emit(
            RouterPhase::CandidatesResolved,
            None,
            format!(
                "{} compatible, {} candidate(s): [{}]",
                compatible.len(),
                candidates.len(),
                candidates.iter().map(|e| e.id.as_str()).collect::<Vec<_>>().join(", ")
            ),
        );

        if compatible.is_empty() {
            return conclude(
                events,
                RouterStatus::Failed,
                Vec::new(),
                artifacts,
                NO_COMPATIBLE_ENGINE,
                "No available engine provides every capability this plan needs.".to_string(),
            );
        }
        if candidates.is_empty() {
            return conclude(
                events,
                RouterStatus::PartialSuccess,
                Vec::new(),
                artifacts,
                NO_ENGINE_SATISFIES_CONSTRAINTS,
                format!(
                    "{} compatible engine(s) exist, but none fit the requested cost or location.",
                    compatible.len()
                ),
            );
        }

        let total = candidates.len();
        let mut attempted: Vec<EngineId> = Vec::with_capacity(total);
        let mut failures: Vec<String> = Vec::new();

        for (index, engine) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                events.emit(RouterPhase::DispatchCancelled, None, "cancelled before next attempt");
                return conclude(
                    events,
                    RouterStatus::PartialSuccess,
                    attempted,
                    artifacts,
                    CANCELLED,
                    "Routing was cancelled; the plan is preserved.".to_string(),
                );
            }

            attempted.push(engine.id.clone());
            events.emit(
                RouterPhase::DispatchAttempt,
                Some(&engine.id),
                format!(
                    "attempt {}/{} on {} ({}, {})",
                    index + 1,
                    total,
                    engine.id,
                    engine.cost_profile,
                    engine.location
                ),
            );

            let attempt_started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.attempt(engine, &snapshot, &job_id, &artifacts, priority, deadline) => Some(outcome),
            };
            metrics::record_dispatch_attempt(&engine.id, attempt_started.elapsed().as_secs_f64());

            match outcome {
                None => {
                    events.emit(
                        RouterPhase::DispatchCancelled,
                        Some(&engine.id),
                        "cancelled while in flight",
                    );
                    return conclude(
                        events,
                        RouterStatus::PartialSuccess,
                        attempted,
                        artifacts,
                        CANCELLED,
                        "Routing was cancelled; the plan is preserved.".to_string(),
                    );
                }
                Some(Ok(Dispatched::Completed { output_ref })) => {
                    self.stats.record(&engine.id, true);
                    events.emit(
                        RouterPhase::DispatchResult,
                        Some(&engine.id),
                        format!("completed: {output_ref}"),
                    );
                    artifacts.output_ref = Some(output_ref);
                    artifacts.engine_id = Some(engine.id.clone());
                    return conclude_success(events, attempted, artifacts, format!("Rendered by {}.", engine.name));
                }
                Some(Ok(Dispatched::Enqueued)) => {
                    events.emit(
                        RouterPhase::DispatchResult,
                        Some(&engine.id),
                        "accepted for asynchronous execution",
                    );
                    events.emit(
                        RouterPhase::JobEnqueued,
                        Some(&engine.id),
                        format!("job {job_id} queued"),
                    );
                    artifacts.job_id = Some(job_id.clone());
                    artifacts.engine_id = Some(engine.id.clone());
                    return conclude_success(
                        events,
                        attempted,
                        artifacts,
                        format!("Queued on {}; track job {job_id}.", engine.name),
                    );
                }
                Some(Err(failure)) => {
                    if failure.engine_fault {
                        self.stats.record(&engine.id, false);
                    }
                    metrics::record_dispatch_failure(&engine.id, failure.kind);
                    warn!(
                        %job_id,
                        engine_id = %engine.id,
                        kind = failure.kind,
                        error = %failure.message,
                        "Engine attempt failed"
                    );
                    events.emit(
                        RouterPhase::DispatchResult,
                        Some(&engine.id),
                        format!("failed: {}", failure.message),
                    );
                    events.emit(RouterPhase::DispatchFailed, Some(&engine.id), failure.message.clone());
                    failures.push(format!("{} ({})", engine.id, failure.message));
                }
            }
        }

        conclude(
            events,
            RouterStatus::PartialSuccess,
            attempted,
            artifacts,
            ALL_ENGINES_FAILED,
            format!("Every candidate engine failed: {}.", failures.join("; ")),
        )
    }

    async fn attempt(
        &self,
        engine: &EngineEntry,
        snapshot: &RegistrySnapshot,
        job_id: &JobId,
        artifacts: &Artifacts,
        priority: i32,
        deadline: Duration,
    ) -> Result<Dispatched, AttemptFailure> {
        let request = EngineRequest {
            job_id: job_id.clone(),
            plan: artifacts.plan.clone(),
            blueprint: artifacts.blueprint.clone(),
            analysis: artifacts.analysis.clone(),
            callback_url: self.config.callback_url.clone(),
        };

        if engine.is_async() {
            return self.enqueue(engine, request, priority).await;
        }

        let adapter = snapshot
            .adapter(&engine.id)
            .ok_or_else(|| AttemptFailure::engine(EngineError::unavailable("no adapter registered")))?;

        match tokio::time::timeout(deadline, adapter.invoke(&request)).await {
            Err(_) => Err(AttemptFailure::engine(EngineError::Timeout(deadline))),
            Ok(Err(e)) => Err(AttemptFailure::engine(e)),
            Ok(Ok(EngineOutcome::Completed { output_ref })) => Ok(Dispatched::Completed { output_ref }),
            Ok(Ok(EngineOutcome::Accepted { external_job_id })) => Err(AttemptFailure::engine(
                EngineError::malformed(format!(
                    "synchronous engine returned external job {external_job_id}"
                )),
            )),
        }
    }

    async fn enqueue(
        &self,
        engine: &EngineEntry,
        request: EngineRequest,
        priority: i32,
    ) -> Result<Dispatched, AttemptFailure> {
        let Some(jobs) = &self.jobs else {
            return Err(AttemptFailure::enqueue("no job queue configured"));
        };

        let job = Job::new(
            request.job_id.clone(),
            job_type_for(&request.plan),
            &engine.id,
            request.to_payload(),
        )
        .with_priority(priority)
        .with_max_attempts(self.config.job_max_attempts);

        match tokio::time::timeout(self.config.enqueue_timeout, jobs.enqueue_job(job)).await {
            Err(_) => Err(AttemptFailure::enqueue("enqueue timed out")),
            Ok(Err(e)) => Err(AttemptFailure::enqueue(format!("enqueue failed: {e}"))),
            Ok(Ok(_)) => Ok(Dispatched::Enqueued),
        }
    }
}

fn job_type_for(plan: &ExecutionPlan) -> JobType {
    let required = plan.required_capabilities();
    let generative = [
        Capability::AiGenerate,
        Capability::ImageToVideo,
        Capability::TextToSpeech,
    ];
    if generative.iter().any(|c| required.contains(c)) {
        JobType::Generation
    } else {
        JobType::Render
    }
}

fn conclude_success(
    events: EventEmitter<'_>,
    attempted: Vec<EngineId>,
    artifacts: Artifacts,
    human_message: String,
) -> RouterResult {
    finish(events, RouterStatus::Success, attempted, artifacts, None, human_message)
}

fn conclude(
    events: EventEmitter<'_>,
    status: RouterStatus,
    attempted: Vec<EngineId>,
    artifacts: Artifacts,
    reason: &str,
    human_message: String,
) -> RouterResult {
    finish(
        events,
        status,
        attempted,
        artifacts,
        Some(reason.to_string()),
        human_message,
    )
}

fn finish(
    mut events: EventEmitter<'_>,
    status: RouterStatus,
    attempted: Vec<EngineId>,
    artifacts: Artifacts,
    reason: Option<String>,
    human_message: String,
) -> RouterResult {
    events.emit(RouterPhase::RouteCompleted, None, format!("{status}: {human_message}"));
    RouterResult {
        status,
        job_id: events.job_id().clone(),
        attempted_engines: attempted,
        artifacts,
        reason,
        human_message,
    }
}
