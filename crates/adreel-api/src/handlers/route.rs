//! Routing endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use adreel_models::{CostProfile, EngineLocation, ExecutionPlan, RouterEvent, RouterResult};
use adreel_router::{CollectingSink, FanoutSink, RouteInput, TracingSink};

use crate::error::ApiResult;
use crate::state::AppState;

/// Body of `POST /api/route`.
#[derive(Debug, Deserialize, Validate)]
pub struct RouteRequest {
    pub plan: ExecutionPlan,
    #[serde(default)]
    pub blueprint: serde_json::Value,
    #[serde(default)]
    pub analysis: serde_json::Value,
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub preferred_engine_id: Option<String>,
    #[serde(default)]
    pub max_cost_profile: Option<CostProfile>,
    #[serde(default)]
    pub force_location: Option<EngineLocation>,
    #[serde(default)]
    #[validate(range(min = 1, max = 600_000))]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub priority: i32,
}

impl From<RouteRequest> for RouteInput {
    fn from(req: RouteRequest) -> Self {
        let mut input = RouteInput::new(req.plan)
            .with_blueprint(req.blueprint)
            .with_analysis(req.analysis)
            .with_priority(req.priority);
        input.preferred_engine_id = req.preferred_engine_id;
        input.max_cost_profile = req.max_cost_profile;
        input.force_location = req.force_location;
        input.timeout_ms = req.timeout_ms;
        input
    }
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub result: RouterResult,
    pub events: Vec<RouterEvent>,
}

/// Route a compiled plan to an engine.
///
/// Always 200 once the body validates; the outcome is in `result.status`.
pub async fn route_execution(
    State(state): State<AppState>,
    Json(request): Json<RouteRequest>,
) -> ApiResult<Json<RouteResponse>> {
    request.validate()?;

    let collected = Arc::new(CollectingSink::new());
    let sink = FanoutSink::new()
        .with(collected.clone())
        .with(Arc::new(TracingSink));

    let result = state.router.route_execution(request.into(), &sink).await;

    Ok(Json(RouteResponse {
        result,
        events: collected.take(),
    }))
}
