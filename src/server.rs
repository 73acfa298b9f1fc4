//! HTTP surface over a loaded pipeline, classifier and insight generator.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::features::today_utc;
use crate::insights::{build_profile, InsightGenerator, RetentionInsights};
use crate::pipeline::{PipelineError, PreprocessingPipeline};
use crate::record::{read_records_csv, EmployeeRecord, RecordError};
use crate::scoring::{
    score_batch_at, write_scored_csv, Classifier, ReportScope, RiskLabel, ScoredEmployee,
    ScoringError,
};
use crate::summary::{summarize, OrganizationSummary};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PreprocessingPipeline>,
    pub classifier: Arc<dyn Classifier>,
    pub insights: Arc<dyn InsightGenerator>,
}

impl AppState {
    pub fn new(
        pipeline: PreprocessingPipeline,
        classifier: Arc<dyn Classifier>,
        insights: Arc<dyn InsightGenerator>,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            classifier,
            insights,
        }
    }
}

pub const API_ROUTES: [&str; 4] = ["/health", "/score", "/score/export", "/insights"];

pub fn attrition_router(state: AppState) -> Router {
    let [health, score, export, insights] = API_ROUTES;
    Router::new()
        .route(health, get(get_health))
        .route(score, post(post_score))
        .route(export, post(post_score_export))
        .route(insights, post(post_insights))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ScoreQuery {
    pub scope: Option<ReportScope>,
    pub reference_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub scope: ReportScope,
    pub rows: Vec<ScoredEmployee>,
    /// Always over the full batch.
    pub summary: OrganizationSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightRequest {
    #[serde(default)]
    pub employee_id: Option<String>,
    pub record: EmployeeRecord,
    pub attrition_probability: f64,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<ScoringError> for ApiError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::Pipeline(PipelineError::DataShape(err)) => {
                Self::BadRequest(err.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        warn!(
            component = "server",
            event = "http.request.error",
            status = status.as_u16(),
            error = %message
        );
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let schema = state.pipeline.schema();
    let status = if schema.is_some() { "ok" } else { "not_fitted" };
    Json(json!({
        "status": status,
        "feature_fingerprint": schema.map(|s| s.fingerprint.clone()),
        "feature_width": schema.map(|s| s.width()),
    }))
}

fn score_body(
    state: &AppState,
    body: &str,
    query: &ScoreQuery,
) -> Result<Vec<ScoredEmployee>, ApiError> {
    let batch = read_records_csv(body.as_bytes())?;
    let reference_date = query.reference_date.unwrap_or_else(today_utc);
    Ok(score_batch_at(
        &state.pipeline,
        state.classifier.as_ref(),
        &batch,
        reference_date,
    )?)
}

async fn post_score(
    State(state): State<AppState>,
    Query(query): Query<ScoreQuery>,
    body: String,
) -> Result<Json<ScoreResponse>, ApiError> {
    let scored = score_body(&state, &body, &query)?;
    let summary = summarize(&scored);
    let scope = query.scope.unwrap_or(ReportScope::FullOrganization);
    let rows: Vec<ScoredEmployee> = match scope {
        ReportScope::FullOrganization => scored,
        ReportScope::HighRiskOnly => scored.into_iter().filter(|r| r.is_high_risk()).collect(),
    };

    info!(
        component = "server",
        event = "http.score.request",
        rows = summary.total_employees,
        at_risk = summary.at_risk_employees,
        returned = rows.len()
    );

    Ok(Json(ScoreResponse {
        scope,
        rows,
        summary,
    }))
}

async fn post_score_export(
    State(state): State<AppState>,
    Query(query): Query<ScoreQuery>,
    body: String,
) -> Result<Response, ApiError> {
    let scored = score_body(&state, &body, &query)?;
    let scope = query.scope.unwrap_or(ReportScope::FullOrganization);

    let mut out = Vec::new();
    let written = write_scored_csv(&mut out, &scored, scope)?;
    info!(
        component = "server",
        event = "http.export.request",
        rows = scored.len(),
        written
    );

    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], out).into_response())
}

async fn post_insights(
    State(state): State<AppState>,
    Json(request): Json<InsightRequest>,
) -> Result<Json<RetentionInsights>, ApiError> {
    if !(0.0..=1.0).contains(&request.attrition_probability) {
        return Err(ApiError::BadRequest(format!(
            "attrition_probability must be within [0, 1], got {}",
            request.attrition_probability
        )));
    }

    let profile = build_profile(&request.record, request.attrition_probability);
    let generator = Arc::clone(&state.insights);
    let insights = tokio::task::spawn_blocking(move || generator.generate(&profile))
        .await
        .map_err(|err| ApiError::Internal(format!("insight task failed: {err}")))?;

    info!(
        component = "server",
        event = "http.insights.request",
        employee_id = request.employee_id.as_deref().unwrap_or(""),
        risk = RiskLabel::from_probability(request.attrition_probability).as_str()
    );

    Ok(Json(insights))
}
