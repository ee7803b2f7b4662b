//! HTTP API handlers.
//!
//! Each handler is a thin adapter over one [`Tracker`] operation. Engine errors map onto status
//! codes in one place ([`ApiError`]):
//!
//! - not found: `404`
//! - validation failures: `422` with `{ "error": "<reason>" }`
//! - write conflicts that outlived their retries: `503`
//! - anything else: `500`

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::challenges::RefreshSummary;
use crate::error::TrackerError;
use crate::ledger::Reward;
use crate::model::{
    ActivityQuery, Challenge, ChallengeStatus, CreditRequest, Goal, GoalProgressQuery,
    GoalProgressReport, GoalRequest, LeaderboardEntry, MetricKey, MetricSample, MetricSummary,
    PeriodKind, PeriodQuery, PointsResponse, RewardClaim, SampleRequest, StreakResponse,
    TimeframeQuery, TopQuery,
};
use crate::tracker::Tracker;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Tracker,
}

/// An engine error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub TrackerError);

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
            TrackerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TrackerError::ConcurrencyConflict => StatusCode::SERVICE_UNAVAILABLE,
            TrackerError::UnmappedChallenge(_)
            | TrackerError::Config(_)
            | TrackerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self.0, status = status.as_u16(), "Request failed");
            return status.into_response();
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the router over an [`AppState`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/owners/:id/samples", post(post_sample).get(get_recent_samples))
        .route("/owners/:id/goals", get(get_goals).put(put_goal))
        .route("/owners/:id/goals/progress", get(get_goal_progress))
        .route("/goals/:id", delete(delete_goal))
        .route("/challenges", get(get_challenges))
        .route("/owners/:id/challenges", get(get_challenge_statuses))
        .route("/owners/:id/challenges/refresh", post(refresh_challenges))
        .route("/owners/:id/challenges/nearly-complete", get(get_nearly_completed))
        .route("/owners/:id/challenges/:challenge_id", get(get_challenge_progress))
        .route("/owners/:id/points", get(get_points).post(post_points))
        .route("/rewards", get(get_reward_catalog))
        .route("/owners/:id/rewards", get(get_claimed_rewards))
        .route("/owners/:id/rewards/:reward_id/claim", post(claim_reward))
        .route("/owners/:id/summary", get(get_summary))
        .route("/owners/:id/streak", get(get_streak))
        .route("/leaderboard/points", get(get_points_leaderboard))
        .route("/leaderboard/:metric", get(get_metric_leaderboard))
        .route("/health", get(health_check))
        .with_state(state)
}

// ============================================================================
// Logging
// ============================================================================

/// POST /owners/{id}/samples - Log a metric value.
///
/// # Request Body
///
/// ```json
/// {
///     "metric": "latest_steps_taken",
///     "value": 4200,
///     "recorded_at": "2024-05-14T08:00:00Z"
/// }
/// ```
///
/// `recorded_at` is optional and defaults to the server's clock. Returns `201 Created` with the
/// stored sample; challenges tracking the metric are re-evaluated before responding.
#[instrument(skip(state))]
pub async fn post_sample(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
    Json(request): Json<SampleRequest>,
) -> ApiResult<(StatusCode, Json<MetricSample>)> {
    let sample = state
        .tracker
        .record_sample(owner_id, request.metric, request.value, request.recorded_at)
        .await?;
    Ok((StatusCode::CREATED, Json(sample)))
}

/// GET /owners/{id}/samples - Most recent samples across all metrics.
#[instrument(skip(state))]
pub async fn get_recent_samples(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<Vec<MetricSample>>> {
    Ok(Json(state.tracker.recent_activity(owner_id, query.limit).await?))
}

// ============================================================================
// Goals
// ============================================================================

/// GET /owners/{id}/goals
#[instrument(skip(state))]
pub async fn get_goals(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> ApiResult<Json<Vec<Goal>>> {
    Ok(Json(state.tracker.list_goals(owner_id).await?))
}

/// PUT /owners/{id}/goals - Create or replace the goal for a metric and period.
#[instrument(skip(state))]
pub async fn put_goal(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
    Json(request): Json<GoalRequest>,
) -> ApiResult<Json<Goal>> {
    let id = state
        .tracker
        .upsert_goal(owner_id, request.metric, request.target_value, request.period)
        .await?;

    Ok(Json(Goal {
        id,
        owner_id,
        metric: request.metric,
        target_value: request.target_value,
        period: request.period,
    }))
}

/// DELETE /goals/{id} - Returns `204 No Content`, or `404` for an unknown goal.
#[instrument(skip(state))]
pub async fn delete_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.tracker.delete_goal(goal_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TrackerError::not_found(format!("goal {goal_id}")).into())
    }
}

/// GET /owners/{id}/goals/progress - Progress in the current period.
///
/// # Query Parameters
///
/// - `metric` (required): Metric key, e.g. `latest_steps_taken`
/// - `period` (required): `daily`, `weekly` or `monthly`; anything else spans the whole history
/// - `target` (optional): Goal target, required for a meaningful `change` progress
///
/// # Response
///
/// ```json
/// {
///     "metric": "latest_steps_taken",
///     "period": "daily",
///     "behavior": "cumulative",
///     "window_start": "2024-05-14T00:00:00Z",
///     "window_end": "2024-05-15T00:00:00Z",
///     "series": [{ "x": "2024-05-14T08:00:00Z", "y": 2000.0 }],
///     "progress_value": 2000.0,
///     "has_data": true,
///     "target_value": 5000.0,
///     "percent_complete": 40.0
/// }
/// ```
#[instrument(skip(state))]
pub async fn get_goal_progress(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
    Query(query): Query<GoalProgressQuery>,
) -> ApiResult<Json<GoalProgressReport>> {
    let period = PeriodKind::parse_lenient(&query.period);
    let report = state
        .tracker
        .get_goal_progress(owner_id, query.metric, period, query.target)
        .await?;

    info!(
        owner_id,
        metric = %query.metric,
        period = %period,
        progress = report.progress.progress_value,
        percent = report.percent_complete,
        "Goal progress queried"
    );
    Ok(Json(report))
}

// ============================================================================
// Challenges
// ============================================================================

/// GET /challenges - The challenge catalogue.
pub async fn get_challenges(State(state): State<AppState>) -> ApiResult<Json<Vec<Challenge>>> {
    Ok(Json(state.tracker.list_challenges().await?))
}

/// GET /owners/{id}/challenges - Every challenge with the owner's current progress.
#[instrument(skip(state))]
pub async fn get_challenge_statuses(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> ApiResult<Json<Vec<ChallengeStatus>>> {
    Ok(Json(state.tracker.challenge_statuses(owner_id).await?))
}

/// GET /owners/{id}/challenges/{challenge_id}
#[instrument(skip(state))]
pub async fn get_challenge_progress(
    State(state): State<AppState>,
    Path((owner_id, challenge_id)): Path<(i64, i64)>,
) -> ApiResult<Json<ChallengeStatus>> {
    Ok(Json(
        state
            .tracker
            .get_challenge_progress(owner_id, challenge_id)
            .await?,
    ))
}

/// POST /owners/{id}/challenges/refresh - Re-evaluate every challenge for the owner.
#[instrument(skip(state))]
pub async fn refresh_challenges(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> ApiResult<Json<RefreshSummary>> {
    let summary = state.tracker.refresh_all_challenges(owner_id).await?;
    if summary.failed > 0 {
        warn!(owner_id, failed = summary.failed, "Some challenges could not be refreshed");
    }
    Ok(Json(summary))
}

/// GET /owners/{id}/challenges/nearly-complete?top=3
#[instrument(skip(state))]
pub async fn get_nearly_completed(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
    Query(query): Query<TopQuery>,
) -> ApiResult<Json<Vec<ChallengeStatus>>> {
    Ok(Json(
        state
            .tracker
            .nearly_completed_challenges(owner_id, query.top)
            .await?,
    ))
}

// ============================================================================
// Points and rewards
// ============================================================================

/// GET /owners/{id}/points
#[instrument(skip(state))]
pub async fn get_points(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> ApiResult<Json<PointsResponse>> {
    let balance = state.tracker.get_points_balance(owner_id).await?;
    Ok(Json(PointsResponse { owner_id, balance }))
}

/// POST /owners/{id}/points - Credit points.
///
/// ```json
/// { "amount": 50 }
/// ```
#[instrument(skip(state))]
pub async fn post_points(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
    Json(request): Json<CreditRequest>,
) -> ApiResult<Json<PointsResponse>> {
    let balance = state.tracker.credit_points(owner_id, request.amount).await?;
    Ok(Json(PointsResponse { owner_id, balance }))
}

/// GET /rewards - The reward catalogue.
pub async fn get_reward_catalog(State(state): State<AppState>) -> Json<Vec<Reward>> {
    Json(state.tracker.rewards().iter().cloned().collect())
}

/// GET /owners/{id}/rewards - Rewards the owner has claimed.
#[instrument(skip(state))]
pub async fn get_claimed_rewards(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> ApiResult<Json<Vec<RewardClaim>>> {
    Ok(Json(state.tracker.claimed_rewards(owner_id).await?))
}

/// POST /owners/{id}/rewards/{reward_id}/claim - Spend points on a catalogue reward.
///
/// Returns the new balance, or `422` when the balance is too low or the reward was already
/// claimed. A rejected claim leaves the balance untouched.
#[instrument(skip(state))]
pub async fn claim_reward(
    State(state): State<AppState>,
    Path((owner_id, reward_id)): Path<(i64, String)>,
) -> ApiResult<Json<PointsResponse>> {
    let balance = state
        .tracker
        .claim_catalog_reward(owner_id, &reward_id)
        .await?;
    Ok(Json(PointsResponse { owner_id, balance }))
}

// ============================================================================
// Summaries and leaderboards
// ============================================================================

/// GET /owners/{id}/summary?period=weekly
#[instrument(skip(state))]
pub async fn get_summary(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<Json<Vec<MetricSummary>>> {
    Ok(Json(state.tracker.metric_summary(owner_id, query.period).await?))
}

/// GET /owners/{id}/streak
#[instrument(skip(state))]
pub async fn get_streak(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> ApiResult<Json<StreakResponse>> {
    let days = state.tracker.log_streak(owner_id).await?;
    Ok(Json(StreakResponse { owner_id, days }))
}

/// GET /leaderboard/{metric}?timeframe=weekly
#[instrument(skip(state))]
pub async fn get_metric_leaderboard(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    Query(query): Query<TimeframeQuery>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    let metric: MetricKey = metric.parse().map_err(TrackerError::from)?;
    Ok(Json(
        state
            .tracker
            .metric_leaderboard(metric, query.timeframe)
            .await?,
    ))
}

/// GET /leaderboard/points
#[instrument(skip(state))]
pub async fn get_points_leaderboard(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    Ok(Json(state.tracker.points_leaderboard().await?))
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
