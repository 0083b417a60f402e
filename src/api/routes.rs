//! JSON endpoints for the companion web view.
//!
//! Every write goes through [`CatalogService`], so the API enforces the same
//! rules as the chat flow (title must exist, score 1–10, first role wins).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::catalog::service::RegistrationOutcome;
use crate::catalog::{
    CatalogService, CreatorOutcome, CreatorRejection, Role, Score, User, UserId,
};
use crate::error::FlowError;

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub catalog: Arc<CatalogService>,
}

/// Build the companion API router.
pub fn api_routes(catalog: Arc<CatalogService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/creators", get(list_creators))
        .route("/api/creators/{handle}/titles", get(creator_titles))
        .route("/api/register", post(register))
        .route("/api/titles", post(add_title))
        .route("/api/ratings", post(rate))
        .route("/api/reviews", post(review))
        .layer(CorsLayer::permissive())
        .with_state(ApiState { catalog })
}

// ── Error mapping ───────────────────────────────────────────────────────

/// A failed request: status code plus `{"status": "error", "message": …}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Validation(m) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, m),
            FlowError::NotFound(m) => Self::new(StatusCode::NOT_FOUND, m),
            FlowError::Forbidden(m) => Self::new(StatusCode::FORBIDDEN, m),
            FlowError::ExternalService(e) => {
                error!(error = %e, "Verification service failed");
                Self::new(StatusCode::BAD_GATEWAY, "Verification service unavailable")
            }
            FlowError::Persistence(e) => {
                error!(error = %e, "Store failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error, please retry")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "status": "error", "message": self.message })),
        )
            .into_response()
    }
}

type ApiResult = Result<(StatusCode, Json<Value>), ApiError>;

fn ok(status: StatusCode, mut body: Value) -> ApiResult {
    body["status"] = json!("ok");
    Ok((status, Json(body)))
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "streamer-ratings"
    }))
}

#[derive(Debug, Serialize)]
struct CreatorSummary {
    user_id: UserId,
    username: Option<String>,
    handle: Option<String>,
    followers: Option<u64>,
}

impl From<&User> for CreatorSummary {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            handle: user.creator.as_ref().map(|p| p.handle.clone()),
            followers: user.creator.as_ref().map(|p| p.followers),
        }
    }
}

/// GET /api/creators
async fn list_creators(State(state): State<ApiState>) -> ApiResult {
    let creators: Vec<CreatorSummary> = state
        .catalog
        .list_creators()
        .await?
        .iter()
        .map(CreatorSummary::from)
        .collect();
    ok(StatusCode::OK, json!({ "creators": creators }))
}

/// GET /api/creators/{handle}/titles
async fn creator_titles(State(state): State<ApiState>, Path(handle): Path<String>) -> ApiResult {
    let listing = state.catalog.creator_titles(&handle).await?;
    ok(
        StatusCode::OK,
        json!({
            "creator": CreatorSummary::from(&listing.creator),
            "titles": listing.titles,
        }),
    )
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    user_id: UserId,
    username: Option<String>,
    role: String,
    handle: Option<String>,
}

/// POST /api/register
async fn register(State(state): State<ApiState>, Json(req): Json<RegisterRequest>) -> ApiResult {
    let role: Role = req
        .role
        .parse()
        .map_err(|e: String| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e))?;

    let outcome = match role {
        Role::Viewer => state.catalog.register_viewer(req.user_id, req.username).await?,
        Role::Creator => {
            let handle = req.handle.as_deref().ok_or_else(|| {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "A creator needs a handle.")
            })?;
            match state
                .catalog
                .register_creator(req.user_id, req.username, handle)
                .await?
            {
                CreatorOutcome::Registered { outcome, .. } => outcome,
                CreatorOutcome::Rejected(rejection) => {
                    return Err(ApiError::new(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        rejection_message(&rejection),
                    ));
                }
            }
        }
    };

    match outcome {
        RegistrationOutcome::New(role) => {
            info!(user_id = req.user_id, %role, "Registered via API");
            ok(
                StatusCode::CREATED,
                json!({ "message": format!("Registered as {role}."), "role": role }),
            )
        }
        RegistrationOutcome::Existing(role) => ok(
            StatusCode::OK,
            json!({ "message": format!("Already registered as {role}."), "role": role }),
        ),
    }
}

fn rejection_message(rejection: &CreatorRejection) -> String {
    match rejection {
        CreatorRejection::NotFound { handle } => format!("Channel {handle} not found."),
        CreatorRejection::TooFewFollowers {
            handle,
            followers,
            required,
        } => format!("{handle} has {followers} followers; {required} required."),
    }
}

#[derive(Debug, Deserialize)]
struct AddTitleRequest {
    user_id: UserId,
    title: String,
}

/// POST /api/titles
async fn add_title(State(state): State<ApiState>, Json(req): Json<AddTitleRequest>) -> ApiResult {
    let title = state.catalog.add_title(req.user_id, &req.title).await?;
    ok(StatusCode::CREATED, json!({ "title": title }))
}

#[derive(Debug, Deserialize)]
struct RateRequest {
    user_id: UserId,
    title: String,
    score: i64,
}

/// POST /api/ratings
async fn rate(State(state): State<ApiState>, Json(req): Json<RateRequest>) -> ApiResult {
    let score = Score::new(req.score).ok_or_else(|| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Score must be between {} and {}.", Score::MIN, Score::MAX),
        )
    })?;
    let (title, rating) = state
        .catalog
        .rate_title(req.user_id, &req.title, score)
        .await?;
    ok(
        StatusCode::CREATED,
        json!({ "message": format!("Rated {} {score}/10.", title.name), "rating": rating }),
    )
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    user_id: UserId,
    title: String,
    review: String,
}

/// POST /api/reviews
async fn review(State(state): State<ApiState>, Json(req): Json<ReviewRequest>) -> ApiResult {
    let (title, rating) = state
        .catalog
        .review_title(req.user_id, &req.title, &req.review)
        .await?;
    ok(
        StatusCode::CREATED,
        json!({ "message": format!("Review of {} saved.", title.name), "rating": rating }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_errors_map_to_status_codes() {
        let cases = [
            (FlowError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (FlowError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (FlowError::Forbidden("no".into()), StatusCode::FORBIDDEN),
        ];
        for (err, status) in cases {
            let message = err.to_string();
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.message, message);
        }
    }

    #[test]
    fn persistence_errors_hide_details() {
        let api = ApiError::from(FlowError::Persistence(
            crate::error::DatabaseError::Query("disk I/O error at /secret/path".into()),
        ));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api.message.contains("/secret/path"));
    }

    #[test]
    fn creator_summary_flattens_profile() {
        let user = User {
            id: 5,
            username: Some("alice".into()),
            role: Role::Creator,
            creator: Some(crate::catalog::CreatorProfile {
                handle: "popularstreamer".into(),
                followers: 500,
            }),
            created_at: chrono::Utc::now(),
        };
        let json = serde_json::to_value(CreatorSummary::from(&user)).unwrap();
        assert_eq!(
            json,
            json!({"user_id": 5, "username": "alice", "handle": "popularstreamer", "followers": 500})
        );
    }
}
