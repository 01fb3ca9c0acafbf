//! HTTP surface of the access service

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

use crate::{
    AppState,
    middleware::{Operator, operator_auth_middleware},
    models::{ScanEvent, ScanType, UserId},
    service::{FailureReason, ScanOutcome},
    session::SessionState,
};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;
const KEY_CHANNEL_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Request for issuing a token
#[derive(Deserialize)]
pub struct IssueTokenRequest {
    pub user_id: String,
}

/// Response carrying a freshly issued token
#[derive(Serialize)]
pub struct IssueTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub key_version: u32,
}

/// Request sent by a scanner station
#[derive(Deserialize)]
pub struct ScanRequest {
    pub token: String,
    pub scan_type: ScanType,
    pub location: String,
}

/// Scan decision plus whether the operator may retry it
#[derive(Serialize)]
pub struct ScanResponse {
    #[serde(flatten)]
    pub outcome: ScanOutcome,
    pub retryable: bool,
}

/// Response for a session state lookup
#[derive(Serialize)]
pub struct SessionStateResponse {
    pub user_id: UserId,
    pub state: SessionState,
}

/// Query parameters for scan history
#[derive(Deserialize)]
pub struct ScanHistoryQuery {
    pub limit: Option<usize>,
}

/// Create the router for the access service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/access/tokens", post(issue_token))
        .route("/access/scans", post(process_scan))
        .route("/access/users/:user_id/state", get(session_state))
        .route("/access/users/:user_id/scans", get(scan_history))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            operator_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .with_state(state)
}

/// Health check endpoint
///
/// The key channel is reported but does not degrade the service: scans fall
/// back to the static key ring without it.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool).await;
    let key_channel = matches!(
        tokio::time::timeout(KEY_CHANNEL_PROBE_TIMEOUT, state.key_channel.ping()).await,
        Ok(Ok(true))
    );
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "service": "access-service",
            "database": database,
            "key_channel": key_channel,
        })),
    )
}

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    UserId::parse(raw).map_err(ApiError::BadRequest)
}

/// Issue a token for a user
pub async fn issue_token(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(payload): Json<IssueTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = parse_user_id(&payload.user_id)?;
    info!("Operator {} requested a token for {}", operator.id, user_id);

    let issued = state.access.generate_token(&user_id).await.map_err(|e| {
        error!("Failed to issue token: {}", e);
        ApiError::InternalServerError
    })?;

    Ok((
        StatusCode::CREATED,
        Json(IssueTokenResponse {
            token: issued.token.into_string(),
            expires_at: issued.expires_at,
            key_version: issued.key_version,
        }),
    ))
}

/// Process a scanned token
pub async fn process_scan(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(payload): Json<ScanRequest>,
) -> impl IntoResponse {
    let outcome = state
        .access
        .process_scan(
            &payload.token,
            payload.scan_type,
            &operator.id,
            &payload.location,
        )
        .await;

    let status = match &outcome {
        ScanOutcome::Granted { .. } | ScanOutcome::Denied { .. } => StatusCode::OK,
        ScanOutcome::Failed {
            reason: FailureReason::InvalidRequest,
        } => StatusCode::BAD_REQUEST,
        ScanOutcome::Failed { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    let retryable = matches!(
        outcome,
        ScanOutcome::Failed { reason } if reason != FailureReason::InvalidRequest
    );

    (status, Json(ScanResponse { outcome, retryable }))
}

/// Current session state of a user
pub async fn session_state(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let session = state.access.session_state(&user_id).await.map_err(|e| {
        error!("Failed to derive session state: {}", e);
        ApiError::ServiceUnavailable
    })?;

    Ok(Json(SessionStateResponse {
        user_id,
        state: session,
    }))
}

/// Recent scans of a user, newest first
pub async fn scan_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ScanHistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let events: Vec<ScanEvent> = state
        .access
        .recent_scans(&user_id, limit)
        .await
        .map_err(|e| {
            error!("Failed to read scan history: {}", e);
            ApiError::ServiceUnavailable
        })?;

    Ok(Json(events))
}

/// Error returned by the HTTP handlers
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    ServiceUnavailable,
    InternalServerError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable".to_string(),
            ),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
