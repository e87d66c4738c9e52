//! HTTP handlers for rules and origins.
//!
//! Every handler moves its store call onto the blocking pool and gives it
//! the per-request deadline from [`AppState::deadline`].

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use herald_origins::OriginError;
use herald_rules::RuleError;
use herald_types::{FieldErrors, Origin, Rule};
use thiserror::Error;

use crate::AppState;

/// API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("invalid rule: {0}")]
    InvalidRule(FieldErrors),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    #[error("request timed out")]
    Timeout,
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InvalidRule(fields) => {
                let body = Json(serde_json::json!({
                    "error": "invalid rule",
                    "fields": fields,
                }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "request timed out".to_string()),
            ApiError::InternalServerError(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::ItemNotFound(_) => ApiError::NotFound(e.to_string()),
            RuleError::Invalid(fields) => ApiError::InvalidRule(fields),
            RuleError::ChannelNotFound(_)
            | RuleError::OriginsNotFound(_)
            | RuleError::RecipientRequired
            | RuleError::RecipientNotSupported(_)
            | RuleError::InvalidId(_) => ApiError::BadRequest(e.to_string()),
            RuleError::DuplicateRuleName(_) => ApiError::Conflict(e.to_string()),
            RuleError::RuleLimitReached { .. } => ApiError::Unprocessable(e.to_string()),
            RuleError::Timeout => ApiError::Timeout,
            RuleError::ChannelLookup(_)
            | RuleError::Database { .. }
            | RuleError::Pool(_)
            | RuleError::Serialization(_) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<OriginError> for ApiError {
    fn from(e: OriginError) -> Self {
        match e {
            OriginError::EmptyServiceId | OriginError::InvalidOrigin { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            OriginError::Conflict(_) => ApiError::Conflict(e.to_string()),
            OriginError::Timeout => ApiError::Timeout,
            OriginError::Database { .. } | OriginError::Pool(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

/// Runs `op` on the blocking pool and flattens the join error.
async fn blocking<T, F>(state: Arc<AppState>, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&state))
        .await
        .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
}

/// Handler for `GET /api/rules`.
pub async fn list_rules_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Rule>>, ApiError> {
    let rules = blocking(state, |state| Ok(state.rules.list(state.deadline())?)).await?;
    Ok(Json(rules))
}

/// Handler for `GET /api/rules/{ruleId}`.
pub async fn get_rule_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(rule_id): Path<String>,
) -> Result<Json<Rule>, ApiError> {
    let rule = blocking(state, move |state| {
        Ok(state.rules.get(&rule_id, state.deadline())?)
    })
    .await?;
    Ok(Json(rule))
}

/// Handler for `POST /api/rules`.
pub async fn create_rule_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<Rule>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    let rule = blocking(state, move |state| {
        Ok(state.rules.create(payload, state.deadline())?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// Handler for `PUT /api/rules/{ruleId}`.
pub async fn update_rule_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(rule_id): Path<String>,
    Json(payload): Json<Rule>,
) -> Result<Json<Rule>, ApiError> {
    let rule = blocking(state, move |state| {
        Ok(state.rules.update(&rule_id, payload, state.deadline())?)
    })
    .await?;
    Ok(Json(rule))
}

/// Handler for `DELETE /api/rules/{ruleId}`. Succeeds whether or not the rule existed.
pub async fn delete_rule_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    blocking(state, move |state| {
        Ok(state.rules.delete(&rule_id, state.deadline())?)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `GET /api/origins`.
pub async fn list_origins_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Origin>>, ApiError> {
    let origins = blocking(state, |state| {
        Ok(state.origins.list_origins(state.deadline())?)
    })
    .await?;
    Ok(Json(origins))
}

/// Handler for `PUT /api/services/{serviceId}/origins`.
///
/// Replaces the service's whole origin set with the body. `serviceID`
/// fields in the body are ignored.
pub async fn upsert_origins_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(service_id): Path<String>,
    Json(payload): Json<Vec<Origin>>,
) -> Result<StatusCode, ApiError> {
    blocking(state, move |state| {
        Ok(state
            .origins
            .upsert_origins(&service_id, &payload, state.deadline())?)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
