//! HTTP API handlers
//!
//! `POST /api/create`, `POST /api/vote` and `GET /api/get`, all addressed
//! by the `pollId` query parameter.

use super::connect_info::ClientMeta;
use super::AppState;
use crate::identity;
use crate::polls::{Poll, PollError, PollView, VotePolicy, VoteReceipt};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// Error reply: `{"error": message}` with a matching status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        let status = match &err {
            PollError::InvalidPoll(_) | PollError::UnknownOption(_) => StatusCode::BAD_REQUEST,
            PollError::PollNotFound => StatusCode::NOT_FOUND,
            PollError::Storage(_) | PollError::ActorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            warn!(code = err.code(), error = %err, "poll operation failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Query parameters shared by the API routes
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    pub poll_id: Option<String>,
    pub user_id: Option<String>,
}

impl PollQuery {
    fn poll_id(&self) -> Result<&str, ApiError> {
        self.poll_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("Poll ID required"))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub policy: Option<VotePolicy>,
}

#[derive(Debug, Serialize)]
pub struct CreatePollResponse {
    pub success: bool,
    pub poll: Poll,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// POST /api/create?pollId=
pub async fn create_poll(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
    body: Result<Json<CreatePollRequest>, JsonRejection>,
) -> Result<Json<CreatePollResponse>, ApiError> {
    let poll_id = query.poll_id()?;
    let Json(request) = body?;
    let poll = state
        .registry
        .create_poll(poll_id, &request.question, request.options, request.policy)
        .await?;
    Ok(Json(CreatePollResponse {
        success: true,
        poll,
    }))
}

/// POST /api/vote?pollId=
pub async fn vote(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
    ClientMeta(meta): ClientMeta,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteReceipt>, ApiError> {
    let poll_id = query.poll_id()?;
    let Json(request) = body?;
    let voter_id = identity::resolve(
        request.user_id.as_deref().or(query.user_id.as_deref()),
        &meta,
    );
    let outcome = state
        .registry
        .vote(poll_id, &request.option, &voter_id)
        .await?;
    Ok(Json(VoteReceipt::from(outcome)))
}

/// GET /api/get?pollId=&userId=
pub async fn get_poll(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
    ClientMeta(meta): ClientMeta,
) -> Result<Json<PollView>, ApiError> {
    let poll_id = query.poll_id()?;
    let voter_id = identity::resolve(query.user_id.as_deref(), &meta);
    let view = state.registry.get_poll(poll_id, &voter_id).await?;
    Ok(Json(view))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "activePolls": state.registry.active_polls(),
    }))
}

/// OPTIONS preflight for the API routes
pub async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                "GET, POST, OPTIONS",
            ),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
    )
}

/// Browsers call the API from other origins
pub async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Fallback for unknown paths
pub async fn not_found() -> ApiError {
    debug!("no route");
    ApiError {
        status: StatusCode::NOT_FOUND,
        message: "Not found".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_error_status_mapping() {
        let cases = [
            (PollError::InvalidPoll("x".into()), StatusCode::BAD_REQUEST),
            (PollError::UnknownOption("x".into()), StatusCode::BAD_REQUEST),
            (PollError::PollNotFound, StatusCode::NOT_FOUND),
            (PollError::Storage("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (PollError::ActorUnavailable, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_missing_poll_id() {
        let query = PollQuery::default();
        assert_eq!(
            query.poll_id().unwrap_err(),
            ApiError::bad_request("Poll ID required")
        );

        let blank = PollQuery {
            poll_id: Some("  ".to_string()),
            user_id: None,
        };
        assert!(blank.poll_id().is_err());
    }
}
