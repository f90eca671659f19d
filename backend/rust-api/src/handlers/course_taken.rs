use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use validator::Validate;

use crate::{
    extractors::{AppJson, AppPath},
    models::{
        Certificate, CurrentStep, EvaluateCourseRequest, ProgressRecord, StartCourseRequest,
    },
    services::{
        progression_service::{ProgressError, ProgressionService},
        AppState,
    },
};

pub async fn list_progress(
    State(state): State<Arc<AppState>>,
    AppPath(user_id): AppPath<String>,
) -> Result<Json<Vec<ProgressRecord>>, ApiError> {
    tracing::info!("Listing course progress for user_id={}", user_id);

    let records = ProgressionService::from_state(&state)
        .list_progress(&user_id)
        .await?;
    Ok(Json(records))
}

pub async fn start_course(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<StartCourseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|err| ApiError::bad_request(format!("Invalid request: {}", err)))?;

    tracing::info!(
        "Starting course for user_id={}, course_id={}",
        req.user_id,
        req.course_id
    );

    let record = ProgressionService::from_state(&state)
        .start_course(&req.user_id, req.course_id)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn advance_on_course(
    State(state): State<Arc<AppState>>,
    AppPath((user_id, course_id)): AppPath<(String, i64)>,
) -> Result<Json<ProgressRecord>, ApiError> {
    tracing::info!(
        "Advancing on course for user_id={}, course_id={}",
        user_id,
        course_id
    );

    let record = ProgressionService::from_state(&state)
        .advance_on_course(&user_id, course_id)
        .await?;
    Ok(Json(record))
}

pub async fn current_step(
    State(state): State<Arc<AppState>>,
    AppPath((user_id, course_id)): AppPath<(String, i64)>,
) -> Result<Json<CurrentStep>, ApiError> {
    let step = ProgressionService::from_state(&state)
        .current_step(&user_id, course_id)
        .await?;
    Ok(Json(step))
}

pub async fn evaluate_course(
    State(state): State<Arc<AppState>>,
    AppPath((user_id, course_id)): AppPath<(String, i64)>,
    AppJson(req): AppJson<EvaluateCourseRequest>,
) -> Result<StatusCode, ApiError> {
    req.validate()
        .map_err(|err| ApiError::bad_request(format!("Invalid request: {}", err)))?;

    ProgressionService::from_state(&state)
        .evaluate(&user_id, course_id, req.rating, req.feedback)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn certificates(
    State(state): State<Arc<AppState>>,
    AppPath(user_id): AppPath<String>,
) -> Result<Json<Vec<Certificate>>, ApiError> {
    let certificates = ProgressionService::from_state(&state)
        .certificates(&user_id)
        .await?;
    Ok(Json(certificates))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    Internal,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<ProgressError> for ApiError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::NotFound => ApiError::NotFound(err.to_string()),
            ProgressError::AlreadyEnrolled => ApiError::Conflict(err.to_string()),
            ProgressError::InvalidState(message) => ApiError::BadRequest(message),
            ProgressError::ContentGraphInconsistent(_) => {
                ApiError::BadGateway("Course content is inconsistent".to_string())
            }
            ProgressError::Internal(_) => ApiError::Internal,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::BadGateway(message) => (StatusCode::BAD_GATEWAY, message),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (
            status,
            Json(json!({
                "message": message,
                "status": status.as_u16()
            })),
        )
            .into_response()
    }
}
