use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::TimeDelta;
use runguard_application::{Admission, Rejection};
use runguard_core::AppError;
use runguard_domain::{RunId, RunRequestAttributes, ScopeDimension};
use tracing::warn;

use crate::dto::{
    AdmissionRequest, AdmissionResponse, RejectionResponse, RunCompletionRequest,
    RunProgressRequest,
};
use crate::error::ApiResult;
use crate::state::AppState;


const REQUESTING_USER_HEADER: &str = "x-runguard-user";

pub async fn admit_run_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AdmissionRequest>,
) -> ApiResult<Response> {
    let run_id = payload.run_id.map(RunId::from_uuid).unwrap_or_default();
    let attributes = request_attributes(&headers, payload.attributes);

    match state.admission_service.admit(run_id, attributes).await {
        Ok(Admission::Admitted(permit)) => {
            let reservation = permit.detach();
            Ok(Json(AdmissionResponse {
                run_id: reservation.run_id.to_string(),
                tracked: true,
            })
            .into_response())
        }
        Ok(Admission::Rejected(rejection)) => Ok(rejection_response(&rejection)),
        Err(error @ (AppError::Unavailable(_) | AppError::Internal(_))) if state.fail_open => {
            warn!(%run_id, %error, "run history unavailable, admitting run untracked");
            Ok(Json(AdmissionResponse {
                run_id: run_id.to_string(),
                tracked: false,
            })
            .into_response())
        }
        Err(error) => Err(error.into()),
    }
}

pub async fn record_run_progress_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<RunProgressRequest>,
) -> ApiResult<StatusCode> {
    let run_id = run_id.parse::<RunId>()?;
    state
        .admission_service
        .record_progress(run_id, payload.bytes)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete_run_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<RunCompletionRequest>,
) -> ApiResult<StatusCode> {
    let run_id = run_id.parse::<RunId>()?;
    state
        .admission_service
        .complete(run_id, payload.total_bytes)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn release_run_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<StatusCode> {
    let run_id = run_id.parse::<RunId>()?;
    state.admission_service.release(run_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Fills scope attributes the body left out from well-known request headers.
fn request_attributes(
    headers: &HeaderMap,
    mut attributes: RunRequestAttributes,
) -> RunRequestAttributes {
    let requesting_user = headers
        .get(REQUESTING_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    for (dimension, value) in [
        (ScopeDimension::REQUESTING_USER, requesting_user),
        (ScopeDimension::CLIENT_IP, client_ip),
    ] {
        if let Some(value) = value
            && attributes
                .get(dimension)
                .is_none_or(|existing| existing.trim().is_empty())
        {
            attributes.insert(dimension, value);
        }
    }

    attributes
}

fn rejection_response(rejection: &Rejection) -> Response {
    let retry_after = rejection.retry_after.map(retry_after_seconds);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RejectionResponse::from_rejection(rejection, retry_after)),
    )
        .into_response();

    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(seconds));
    }

    response
}

/// Whole seconds, rounded up and never below one.
fn retry_after_seconds(retry_after: TimeDelta) -> i64 {
    let seconds = retry_after.num_seconds();
    let rounded = if retry_after > TimeDelta::seconds(seconds) {
        seconds + 1
    } else {
        seconds
    };

    rounded.max(1)
}
