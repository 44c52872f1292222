use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::generation::{
    ErrorResponse, GenerateRequest, GenerateResponse, JobStatusResponse,
};
use crate::models::job::JobOwner;
use crate::models::usage::UsageSnapshot;
use crate::services::imaging::ImagingError;
use crate::services::orchestrator::{SubmitError, TransformTarget};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Resolve the caller's identity from trusted headers. Authentication
/// itself happens upstream; `X-User-Id` arrives only on authenticated
/// requests. Callers without a session get a fresh key, echoed back in
/// the usage payload so they can carry it forward.
fn extract_identity(headers: &HeaderMap) -> JobOwner {
    if let Some(user_id) = headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        if !user_id.is_empty() {
            return JobOwner::User(user_id.to_string());
        }
    }
    if let Some(key) = headers.get("x-session-key").and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return JobOwner::Session(key.to_string());
        }
    }
    JobOwner::Session(Uuid::new_v4().to_string())
}

struct Submission {
    selfie: Vec<u8>,
    figure: Option<String>,
}

async fn read_submission(mut multipart: Multipart) -> Result<Submission, ApiError> {
    let mut selfie: Option<Vec<u8>> = None;
    let mut figure: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| bad_request("Malformed multipart upload"))?
    {
        match field.name() {
            Some("selfie") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| bad_request("Could not read selfie upload"))?;
                selfie = Some(data.to_vec());
            }
            Some("figure") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| bad_request("Could not read figure field"))?;
                figure = Some(text);
            }
            _ => {}
        }
    }

    let selfie = selfie.ok_or_else(|| bad_request("Selfie is required"))?;
    let request = GenerateRequest {
        figure: figure.clone(),
    };
    request
        .validate()
        .map_err(|e| bad_request(&format!("Invalid request: {e}")))?;

    Ok(Submission { selfie, figure })
}

/// POST /api/v1/generate — fuse the selfie with a named historical figure.
pub async fn submit_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>, ApiError> {
    let owner = extract_identity(&headers);
    let submission = read_submission(multipart).await?;
    let figure = submission
        .figure
        .ok_or_else(|| bad_request("Figure is required"))?;

    let outcome = state
        .orchestrator
        .submit(owner, &submission.selfie, TransformTarget::Figure(figure))
        .await
        .map_err(submit_error_response)?;

    Ok(Json(GenerateResponse {
        id: outcome.job.id,
        message: format!(
            "Successfully transformed you into {}!",
            outcome.job.figure_name
        ),
        figure_name: outcome.job.figure_name,
        result_url: outcome.result_url,
        source_url: outcome.source_url,
        is_randomized: false,
        usage: outcome.usage,
    }))
}

/// POST /api/v1/randomize — fuse the selfie with a random figure.
pub async fn submit_randomize(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>, ApiError> {
    let owner = extract_identity(&headers);
    let submission = read_submission(multipart).await?;

    let outcome = state
        .orchestrator
        .submit(owner, &submission.selfie, TransformTarget::Random)
        .await
        .map_err(submit_error_response)?;

    Ok(Json(GenerateResponse {
        id: outcome.job.id,
        message: format!(
            "You've been randomly transformed into {}!",
            outcome.job.figure_name
        ),
        figure_name: outcome.job.figure_name,
        result_url: outcome.result_url,
        source_url: outcome.source_url,
        is_randomized: true,
        usage: outcome.usage,
    }))
}

/// GET /api/v1/jobs/{id} — poll a job's status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let Some((job, result_url)) = state
        .orchestrator
        .status(id)
        .await
        .map_err(submit_error_response)?
    else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Job not found")),
        ));
    };

    Ok(Json(JobStatusResponse {
        id: job.id,
        status: job.status.to_string(),
        error: job.error,
        result_url,
    }))
}

/// GET /api/v1/usage — current quota usage for the caller's identity.
pub async fn get_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageSnapshot>, ApiError> {
    let owner = extract_identity(&headers);
    let usage = state
        .orchestrator
        .usage(&owner)
        .await
        .map_err(submit_error_response)?;
    Ok(Json(usage))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

fn submit_error_response(e: SubmitError) -> ApiError {
    match e {
        SubmitError::Busy { retry_after } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                retry_after: Some(retry_after),
                ..ErrorResponse::new(format!(
                    "Server busy. Try again in {retry_after} seconds."
                ))
            }),
        ),
        SubmitError::QuotaExceeded { kind, usage } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                message: Some(format!(
                    "You have reached your limit for {kind}. Please sign up to continue."
                )),
                usage: Some(usage),
                registration_required: Some(true),
                ..ErrorResponse::new("Usage limit reached")
            }),
        ),
        SubmitError::UnknownFigure(name) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!(
                "No historical image available for {name}"
            ))),
        ),
        SubmitError::InvalidImage(ImagingError::UnsupportedFormat) => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(ErrorResponse::new("Unsupported image format")),
        ),
        SubmitError::InvalidImage(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!("Invalid selfie: {e}"))),
        ),
        SubmitError::TransformFailed {
            message,
            retry_after,
        } => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                message: Some(message),
                retry_after,
                ..ErrorResponse::new("Face processing failed")
            }),
        ),
        SubmitError::Internal(e) => {
            tracing::error!(error = %e, "internal error handling generation request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            )
        }
    }
}
