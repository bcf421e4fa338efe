//! HTTP handlers.
//!
//! Each handler turns a request into one dispatcher call and maps the
//! result to a status code. No routing state lives here.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use slb_core::{ClusterConfig, HealthReport, PolicyUpdate, ReqMode, SlbRequest};
use slb_scheduler::SchedulerError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_for(e: &SchedulerError) -> StatusCode {
    match e {
        SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
        SchedulerError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// An empty body is a request with every field defaulted.
fn parse_request(body: &[u8]) -> Result<SlbRequest, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SlbRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            &format!("invalid request body: {e}"),
            StatusCode::BAD_REQUEST,
        )
    })
}

/// Like [`parse_request`], but a body that is not a request is treated as
/// an empty one. Client paths carry arbitrary application payloads.
fn parse_request_lenient(body: &[u8]) -> SlbRequest {
    parse_request(body).unwrap_or_default()
}

// ── Selection ──────────────────────────────────────────────────

/// POST /api/v1/select
pub async fn select(
    State(state): State<ApiState>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Response {
    match parse_request(&body) {
        Ok(request) => dispatch(&state, request, uri).await,
        Err(resp) => resp,
    }
}

/// Any unmatched route. Request fields come from the JSON body when there
/// is one; the path and query belong to the client and are passed through.
pub async fn fallback(
    State(state): State<ApiState>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Response {
    dispatch(&state, parse_request_lenient(&body), uri).await
}

async fn dispatch(state: &ApiState, request: SlbRequest, uri: Uri) -> Response {
    let executor = match request.mode {
        ReqMode::SelectServer => None,
        ReqMode::DoWork => match &state.executor {
            Some(executor) => Some(executor.clone()),
            None => {
                return error_response("no work executor configured", StatusCode::NOT_IMPLEMENTED);
            }
        },
    };

    let target = match state.dispatcher.select_server(&request).await {
        Ok(Some(target)) => target,
        Ok(None) => {
            debug!(session = %request.session_id, task_type = %request.task_type, "no server available");
            return error_response("no server available", StatusCode::INTERNAL_SERVER_ERROR);
        }
        Err(e) => {
            warn!(session = %request.session_id, error = %e, "selection failed");
            return error_response(&e.to_string(), status_for(&e));
        }
    };

    match executor {
        Some(executor) => executor.execute(&target, request, uri).await,
        None => {
            let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
            let location = format!("http://{target}{path}");
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
    }
}

// ── Collaborator inputs ────────────────────────────────────────

/// POST /api/v1/server/state
pub async fn update_server_state(
    State(state): State<ApiState>,
    Json(report): Json<HealthReport>,
) -> Response {
    match state.dispatcher.update_server_state(report).await {
        Ok(()) => ApiResponse::ok("accepted").into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)),
    }
}

/// POST /api/v1/user/policy
///
/// Validation failures are a 200 with `retCode: fail`.
pub async fn update_user_policy(
    State(state): State<ApiState>,
    Json(update): Json<PolicyUpdate>,
) -> Response {
    match state.dispatcher.update_user_policy(update).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => {
            warn!(error = %e, "policy update failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/v1/server/config
pub async fn update_config(
    State(state): State<ApiState>,
    Json(config): Json<ClusterConfig>,
) -> Response {
    match state.dispatcher.update_config(config).await {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)),
    }
}

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> Response {
    match state.dispatcher.status().await {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)),
    }
}
