use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::json;

use watergile_infra::command_dispatcher::DispatchError;
use watergile_infra::external::ExternalError;
use watergile_infra::services::{ServiceError, ServiceResult};

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Dispatch(e) => dispatch_error_to_response(e),
        ServiceError::Store(e) => {
            tracing::error!(error = %e, "record store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        ServiceError::Projection(e) => {
            tracing::error!(error = %e, "projection failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "projection_error", e.to_string())
        }
        ServiceError::External(e) => external_error_to_response(e),
    }
}

fn external_error_to_response(err: ExternalError) -> axum::response::Response {
    match err {
        ExternalError::InvalidRequest(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        ExternalError::Config(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "service_disabled", msg)
        }
        other => json_error(StatusCode::BAD_GATEWAY, "upstream_error", other.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 200 with the serialised value, or the mapped error.
pub fn ok<T: Serialize>(result: ServiceResult<T>) -> axum::response::Response {
    respond(StatusCode::OK, result)
}

/// 201 with the serialised value, or the mapped error.
pub fn created<T: Serialize>(result: ServiceResult<T>) -> axum::response::Response {
    respond(StatusCode::CREATED, result)
}

/// 200 with `{"items": [...]}`.
pub fn items<T: Serialize>(result: ServiceResult<Vec<T>>) -> axum::response::Response {
    match result {
        Ok(items) => (StatusCode::OK, axum::Json(json!({ "items": items }))).into_response(),
        Err(e) => service_error_to_response(e),
    }
}

fn respond<T: Serialize>(status: StatusCode, result: ServiceResult<T>) -> axum::response::Response {
    match result {
        Ok(value) => (status, axum::Json(value)).into_response(),
        Err(e) => service_error_to_response(e),
    }
}

pub fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.parse::<T>().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid {what} id"),
        )
    })
}
