use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use shopdesk_core::DomainError;
use shopdesk_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        DispatchError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DispatchError::Deserialize(msg) => {
            tracing::error!(error = %msg, "stored event could not be decoded");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Io(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "io_error", msg),
        DispatchError::Store(e) => {
            tracing::error!(error = %e, "event store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

/// Request-level parse failures (bad ids, unknown enum values).
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    dispatch_error_to_response(err.into())
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

pub fn bad_request(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_errors_map_to_status_codes() {
        let cases = [
            (DispatchError::Concurrency("stale".into()), StatusCode::CONFLICT),
            (DispatchError::validation("bad"), StatusCode::BAD_REQUEST),
            (DispatchError::InvariantViolation("paid".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (DispatchError::not_found("Invoice not found"), StatusCode::NOT_FOUND),
            (DispatchError::forbidden("no"), StatusCode::FORBIDDEN),
            (DispatchError::Io("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(dispatch_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn invalid_ids_are_bad_requests() {
        let err = DomainError::InvalidId("nope".into());
        assert_eq!(domain_error_to_response(err).status(), StatusCode::BAD_REQUEST);
    }
}
