use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;

use shopdesk_auth::permissions::DEVICES_MANAGE;

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

/// `/api/me/devices`: push token registry for the caller.
pub fn router() -> Router {
    Router::new()
        .route("/devices", post(register_device))
        .route("/devices/delete", post(delete_device))
        .route("/devices/test", post(test_push))
}

pub async fn register_device(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RegisterDeviceRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, DEVICES_MANAGE) {
        return resp;
    }
    match services.backoffice.register_device(
        principal.principal(),
        &body.token,
        body.platform.as_deref(),
        body.is_admin,
    ) {
        Ok(registration) => {
            (StatusCode::OK, Json(dto::device_registration_to_json(registration))).into_response()
        }
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn delete_device(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::DeviceTokenRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, DEVICES_MANAGE) {
        return resp;
    }
    let token = body.token.unwrap_or_default();
    match services.backoffice.unregister_device(principal.principal(), &token) {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// Sends a test push to the given token, or to all of the caller's devices.
pub async fn test_push(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::DeviceTokenRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, DEVICES_MANAGE) {
        return resp;
    }
    let tokens = services
        .backoffice
        .test_push_tokens(principal.principal(), body.token.as_deref());
    let report = services.notifier.send_test(&tokens).await;
    (StatusCode::OK, Json(report)).into_response()
}
