use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use shopdesk_auth::permissions::{ACCOUNTS_MANAGE, ACCOUNTS_SELF};
use shopdesk_auth::AccountRole;
use shopdesk_core::UserId;
use shopdesk_infra::backoffice::{AccountRegistration, ProfilePatch};
use shopdesk_infra::projections::AccountView;

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

/// `/api/users`
pub fn users_router() -> Router {
    Router::new().route("/register", post(register))
}

/// `/api/me/profile`
pub fn me_router() -> Router {
    Router::new().route("/profile", get(my_profile).patch(update_my_profile))
}

/// `/api/accounts`: account administration.
pub fn admin_router() -> Router {
    Router::new()
        .route("/", get(list_accounts))
        .route("/:user_id", get(get_account).patch(update_account))
        .route("/:user_id/role", post(change_role))
        .route("/:user_id/deactivate", post(deactivate))
}

fn parse_user(raw: &str) -> Result<UserId, axum::response::Response> {
    dto::parse_user_id(raw)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid user id"))
}

fn account_result(
    result: Result<AccountView, shopdesk_infra::command_dispatcher::DispatchError>,
    status: StatusCode,
) -> axum::response::Response {
    match result {
        Ok(view) => (status, Json(dto::account_to_json(view))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

fn profile_patch(body: dto::ProfilePatchRequest) -> ProfilePatch {
    ProfilePatch {
        name: body.name,
        address: body.address,
        gender: body.gender,
    }
}

/// POST /api/users/register
///
/// Creates the shop account of the token's subject. Admins may pass
/// `user_id` and a staff `role` to register someone else.
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RegisterAccountRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ACCOUNTS_SELF) {
        return resp;
    }

    let user_id = match body.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            let user_id = match parse_user(raw) {
                Ok(u) => u,
                Err(resp) => return resp,
            };
            if user_id != principal.user_id() {
                if let Err(resp) = require(&principal, ACCOUNTS_MANAGE) {
                    return resp;
                }
            }
            user_id
        }
        None => principal.user_id(),
    };
    let role = match body.role.as_deref().map(AccountRole::parse).transpose() {
        Ok(role) => role,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let registration = AccountRegistration {
        phone: body.phone,
        confirm_phone: body.confirm_phone,
        name: body.name,
        address: body.address,
        gender: body.gender,
        role,
    };
    account_result(
        services
            .backoffice
            .register_account(Some(principal.principal()), user_id, registration),
        StatusCode::CREATED,
    )
}

pub async fn my_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ACCOUNTS_SELF) {
        return resp;
    }
    account_result(services.backoffice.account(principal.user_id()), StatusCode::OK)
}

pub async fn update_my_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ProfilePatchRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ACCOUNTS_SELF) {
        return resp;
    }
    account_result(
        services
            .backoffice
            .update_profile(principal.principal(), principal.user_id(), profile_patch(body)),
        StatusCode::OK,
    )
}

pub async fn list_accounts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ACCOUNTS_MANAGE) {
        return resp;
    }
    let accounts = services
        .backoffice
        .accounts()
        .into_iter()
        .map(dto::account_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(accounts)).into_response()
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ACCOUNTS_MANAGE) {
        return resp;
    }
    let user_id = match parse_user(&user_id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    account_result(services.backoffice.account(user_id), StatusCode::OK)
}

pub async fn update_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<String>,
    Json(body): Json<dto::ProfilePatchRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ACCOUNTS_MANAGE) {
        return resp;
    }
    let user_id = match parse_user(&user_id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    account_result(
        services
            .backoffice
            .update_profile(principal.principal(), user_id, profile_patch(body)),
        StatusCode::OK,
    )
}

pub async fn change_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<String>,
    Json(body): Json<dto::ChangeRoleRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ACCOUNTS_MANAGE) {
        return resp;
    }
    let user_id = match parse_user(&user_id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let role = match AccountRole::parse(&body.role) {
        Ok(r) => r,
        Err(e) => return errors::domain_error_to_response(e),
    };
    account_result(services.backoffice.change_role(user_id, role), StatusCode::OK)
}

pub async fn deactivate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ACCOUNTS_MANAGE) {
        return resp;
    }
    let user_id = match parse_user(&user_id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    account_result(services.backoffice.deactivate_account(user_id), StatusCode::OK)
}
