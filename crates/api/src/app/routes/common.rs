use axum::http::StatusCode;

use shopdesk_auth::{CommandAuthorization, Permission};

use crate::app::errors;
use crate::context::PrincipalContext;

/// Small helper wrapper to associate required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Guard for handlers whose command is built later (or is a query).
pub fn require(principal: &PrincipalContext, permission: Permission) -> Result<(), axum::response::Response> {
    let cmd_auth = CmdAuth {
        inner: (),
        required: vec![permission],
    };
    crate::authz::authorize_command(principal, &cmd_auth)
        .map_err(|e| errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}
