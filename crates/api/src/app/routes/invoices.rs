use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use shopdesk_auth::permissions::{INVOICES_ADJUST, INVOICES_OWN, INVOICES_PAY, INVOICES_READ, POS_SELL};
use shopdesk_billing::{InvoiceId, InvoiceStatus, PaymentId};
use shopdesk_infra::projections::InvoiceView;

use crate::app::routes::common::{require, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

/// `/api/invoices`: staff billing desk.
pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices))
        .route("/:id", get(get_invoice))
        .route("/:id/pay", post(pay_invoice))
        .route("/:id/void", post(void_invoice))
        .route("/:id/payments/:payment_id/refund", post(refund_payment))
}

/// `/api/me/invoices`: the caller's own invoices.
pub fn me_router() -> Router {
    Router::new()
        .route("/invoices", get(list_my_invoices))
        .route("/invoices/:id", get(get_my_invoice))
}

fn parse_invoice_id(raw: &str) -> Result<InvoiceId, axum::response::Response> {
    dto::parse_aggregate_id(raw)
        .map(InvoiceId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id"))
}

fn parse_status(raw: &str) -> Option<InvoiceStatus> {
    [InvoiceStatus::Open, InvoiceStatus::Paid, InvoiceStatus::Void]
        .into_iter()
        .find(|s| s.as_str().eq_ignore_ascii_case(raw.trim()))
}

fn invoices_json(invoices: Vec<InvoiceView>) -> axum::response::Response {
    let body = invoices.into_iter().map(dto::invoice_to_json).collect::<Vec<_>>();
    (StatusCode::OK, Json(body)).into_response()
}

fn invoice_result(
    result: Result<InvoiceView, shopdesk_infra::command_dispatcher::DispatchError>,
) -> axum::response::Response {
    match result {
        Ok(view) => (StatusCode::OK, Json(dto::invoice_to_json(view))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// POST /api/pos/invoices
///
/// Rings up a counter sale. The order id doubles as the bill number.
pub async fn pos_create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::PosSaleRequest>,
) -> axum::response::Response {
    let sale = match body.into_sale() {
        Ok(sale) => sale,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let cmd_auth = CmdAuth {
        inner: sale,
        required: vec![POS_SELL],
    };
    if let Err(e) = crate::authz::authorize_command(&principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.backoffice.pos_checkout(principal.principal(), &cmd_auth.inner) {
        Ok(receipt) => (StatusCode::CREATED, Json(dto::pos_receipt_to_json(receipt))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn pay_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PayInvoiceRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, INVOICES_PAY) {
        return resp;
    }
    let id = match parse_invoice_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .backoffice
        .pay_invoice(principal.principal(), id, &body.method, body.amount, body.txn_id)
    {
        Ok(receipt) => (StatusCode::OK, Json(dto::payment_receipt_to_json(receipt))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn refund_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, payment_id)): Path<(String, String)>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, INVOICES_ADJUST) {
        return resp;
    }
    let id = match parse_invoice_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let payment_id = match dto::parse_aggregate_id(&payment_id) {
        Ok(p) => PaymentId::new(p),
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid payment id"),
    };
    invoice_result(services.backoffice.refund_payment(id, payment_id))
}

pub async fn void_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, INVOICES_ADJUST) {
        return resp;
    }
    let id = match parse_invoice_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    invoice_result(services.backoffice.void_invoice(id))
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::InvoiceListQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, INVOICES_READ) {
        return resp;
    }
    let status = q.status.as_deref().and_then(parse_status);
    invoices_json(services.backoffice.invoices(status))
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, INVOICES_READ) {
        return resp;
    }
    let id = match parse_invoice_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    invoice_result(services.backoffice.invoice(id))
}

pub async fn list_my_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, INVOICES_OWN) {
        return resp;
    }
    invoices_json(services.backoffice.invoices_for_user(principal.principal()))
}

pub async fn get_my_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, INVOICES_OWN) {
        return resp;
    }
    let id = match parse_invoice_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    invoice_result(services.backoffice.invoice_for_user(principal.principal(), id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filter_is_case_insensitive_and_lenient() {
        assert_eq!(parse_status("PAID"), Some(InvoiceStatus::Paid));
        assert_eq!(parse_status(" open "), Some(InvoiceStatus::Open));
        assert_eq!(parse_status("settled"), None);
    }
}
