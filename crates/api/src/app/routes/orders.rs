use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};

use shopdesk_auth::permissions::{ORDERS_MANAGE, ORDERS_OWN, ORDERS_PLACE, ORDERS_READ};
use shopdesk_catalog::ProductId;
use shopdesk_infra::backoffice::{LineEdit, OrderLineRequest, PlaceOnlineOrder};
use shopdesk_infra::projections::OrderView;
use shopdesk_orders::{OrderId, OrderPaymentMethod, ShippingAddress};

use crate::app::routes::common::{require, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

/// `/api/me/orders`: the caller's own orders.
pub fn me_router() -> Router {
    Router::new()
        .route("/orders", get(list_my_orders).post(place_order))
        .route("/orders/:id", get(get_my_order))
        .route("/orders/:id/cancel", post(cancel_my_order))
}

/// `/api/admin/orders`: every order, for staff.
pub fn admin_router() -> Router {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", patch(change_status))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/items", post(add_item))
        .route("/:id/items/:product_id", patch(set_item_quantity).delete(remove_item))
}

fn parse_order_id(raw: &str) -> Result<OrderId, axum::response::Response> {
    dto::parse_aggregate_id(raw)
        .map(OrderId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"))
}

fn parse_product_id(raw: &str) -> Result<ProductId, axum::response::Response> {
    dto::parse_aggregate_id(raw)
        .map(ProductId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"))
}

fn orders_json(orders: Vec<OrderView>, for_customer: bool) -> axum::response::Response {
    let body = orders
        .into_iter()
        .map(|o| dto::order_to_json(o, for_customer))
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(body)).into_response()
}

fn order_result(
    result: Result<OrderView, shopdesk_infra::command_dispatcher::DispatchError>,
    for_customer: bool,
) -> axum::response::Response {
    match result {
        Ok(view) => (StatusCode::OK, Json(dto::order_to_json(view, for_customer))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

// ---- customer ----

pub async fn place_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::PlaceOrderRequest>,
) -> axum::response::Response {
    let mut items = Vec::with_capacity(body.items.len());
    for item in &body.items {
        let product_id = match parse_product_id(&item.product_id) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        items.push(OrderLineRequest {
            product_id,
            quantity: item.quantity,
        });
    }
    let payment_method = match body.payment_method.as_deref() {
        Some(raw) => match OrderPaymentMethod::parse(raw) {
            Ok(m) => m,
            Err(e) => return errors::domain_error_to_response(e),
        },
        None => OrderPaymentMethod::default(),
    };

    let cmd_auth = CmdAuth {
        inner: PlaceOnlineOrder {
            items,
            payment_method,
            shipping: ShippingAddress {
                name: body.shipping_name,
                phone: body.shipping_phone,
                line1: body.address_line1,
                line2: body.address_line2,
                city: body.city,
                state: body.state,
                pincode: body.pincode,
            },
            payment_reference: body.payment_reference,
        },
        required: vec![ORDERS_PLACE],
    };
    if let Err(e) = crate::authz::authorize_command(&principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.backoffice.place_order(principal.principal(), &cmd_auth.inner) {
        Ok(view) => (StatusCode::CREATED, Json(dto::order_to_json(view, true))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_my_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::OrderListQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_OWN) {
        return resp;
    }
    orders_json(services.backoffice.orders_for_user(principal.principal(), &q.to_filter()), true)
}

pub async fn get_my_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_OWN) {
        return resp;
    }
    let id = match parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    order_result(services.backoffice.order_for_user(principal.principal(), id), true)
}

pub async fn cancel_my_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_OWN) {
        return resp;
    }
    let id = match parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    order_result(services.backoffice.cancel_order(principal.principal(), id), true)
}

// ---- staff ----

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::OrderListQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_READ) {
        return resp;
    }
    orders_json(services.backoffice.all_orders(&q.to_filter()), false)
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_READ) {
        return resp;
    }
    let id = match parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    order_result(services.backoffice.order(id), false)
}

pub async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangeStatusRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_MANAGE) {
        return resp;
    }
    let id = match parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    order_result(
        services.backoffice.change_order_status(principal.principal(), id, &body.status),
        false,
    )
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_MANAGE) {
        return resp;
    }
    let id = match parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    order_result(services.backoffice.cancel_order(principal.principal(), id), false)
}

pub async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddItemRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_MANAGE) {
        return resp;
    }
    let (id, product_id) = match (parse_order_id(&id), parse_product_id(&body.product_id)) {
        (Ok(id), Ok(product_id)) => (id, product_id),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let edit = LineEdit::Add {
        product_id,
        quantity: body.quantity,
    };
    order_result(services.backoffice.edit_order_line(id, edit), false)
}

pub async fn set_item_quantity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, product_id)): Path<(String, String)>,
    Json(body): Json<dto::SetQuantityRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_MANAGE) {
        return resp;
    }
    let (id, product_id) = match (parse_order_id(&id), parse_product_id(&product_id)) {
        (Ok(id), Ok(product_id)) => (id, product_id),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let edit = LineEdit::SetQuantity {
        product_id,
        quantity: body.quantity,
    };
    order_result(services.backoffice.edit_order_line(id, edit), false)
}

pub async fn remove_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, product_id)): Path<(String, String)>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_MANAGE) {
        return resp;
    }
    let (id, product_id) = match (parse_order_id(&id), parse_product_id(&product_id)) {
        (Ok(id), Ok(product_id)) => (id, product_id),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    order_result(services.backoffice.edit_order_line(id, LineEdit::Remove { product_id }), false)
}
