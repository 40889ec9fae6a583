use axum::{
    routing::{get, post},
    Router,
};

pub mod accounts;
pub mod common;
pub mod devices;
pub mod event_stream;
pub mod invoices;
pub mod orders;
pub mod products;
pub mod reports;
pub mod system;

/// Router for all authenticated endpoints (mounted under `/api`).
pub fn router() -> Router {
    let me = orders::me_router()
        .merge(invoices::me_router())
        .merge(devices::router())
        .merge(accounts::me_router());

    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(event_stream::stream_events))
        .route("/reports/daily-sales", get(reports::daily_sales))
        .route("/pos/invoices", post(invoices::pos_create_invoice))
        .nest("/products", products::router())
        .nest("/me", me)
        .nest("/admin/orders", orders::admin_router())
        .nest("/invoices", invoices::router())
        .nest("/users", accounts::users_router())
        .nest("/accounts", accounts::admin_router())
}
