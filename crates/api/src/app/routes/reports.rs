use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use shopdesk_auth::permissions::REPORTS_READ;

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

/// GET /api/reports/daily-sales?date=YYYY-MM-DD
///
/// Defaults to the shop-local current day.
pub async fn daily_sales(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::DailySalesQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, REPORTS_READ) {
        return resp;
    }
    let date = match q.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => match dto::parse_date(raw) {
            Ok(d) => Some(d),
            Err(e) => return errors::domain_error_to_response(e),
        },
        None => None,
    };

    (StatusCode::OK, Json(services.backoffice.daily_sales(date))).into_response()
}
