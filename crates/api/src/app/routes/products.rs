use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use shopdesk_auth::permissions::{CATALOG_READ, CATALOG_WRITE, STOCK_SHEETS};
use shopdesk_catalog::{CategoryId, ProductId};
use shopdesk_core::DomainError;
use shopdesk_infra::backoffice::{BulkItem, NewProduct, ProductPatch, ProductQuery};

use crate::app::routes::common::{require, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/categories", get(list_categories).post(create_category))
        .route("/bulk_update", post(bulk_update))
        .route("/merge_duplicates", post(merge_duplicates))
        .route("/stock/upload", post(upload_stock_sheet))
        .route("/stock/download", get(download_stock_sheet))
        .route("/:id", get(get_product).patch(update_product))
}

fn parse_product_id(raw: &str) -> Result<ProductId, axum::response::Response> {
    dto::parse_aggregate_id(raw)
        .map(ProductId::new)
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"))
}

/// Blank means "no category".
fn parse_category_id(raw: Option<&str>) -> Result<Option<CategoryId>, DomainError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Ok(Some(CategoryId::new(dto::parse_aggregate_id(raw)?))),
        None => Ok(None),
    }
}

fn product_json(services: &AppServices, view: shopdesk_infra::projections::ProductView) -> serde_json::Value {
    let category = services.backoffice.projections().catalog.category_name(view.category_id);
    dto::product_to_json(view, category)
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::ProductListQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, CATALOG_READ) {
        return resp;
    }

    let query = ProductQuery {
        search: q.search,
        category: q.category,
        ordering: q.ordering,
        limit: q.limit,
        offset: q.offset.unwrap_or(0),
    };
    let products = services
        .backoffice
        .list_products(&query)
        .into_iter()
        .map(|p| product_json(&services, p))
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(products)).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, CATALOG_READ) {
        return resp;
    }
    let id = match parse_product_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.backoffice.product(id) {
        Ok(view) => (StatusCode::OK, Json(product_json(&services, view))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let category_id = match parse_category_id(body.category_id.as_deref()) {
        Ok(c) => c,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let cmd_auth = CmdAuth {
        inner: NewProduct {
            name: body.name,
            category_id,
            price: body.price,
            stock: body.stock,
            image_url: body.image_url,
        },
        required: vec![CATALOG_WRITE],
    };
    if let Err(e) = crate::authz::authorize_command(&principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    match services.backoffice.create_product(cmd_auth.inner) {
        Ok(view) => (StatusCode::CREATED, Json(product_json(&services, view))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateProductRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, CATALOG_WRITE) {
        return resp;
    }
    let id = match parse_product_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let category_id = match parse_category_id(body.category_id.as_deref()) {
        Ok(c) => c,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let patch = ProductPatch {
        name: body.name,
        category_id,
        image_url: body.image_url,
        price: body.price,
        stock: body.stock,
    };
    match services.backoffice.update_product(id, patch) {
        Ok(view) => (StatusCode::OK, Json(product_json(&services, view))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn bulk_update(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::BulkUpdateRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, CATALOG_WRITE) {
        return resp;
    }

    let mut items = Vec::with_capacity(body.items.len());
    for item in body.items {
        let id = match parse_product_id(&item.id) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        items.push(BulkItem {
            id,
            stock: item.stock,
            price: item.price,
        });
    }

    match services.backoffice.bulk_update(&items) {
        Ok(report) => (StatusCode::OK, Json(dto::bulk_report_to_json(report))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn merge_duplicates(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, CATALOG_WRITE) {
        return resp;
    }
    match services.backoffice.merge_duplicates() {
        Ok(report) => (StatusCode::OK, Json(dto::merge_report_to_json(report))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_categories(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, CATALOG_READ) {
        return resp;
    }
    let categories = services
        .backoffice
        .categories()
        .into_iter()
        .map(dto::category_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(categories)).into_response()
}

pub async fn create_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateCategoryRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, CATALOG_WRITE) {
        return resp;
    }
    match services.backoffice.create_category(&body.name) {
        Ok(view) => (StatusCode::CREATED, Json(dto::category_to_json(view))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// POST /api/products/stock/upload
///
/// Body is the stock sheet as CSV.
pub async fn upload_stock_sheet(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Bytes,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, STOCK_SHEETS) {
        return resp;
    }
    if body.is_empty() {
        return errors::bad_request("No file uploaded.");
    }

    match services.backoffice.import_stock_sheet(&body) {
        Ok(report) => {
            let mut json = serde_json::to_value(&report).unwrap_or_default();
            json["ok"] = serde_json::Value::Bool(true);
            (StatusCode::OK, Json(json)).into_response()
        }
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn download_stock_sheet(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, STOCK_SHEETS) {
        return resp;
    }

    match services.backoffice.export_stock(Utc::now()) {
        Ok(export) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", export.filename),
                ),
            ],
            export.body,
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
