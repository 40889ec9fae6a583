use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use shopdesk_core::{AggregateId, DomainError, Money, UserId};
use shopdesk_infra::backoffice::{
    BulkUpdateReport, DeviceRegistration, MergeReport, PaymentReceipt, PosLine, PosReceipt, PosSale,
};
use shopdesk_infra::projections::{AccountView, CategoryView, InvoiceView, OrderFilter, OrderView, ProductView};
use shopdesk_orders::{OrderSource, OrderStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub category_id: Option<String>,
    pub price: Money,
    #[serde(default)]
    pub stock: u32,
    pub image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub category_id: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<Money>,
    pub stock: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BulkItemRequest {
    pub id: String,
    pub stock: Option<u32>,
    pub price: Option<Money>,
}

#[derive(Debug, Deserialize)]
pub struct BulkUpdateRequest {
    #[serde(default)]
    pub items: Vec<BulkItemRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductListQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

/// Storefront checkout body; the shipping snapshot arrives flattened.
#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
    pub payment_method: Option<String>,
    pub shipping_name: String,
    pub shipping_phone: String,
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
    pub source: Option<String>,
    pub since: Option<String>,
}

impl OrderListQuery {
    /// Unknown status/source values and unparsable dates are ignored.
    pub fn to_filter(&self) -> OrderFilter {
        OrderFilter {
            status: self.status.as_deref().and_then(|s| OrderStatus::parse(s).ok()),
            source: self.source.as_deref().and_then(|s| OrderSource::parse(s).ok()),
            since: self.since.as_deref().and_then(parse_since),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct PosItemRequest {
    pub product_id: String,
    pub name: Option<String>,
    #[serde(alias = "quantity")]
    pub qty: u32,
    pub unit_price: Money,
}

#[derive(Debug, Deserialize)]
pub struct PosSaleRequest {
    #[serde(default)]
    pub items: Vec<PosItemRequest>,
    pub discount: Option<Money>,
    pub paid_amount: Option<Money>,
    #[serde(default)]
    pub paid: bool,
    pub payment_method: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_user_id: Option<String>,
    pub shipping_name: Option<String>,
    pub shipping_phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
}

impl PosSaleRequest {
    pub fn into_sale(self) -> Result<PosSale, DomainError> {
        let items = self
            .items
            .into_iter()
            .map(|item| -> Result<PosLine, DomainError> {
                Ok(PosLine {
                    product_id: shopdesk_catalog::ProductId::new(item.product_id.parse::<AggregateId>()?),
                    name: item.name,
                    quantity: item.qty,
                    unit_price: item.unit_price,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PosSale {
            items,
            discount: self.discount.unwrap_or_default(),
            paid_amount: self.paid_amount.unwrap_or_default(),
            paid: self.paid,
            payment_method: self.payment_method,
            customer_name: self.customer_name.unwrap_or_default(),
            customer_phone: self.customer_phone.unwrap_or_default(),
            customer_user_id: self.customer_user_id,
            shipping_name: self.shipping_name.unwrap_or_default(),
            shipping_phone: self.shipping_phone.unwrap_or_default(),
            address_line1: self.address_line1.unwrap_or_default(),
            address_line2: self.address_line2.unwrap_or_default(),
            city: self.city.unwrap_or_default(),
            state: self.state.unwrap_or_default(),
            pincode: self.pincode.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PayInvoiceRequest {
    #[serde(default = "default_pay_method")]
    pub method: String,
    pub amount: Money,
    pub txn_id: Option<String>,
}

fn default_pay_method() -> String {
    "cash".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DailySalesQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    #[serde(default)]
    pub token: String,
    pub platform: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceTokenRequest {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterAccountRequest {
    pub phone: String,
    pub confirm_phone: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub gender: Option<String>,
    pub role: Option<String>,
    /// Admins may register someone else; everyone else registers themselves.
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfilePatchRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_aggregate_id(raw: &str) -> Result<AggregateId, DomainError> {
    raw.trim().parse::<AggregateId>()
}

pub fn parse_user_id(raw: &str) -> Result<UserId, DomainError> {
    raw.trim().parse::<UserId>()
}

/// RFC 3339 timestamp, or a bare date meaning midnight UTC.
pub fn parse_since(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        })
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| DomainError::validation("Invalid date. Use YYYY-MM-DD."))
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn category_to_json(c: CategoryView) -> JsonValue {
    json!({
        "id": c.id.to_string(),
        "name": c.name,
        "created_at": c.created_at.to_rfc3339(),
    })
}

pub fn product_to_json(p: ProductView, category: Option<String>) -> JsonValue {
    json!({
        "id": p.id.to_string(),
        "name": p.name,
        "category_id": p.category_id.map(|c| c.to_string()),
        "category": category,
        "price": p.price,
        "stock": p.stock,
        "image_url": p.image_url,
        "merged_into": p.merged_into.map(|k| k.to_string()),
        "created_at": p.created_at.to_rfc3339(),
        "updated_at": p.updated_at.to_rfc3339(),
    })
}

/// Customers see POS purchases labelled as in-store instead of by status.
pub fn order_to_json(o: OrderView, for_customer: bool) -> JsonValue {
    let is_pos = o.is_pos();
    let status_display = if for_customer && is_pos {
        "In-store purchase"
    } else {
        o.status.label()
    };
    let source_display = match o.source {
        OrderSource::Online => "Online",
        OrderSource::Pos => "POS",
    };

    let mut body = json!({
        "id": o.id.to_string(),
        "status": o.status.as_str(),
        "status_display": status_display,
        "source": o.source.as_str(),
        "source_display": source_display,
        "payment_method": o.payment_method,
        "total_amount": o.total,
        "customer_id": o.customer_id.map(|c| c.to_string()),
        "placed_by": o.placed_by.to_string(),
        "shipping_name": o.shipping.name,
        "shipping_phone": o.shipping.phone,
        "address_line1": o.shipping.line1,
        "address_line2": o.shipping.line2,
        "city": o.shipping.city,
        "state": o.shipping.state,
        "pincode": o.shipping.pincode,
        "items": o.items.into_iter().map(|i| json!({
            "product_id": i.product_id.to_string(),
            "product_name": i.name,
            "quantity": i.quantity,
            "unit_price": i.unit_price,
            "line_total": i.line_total,
        })).collect::<Vec<_>>(),
        "invoice_id": o.invoice_id.map(|i| i.to_string()),
        "payment_reference": o.payment_reference,
        "created_at": o.created_at.to_rfc3339(),
        "updated_at": o.updated_at.to_rfc3339(),
    });
    if for_customer {
        body["is_pos"] = JsonValue::Bool(is_pos);
    }
    body
}

pub fn invoice_to_json(rm: InvoiceView) -> JsonValue {
    let balance_due = rm.balance_due();
    json!({
        "id": rm.id.to_string(),
        "mode": rm.mode.as_str(),
        "status": rm.status.as_str(),
        "order_id": rm.order_id.map(|o| o.to_string()),
        "customer_id": rm.customer_id.map(|c| c.to_string()),
        "customer_name": rm.customer_name,
        "customer_phone": rm.customer_phone,
        "cashier_id": rm.cashier_id.map(|c| c.to_string()),
        "lines": rm.lines.into_iter().map(|l| json!({
            "product_id": l.product_id.map(|p| p.to_string()),
            "name": l.name,
            "quantity": l.quantity,
            "unit_price": l.unit_price,
            "line_total": l.line_total,
        })).collect::<Vec<_>>(),
        "subtotal": rm.subtotal,
        "discount": rm.discount,
        "total": rm.total,
        "paid_amount": rm.paid_amount,
        "balance_due": balance_due,
        "payments": rm.payments.into_iter().map(|p| json!({
            "id": p.payment_id.to_string(),
            "method": p.method.as_str(),
            "status": p.status,
            "amount": p.amount,
            "txn_id": p.txn_id,
            "received_by": p.received_by.map(|u| u.to_string()),
            "created_at": p.created_at.to_rfc3339(),
        })).collect::<Vec<_>>(),
        "created_at": rm.created_at.to_rfc3339(),
        "updated_at": rm.updated_at.to_rfc3339(),
    })
}

pub fn pos_receipt_to_json(r: PosReceipt) -> JsonValue {
    json!({
        "ok": true,
        "order_id": r.order_id.to_string(),
        "invoice_id": r.invoice_id.to_string(),
        "status": r.invoice_status.as_str(),
        "order_status": r.order_status.as_str(),
        "total": r.total,
        "paid_amount": r.paid_amount,
        "change_due": r.change_due,
        "mode": r.mode.as_str(),
        "customer_id": r.customer_id.map(|c| c.to_string()),
        "cashier_id": r.cashier_id.to_string(),
    })
}

pub fn payment_receipt_to_json(r: PaymentReceipt) -> JsonValue {
    json!({
        "ok": true,
        "order_id": r.order_id.map(|o| o.to_string()),
        "order_status": r.order_status.map(|s| s.as_str()),
        "invoice_id": r.invoice.id.to_string(),
        "status": r.invoice.status.as_str(),
        "paid_amount": r.invoice.paid_amount,
        "payment_id": r.payment_id.to_string(),
        "mode": r.invoice.mode.as_str(),
        "customer_id": r.invoice.customer_id.map(|c| c.to_string()),
        "cashier_id": r.invoice.cashier_id.map(|c| c.to_string()),
    })
}

pub fn account_to_json(a: AccountView) -> JsonValue {
    json!({
        "user_id": a.user_id.to_string(),
        "phone": a.phone,
        "name": a.name,
        "address": a.address,
        "gender": a.gender,
        "role": a.role,
        "active": a.active,
        "joined_at": a.joined_at.to_rfc3339(),
    })
}

pub fn device_registration_to_json(r: DeviceRegistration) -> JsonValue {
    json!({
        "ok": true,
        "created": r.created,
        "platform": r.platform.as_str(),
        "is_admin": r.is_admin,
    })
}

pub fn bulk_report_to_json(r: BulkUpdateReport) -> JsonValue {
    json!({
        "ok": r.errors.is_empty(),
        "updated": r.updated,
        "errors": r.errors,
    })
}

pub fn merge_report_to_json(r: MergeReport) -> JsonValue {
    json!({
        "groups": r.groups,
        "retired": r.retired.into_iter().map(|(retired, keeper)| json!({
            "product_id": retired.to_string(),
            "merged_into": keeper.to_string(),
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn since_accepts_timestamps_and_dates() {
        assert_eq!(
            parse_since("2025-08-11T12:00:00Z"),
            Some(Utc.with_ymd_and_hms(2025, 8, 11, 12, 0, 0).unwrap())
        );
        assert_eq!(
            parse_since("2025-08-11"),
            Some(Utc.with_ymd_and_hms(2025, 8, 11, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_since("yesterday"), None);
    }

    #[test]
    fn unknown_filter_values_are_dropped() {
        let query = OrderListQuery {
            status: Some("paid".into()),
            source: Some("kiosk".into()),
            since: Some("not a date".into()),
        };
        let filter = query.to_filter();
        assert_eq!(filter.status, Some(OrderStatus::Paid));
        assert_eq!(filter.source, None);
        assert_eq!(filter.since, None);
    }

    #[test]
    fn pos_request_accepts_qty_and_quantity() {
        let id = AggregateId::new();
        let body = json!({
            "items": [
                { "product_id": id.to_string(), "qty": 2, "unit_price": "10.00" },
                { "product_id": id.to_string(), "quantity": 1, "unit_price": 5 },
            ],
            "paid": true,
        });
        let sale = serde_json::from_value::<PosSaleRequest>(body).unwrap().into_sale().unwrap();
        assert_eq!(sale.items.len(), 2);
        assert_eq!(sale.items[0].quantity, 2);
        assert_eq!(sale.items[1].unit_price, Money::from_rupees(5));
        assert!(sale.paid);
        assert_eq!(sale.discount, Money::ZERO);
    }

    #[test]
    fn pos_request_rejects_bad_product_ids() {
        let body = json!({ "items": [{ "product_id": "42", "qty": 1, "unit_price": "1.00" }] });
        let request = serde_json::from_value::<PosSaleRequest>(body).unwrap();
        assert!(matches!(request.into_sale(), Err(DomainError::InvalidId(_))));
    }
}
