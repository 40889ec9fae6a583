//! Back-office workflows.
//!
//! Every workflow follows the same shape: load the aggregates it touches,
//! let each one decide, stage all decisions in one [`UnitOfWork`] and commit
//! them as a single batch. Stock reservations, order changes and invoice
//! changes therefore land together or not at all. Workflows that contend on
//! hot streams (product stock) are wrapped in [`retry_on_conflict`].
//!
//! Reads go to [`ShopProjections`], which the dispatcher updates on every
//! commit before returning, so a workflow can hand back the fresh view of
//! what it just wrote.
//!
//! [`UnitOfWork`]: crate::command_dispatcher::UnitOfWork
//! [`retry_on_conflict`]: crate::command_dispatcher::retry_on_conflict

use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};
use serde_json::Value as JsonValue;

use shopdesk_auth::Account;
use shopdesk_billing::{BillingPolicy, Invoice, InvoiceId};
use shopdesk_catalog::{DEFAULT_HEADER_ROWS, Product, ProductId};
use shopdesk_core::{AggregateId, DomainError, UserId};
use shopdesk_events::{EventEnvelope, InMemoryEventBus};
use shopdesk_orders::{Order, OrderId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::projections::{InvoiceView, OrderView, ProductView, ProjectionError, ShopProjections};

pub mod accounts;
pub mod billing;
pub mod catalog;
pub mod devices;
pub mod orders;
pub mod pos;
pub mod reports;
pub mod stock_sheet;

pub use accounts::{AccountRegistration, ProfilePatch};
pub use billing::PaymentReceipt;
pub use catalog::{BulkItem, BulkUpdateReport, MergeReport, NewProduct, ProductPatch, ProductQuery, StockExport};
pub use devices::DeviceRegistration;
pub use orders::{LineEdit, OrderLineRequest, PlaceOnlineOrder};
pub use pos::{PosLine, PosReceipt, PosSale};
pub use reports::{CashierRow, DailySalesReport, ProductSales, SourceTotals};

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type ShopDispatcher = CommandDispatcher<SharedStore, SharedBus>;

/// Indian Standard Time, the shop's default clock.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;

/// Address stamped on POS orders when the cashier leaves it blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosAddress {
    pub line1: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
}

impl Default for PosAddress {
    fn default() -> Self {
        Self {
            line1: "POS COUNTER".to_string(),
            city: "Local".to_string(),
            state: "Local".to_string(),
            pincode: "000000".to_string(),
        }
    }
}

impl PosAddress {
    /// Parses `line1|city|state|pincode`. Blank parts keep their default.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let parts: Vec<&str> = raw.split('|').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(DomainError::validation(
                "POS address must look like line1|city|state|pincode",
            ));
        }
        let defaults = Self::default();
        let pick = |value: &str, fallback: String| {
            if value.is_empty() { fallback } else { value.to_string() }
        };
        Ok(Self {
            line1: pick(parts[0], defaults.line1),
            city: pick(parts[1], defaults.city),
            state: pick(parts[2], defaults.state),
            pincode: pick(parts[3], defaults.pincode),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BackofficeConfig {
    pub billing: BillingPolicy,
    pub pos_address: PosAddress,
    /// "My orders" also lists orders shipped to the caller's phone number.
    pub include_shipping_phone_match: bool,
    /// Offset used for shop-local day boundaries.
    pub shop_offset: FixedOffset,
    pub stock_sheet_header_rows: usize,
}

impl Default for BackofficeConfig {
    fn default() -> Self {
        Self {
            billing: BillingPolicy::default(),
            pos_address: PosAddress::default(),
            include_shipping_phone_match: false,
            shop_offset: shop_offset(DEFAULT_UTC_OFFSET_MINUTES),
            stock_sheet_header_rows: DEFAULT_HEADER_ROWS,
        }
    }
}

/// Offset east of UTC in minutes; out-of-range values fall back to UTC.
pub fn shop_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

/// Entry point for every back-office operation.
pub struct Backoffice {
    dispatcher: ShopDispatcher,
    projections: Arc<ShopProjections>,
    config: BackofficeConfig,
}

impl std::fmt::Debug for Backoffice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoffice").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Backoffice {
    pub fn new(store: SharedStore, bus: SharedBus, config: BackofficeConfig) -> Self {
        let projections = Arc::new(ShopProjections::new());
        let dispatcher = CommandDispatcher::new(store, bus).with_observer(projections.clone());
        Self {
            dispatcher,
            projections,
            config,
        }
    }

    pub fn dispatcher(&self) -> &ShopDispatcher {
        &self.dispatcher
    }

    pub fn projections(&self) -> &ShopProjections {
        &self.projections
    }

    pub fn config(&self) -> &BackofficeConfig {
        &self.config
    }

    pub fn bus(&self) -> &SharedBus {
        self.dispatcher.bus()
    }

    /// Rebuilds every read model from the full log. Call once at startup.
    pub fn rebuild(&self) -> Result<usize, ProjectionError> {
        self.projections.rebuild(self.dispatcher.store().as_ref())
    }

    pub(crate) fn load_product(&self, id: ProductId) -> Result<Product, DispatchError> {
        let product: Product = self.dispatcher.load(id.0, |a| Product::empty(ProductId::new(a)))?;
        if !product.is_created() {
            return Err(DispatchError::not_found(format!("Product {id} not found.")));
        }
        Ok(product)
    }

    pub(crate) fn load_order(&self, id: OrderId) -> Result<Order, DispatchError> {
        let order: Order = self.dispatcher.load(id.0, |a| Order::empty(OrderId::new(a)))?;
        if !order.is_created() {
            return Err(DispatchError::not_found("Order not found"));
        }
        Ok(order)
    }

    pub(crate) fn load_invoice(&self, id: InvoiceId) -> Result<Invoice, DispatchError> {
        let invoice: Invoice = self.dispatcher.load(id.0, |a| Invoice::empty(InvoiceId::new(a)))?;
        if !invoice.is_created() {
            return Err(DispatchError::not_found("Invoice not found"));
        }
        Ok(invoice)
    }

    pub(crate) fn load_account(&self, user_id: UserId) -> Result<Account, DispatchError> {
        let account: Account = self.dispatcher.load(account_stream(user_id), |_| Account::empty(user_id))?;
        if !account.is_created() {
            return Err(DispatchError::not_found("Account not found"));
        }
        Ok(account)
    }

    pub(crate) fn product_view(&self, id: ProductId) -> Result<ProductView, DispatchError> {
        self.projections
            .catalog
            .product(&id)
            .ok_or_else(|| DispatchError::not_found(format!("Product {id} not found.")))
    }

    pub(crate) fn order_view(&self, id: OrderId) -> Result<OrderView, DispatchError> {
        self.projections
            .orders
            .get(&id)
            .ok_or_else(|| DispatchError::not_found("Order not found"))
    }

    pub(crate) fn invoice_view(&self, id: InvoiceId) -> Result<InvoiceView, DispatchError> {
        self.projections
            .invoices
            .get(&id)
            .ok_or_else(|| DispatchError::not_found("Invoice not found"))
    }
}

/// Accounts live on the stream whose id is the user id.
pub fn account_stream(user_id: UserId) -> AggregateId {
    AggregateId::from_uuid(*user_id.as_uuid())
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;

    use shopdesk_auth::{Principal, Role};
    use shopdesk_catalog::category::AGGREGATE_TYPE as CATEGORY;
    use shopdesk_catalog::{CategoryCommand, CategoryId, CreateCategory, Category};
    use shopdesk_core::Money;
    use shopdesk_orders::ShippingAddress;

    use super::*;
    use crate::event_store::InMemoryEventStore;

    pub fn backoffice() -> Backoffice {
        backoffice_with(BackofficeConfig::default())
    }

    pub fn backoffice_with(config: BackofficeConfig) -> Backoffice {
        Backoffice::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()), config)
    }

    pub fn customer() -> Principal {
        Principal::from_roles(UserId::new(), vec![Role::CUSTOMER])
    }

    pub fn cashier() -> Principal {
        Principal::from_roles(UserId::new(), vec![Role::CASHIER])
    }

    pub fn admin() -> Principal {
        Principal::from_roles(UserId::new(), vec![Role::ADMIN])
    }

    pub fn category(bo: &Backoffice, name: &str) -> CategoryId {
        let id = CategoryId::new(AggregateId::new());
        bo.dispatcher()
            .dispatch(
                id.0,
                CATEGORY,
                CategoryCommand::Create(CreateCategory {
                    category_id: id,
                    name: name.to_string(),
                    occurred_at: Utc::now(),
                }),
                |a| Category::empty(CategoryId::new(a)),
            )
            .unwrap();
        id
    }

    pub fn product(bo: &Backoffice, name: &str, rupees: u64, stock: u32) -> ProductId {
        bo.create_product(NewProduct {
            name: name.to_string(),
            category_id: None,
            price: Money::from_rupees(rupees),
            stock,
            image_url: None,
        })
        .unwrap()
        .id
    }

    pub fn stock_of(bo: &Backoffice, id: ProductId) -> u32 {
        bo.projections().catalog.product(&id).unwrap().stock
    }

    pub fn address() -> ShippingAddress {
        ShippingAddress {
            name: "Asha".into(),
            phone: "9876543210".into(),
            line1: "12 Market Rd".into(),
            line2: String::new(),
            city: "Agra".into(),
            state: "UP".into(),
            pincode: "282005".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pos_address_keeps_defaults_for_blank_parts() {
        let parsed = PosAddress::parse("Shop 4| |Pune|411001").unwrap();
        assert_eq!(parsed.line1, "Shop 4");
        assert_eq!(parsed.city, "Local");
        assert_eq!(parsed.state, "Pune");
        assert!(PosAddress::parse("only|three|parts").is_err());
    }

    #[test]
    fn shop_offset_defaults_to_ist() {
        assert_eq!(BackofficeConfig::default().shop_offset.local_minus_utc(), 330 * 60);
        assert_eq!(shop_offset(100_000).local_minus_utc(), 0);
    }

    #[test]
    fn rebuild_restores_read_models_from_the_log() {
        let bo = testing::backoffice();
        let id = testing::product(&bo, "Rice 1kg", 60, 4);

        bo.projections().clear();
        assert!(bo.projections().catalog.product(&id).is_none());

        assert_eq!(bo.rebuild().unwrap(), 1);
        assert_eq!(testing::stock_of(&bo, id), 4);
    }
}
