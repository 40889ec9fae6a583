use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopdesk_catalog::ProductId;
use shopdesk_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, UserId};
use shopdesk_events::Event;

use crate::ShippingAddress;

pub const AGGREGATE_TYPE: &str = "orders.order";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSource {
    Online,
    Pos,
}

impl OrderSource {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSource::Online => "ONLINE",
            OrderSource::Pos => "POS",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(OrderSource::Online),
            "POS" => Ok(OrderSource::Pos),
            _ => Err(DomainError::validation("Invalid source. Use one of [ONLINE, POS]")),
        }
    }
}

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Human label ("Shipped").
    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Paid => "Paid",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| {
                DomainError::validation(
                    "Invalid status. Use one of [PENDING, PAID, SHIPPED, COMPLETED, CANCELLED]",
                )
            })
    }

    /// Paid, shipped and completed orders count as sales.
    pub fn is_sale(self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Shipped | OrderStatus::Completed)
    }

    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Paid | Shipped | Completed | Cancelled)
                | (Paid, Shipped | Completed)
                | (Shipped, Completed)
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderPaymentMethod {
    #[default]
    Cod,
    Online,
}

impl OrderPaymentMethod {
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COD" => Ok(OrderPaymentMethod::Cod),
            "ONLINE" => Ok(OrderPaymentMethod::Online),
            _ => Err(DomainError::validation("Invalid payment_method. Use one of [COD, ONLINE]")),
        }
    }
}

/// A line as requested, before merging and totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// Folds repeated products into one line (first name and price win).
pub fn merge_items(items: &[NewOrderItem]) -> Result<Vec<NewOrderItem>, DomainError> {
    let mut merged: Vec<NewOrderItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity < 1 {
            return Err(DomainError::validation("Quantity must be >= 1."));
        }
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(item.quantity)
                    .ok_or_else(|| DomainError::validation("Quantity is too large."))?;
            }
            None => merged.push(item.clone()),
        }
    }
    Ok(merged)
}

fn line_total(unit_price: Money, quantity: u32) -> Result<Money, DomainError> {
    unit_price
        .checked_mul(quantity)
        .ok_or_else(|| DomainError::validation("Order total is too large."))
}

fn total_of(items: &[OrderItem]) -> Result<Money, DomainError> {
    items.iter().try_fold(Money::ZERO, |acc, i| {
        acc.checked_add(i.line_total)
            .ok_or_else(|| DomainError::validation("Order total is too large."))
    })
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    source: OrderSource,
    status: OrderStatus,
    customer_id: Option<UserId>,
    placed_by: Option<UserId>,
    payment_method: OrderPaymentMethod,
    shipping: ShippingAddress,
    items: Vec<OrderItem>,
    total: Money,
    invoice_id: Option<AggregateId>,
    payment_reference: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            source: OrderSource::Online,
            status: OrderStatus::Pending,
            customer_id: None,
            placed_by: None,
            payment_method: OrderPaymentMethod::Cod,
            shipping: ShippingAddress::default(),
            items: Vec::new(),
            total: Money::ZERO,
            invoice_id: None,
            payment_reference: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn source(&self) -> OrderSource {
        self.source
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn customer_id(&self) -> Option<UserId> {
        self.customer_id
    }

    pub fn placed_by(&self) -> Option<UserId> {
        self.placed_by
    }

    pub fn payment_method(&self) -> OrderPaymentMethod {
        self.payment_method
    }

    pub fn shipping(&self) -> &ShippingAddress {
        &self.shipping
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn item(&self, product_id: ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn invoice_id(&self) -> Option<AggregateId> {
        self.invoice_id
    }

    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Lines can change only while the order is pending and not yet invoiced.
    pub fn is_editable(&self) -> bool {
        self.status == OrderStatus::Pending && self.invoice_id.is_none()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub source: OrderSource,
    pub customer_id: Option<UserId>,
    pub placed_by: UserId,
    pub payment_method: OrderPaymentMethod,
    pub shipping: ShippingAddress,
    pub items: Vec<NewOrderItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub item: NewOrderItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItemQuantity {
    pub product_id: ProductId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInvoice {
    pub invoice_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPaymentReference {
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    Place(PlaceOrder),
    ChangeStatus(ChangeStatus),
    AddItem(AddItem),
    ChangeItemQuantity(ChangeItemQuantity),
    RemoveItem(RemoveItem),
    LinkInvoice(LinkInvoice),
    RecordPaymentReference(RecordPaymentReference),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub source: OrderSource,
    pub customer_id: Option<UserId>,
    pub placed_by: UserId,
    pub payment_method: OrderPaymentMethod,
    pub shipping: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub total: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub order_id: OrderId,
    pub item: OrderItem,
    pub total: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantityChanged {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub previous: u32,
    pub quantity: u32,
    pub line_total: Money,
    pub total: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLinked {
    pub order_id: OrderId,
    pub invoice_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReferenceRecorded {
    pub order_id: OrderId,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    Placed(OrderPlaced),
    StatusChanged(StatusChanged),
    ItemAdded(ItemAdded),
    ItemQuantityChanged(ItemQuantityChanged),
    ItemRemoved(ItemRemoved),
    InvoiceLinked(InvoiceLinked),
    PaymentReferenceRecorded(PaymentReferenceRecorded),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "orders.order.placed",
            OrderEvent::StatusChanged(_) => "orders.order.status_changed",
            OrderEvent::ItemAdded(_) => "orders.order.item_added",
            OrderEvent::ItemQuantityChanged(_) => "orders.order.item_quantity_changed",
            OrderEvent::ItemRemoved(_) => "orders.order.item_removed",
            OrderEvent::InvoiceLinked(_) => "orders.order.invoice_linked",
            OrderEvent::PaymentReferenceRecorded(_) => "orders.order.payment_reference_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Placed(e) => e.occurred_at,
            OrderEvent::StatusChanged(e) => e.occurred_at,
            OrderEvent::ItemAdded(e) => e.occurred_at,
            OrderEvent::ItemQuantityChanged(e) => e.occurred_at,
            OrderEvent::ItemRemoved(e) => e.occurred_at,
            OrderEvent::InvoiceLinked(e) => e.occurred_at,
            OrderEvent::PaymentReferenceRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Placed(e) => {
                self.id = e.order_id;
                self.source = e.source;
                self.status = OrderStatus::Pending;
                self.customer_id = e.customer_id;
                self.placed_by = Some(e.placed_by);
                self.payment_method = e.payment_method;
                self.shipping = e.shipping.clone();
                self.items = e.items.clone();
                self.total = e.total;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::StatusChanged(e) => self.status = e.to,
            OrderEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
                self.total = e.total;
            }
            OrderEvent::ItemQuantityChanged(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.product_id == e.product_id) {
                    item.quantity = e.quantity;
                    item.line_total = e.line_total;
                }
                self.total = e.total;
            }
            OrderEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.product_id != e.product_id);
                self.total = e.total;
            }
            OrderEvent::InvoiceLinked(e) => self.invoice_id = Some(e.invoice_id),
            OrderEvent::PaymentReferenceRecorded(e) => {
                self.payment_reference = Some(e.reference.clone())
            }
        }

        self.updated_at = Some(Event::occurred_at(event));
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Place(cmd) => self.handle_place(cmd),
            OrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
            OrderCommand::AddItem(cmd) => self.handle_add_item(cmd),
            OrderCommand::ChangeItemQuantity(cmd) => self.handle_change_quantity(cmd),
            OrderCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            OrderCommand::LinkInvoice(cmd) => self.handle_link_invoice(cmd),
            OrderCommand::RecordPaymentReference(cmd) => self.handle_payment_reference(cmd),
        }
    }
}

impl Order {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("Order not found"));
        }
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        self.ensure_exists()?;
        if self.status != OrderStatus::Pending {
            return Err(DomainError::invariant("Only pending orders can be edited."));
        }
        if self.invoice_id.is_some() {
            return Err(DomainError::invariant("Invoiced orders cannot be edited."));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("Order must contain at least one item."));
        }
        let shipping = cmd.shipping.trimmed();
        if cmd.source == OrderSource::Online {
            shipping.validate()?;
        }

        let items = merge_items(&cmd.items)?
            .into_iter()
            .map(|i| {
                Ok(OrderItem {
                    line_total: line_total(i.unit_price, i.quantity)?,
                    product_id: i.product_id,
                    name: i.name,
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                })
            })
            .collect::<Result<Vec<_>, DomainError>>()?;
        let total = total_of(&items)?;

        Ok(vec![OrderEvent::Placed(OrderPlaced {
            order_id: cmd.order_id,
            source: cmd.source,
            customer_id: cmd.customer_id,
            placed_by: cmd.placed_by,
            payment_method: cmd.payment_method,
            shipping,
            items,
            total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists()?;

        if cmd.to == OrderStatus::Cancelled && self.status != OrderStatus::Pending {
            return Err(DomainError::validation("Only pending orders can be cancelled."));
        }
        if cmd.to == self.status {
            return Err(DomainError::validation(format!("Order is already {}.", self.status)));
        }
        if !self.status.can_transition_to(cmd.to) {
            return Err(DomainError::validation(format!(
                "Cannot change status from {} to {}.",
                self.status, cmd.to
            )));
        }

        Ok(vec![OrderEvent::StatusChanged(StatusChanged {
            order_id: self.id,
            from: self.status,
            to: cmd.to,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_editable()?;
        if cmd.item.quantity < 1 {
            return Err(DomainError::validation("Quantity must be >= 1."));
        }

        if let Some(existing) = self.item(cmd.item.product_id) {
            let quantity = existing
                .quantity
                .checked_add(cmd.item.quantity)
                .ok_or_else(|| DomainError::validation("Quantity is too large."))?;
            return self.quantity_changed(existing, quantity, cmd.occurred_at);
        }

        let item = OrderItem {
            product_id: cmd.item.product_id,
            name: cmd.item.name.clone(),
            quantity: cmd.item.quantity,
            unit_price: cmd.item.unit_price,
            line_total: line_total(cmd.item.unit_price, cmd.item.quantity)?,
        };
        let total = self
            .total
            .checked_add(item.line_total)
            .ok_or_else(|| DomainError::validation("Order total is too large."))?;

        Ok(vec![OrderEvent::ItemAdded(ItemAdded {
            order_id: self.id,
            item,
            total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_quantity(&self, cmd: &ChangeItemQuantity) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_editable()?;
        if cmd.quantity < 1 {
            return Err(DomainError::validation("Quantity must be >= 1."));
        }
        let existing = self
            .item(cmd.product_id)
            .ok_or_else(|| DomainError::not_found(format!("Product {} is not in this order.", cmd.product_id)))?;
        if existing.quantity == cmd.quantity {
            return Ok(vec![]);
        }
        self.quantity_changed(existing, cmd.quantity, cmd.occurred_at)
    }

    fn quantity_changed(
        &self,
        existing: &OrderItem,
        quantity: u32,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        let new_line = line_total(existing.unit_price, quantity)?;
        let total = self
            .total
            .saturating_sub(existing.line_total)
            .checked_add(new_line)
            .ok_or_else(|| DomainError::validation("Order total is too large."))?;

        Ok(vec![OrderEvent::ItemQuantityChanged(ItemQuantityChanged {
            order_id: self.id,
            product_id: existing.product_id,
            previous: existing.quantity,
            quantity,
            line_total: new_line,
            total,
            occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_editable()?;
        let existing = self
            .item(cmd.product_id)
            .ok_or_else(|| DomainError::not_found(format!("Product {} is not in this order.", cmd.product_id)))?;
        if self.items.len() == 1 {
            return Err(DomainError::validation(
                "Order must contain at least one item. Cancel the order instead.",
            ));
        }

        Ok(vec![OrderEvent::ItemRemoved(ItemRemoved {
            order_id: self.id,
            product_id: existing.product_id,
            quantity: existing.quantity,
            total: self.total.saturating_sub(existing.line_total),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_link_invoice(&self, cmd: &LinkInvoice) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists()?;
        match self.invoice_id {
            Some(existing) if existing == cmd.invoice_id => Ok(vec![]),
            Some(_) => Err(DomainError::conflict("order is already linked to another invoice")),
            None => Ok(vec![OrderEvent::InvoiceLinked(InvoiceLinked {
                order_id: self.id,
                invoice_id: cmd.invoice_id,
                occurred_at: cmd.occurred_at,
            })]),
        }
    }

    fn handle_payment_reference(
        &self,
        cmd: &RecordPaymentReference,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists()?;
        let reference = cmd.reference.trim();
        if reference.is_empty() {
            return Err(DomainError::validation("Payment reference cannot be empty."));
        }
        if self.payment_reference.as_deref() == Some(reference) {
            return Ok(vec![]);
        }
        Ok(vec![OrderEvent::PaymentReferenceRecorded(PaymentReferenceRecorded {
            order_id: self.id,
            reference: reference.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopdesk_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn shipping() -> ShippingAddress {
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

    fn new_item(product_id: ProductId, quantity: u32, price_paise: u64) -> NewOrderItem {
        NewOrderItem {
            product_id,
            name: "Parle-G".into(),
            quantity,
            unit_price: Money::from_paise(price_paise),
        }
    }

    fn placed(items: Vec<NewOrderItem>) -> Order {
        let id = OrderId::new(AggregateId::new());
        let mut order = Order::empty(id);
        execute(
            &mut order,
            &OrderCommand::Place(PlaceOrder {
                order_id: id,
                source: OrderSource::Online,
                customer_id: Some(UserId::new()),
                placed_by: UserId::new(),
                payment_method: OrderPaymentMethod::Cod,
                shipping: shipping(),
                items,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        order
    }

    fn change_status(to: OrderStatus) -> OrderCommand {
        OrderCommand::ChangeStatus(ChangeStatus { to, occurred_at: test_time() })
    }

    #[test]
    fn place_merges_repeated_products_and_totals() {
        let p = test_product_id();
        let q = test_product_id();
        let order = placed(vec![new_item(p, 2, 1_000), new_item(q, 1, 550), new_item(p, 1, 1_000)]);

        assert_eq!(order.items().len(), 2);
        assert_eq!(order.item(p).unwrap().quantity, 3);
        assert_eq!(order.item(p).unwrap().line_total, Money::from_paise(3_000));
        assert_eq!(order.total(), Money::from_paise(3_550));
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn empty_order_is_rejected() {
        let id = OrderId::new(AggregateId::new());
        let err = Order::empty(id)
            .handle(&OrderCommand::Place(PlaceOrder {
                order_id: id,
                source: OrderSource::Online,
                customer_id: None,
                placed_by: UserId::new(),
                payment_method: OrderPaymentMethod::Cod,
                shipping: shipping(),
                items: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::validation("Order must contain at least one item."));
    }

    #[test]
    fn status_transitions_follow_the_lifecycle() {
        let mut order = placed(vec![new_item(test_product_id(), 1, 100)]);
        execute(&mut order, &change_status(OrderStatus::Paid)).unwrap();
        execute(&mut order, &change_status(OrderStatus::Shipped)).unwrap();

        let err = order.handle(&change_status(OrderStatus::Paid)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = order.handle(&change_status(OrderStatus::Cancelled)).unwrap_err();
        assert_eq!(err, DomainError::validation("Only pending orders can be cancelled."));

        execute(&mut order, &change_status(OrderStatus::Completed)).unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
        assert_eq!(order.version(), 4);
    }

    #[test]
    fn same_status_is_rejected() {
        let order = placed(vec![new_item(test_product_id(), 1, 100)]);
        let err = order.handle(&change_status(OrderStatus::Pending)).unwrap_err();
        assert_eq!(err, DomainError::validation("Order is already PENDING."));
    }

    #[test]
    fn line_edits_recompute_total() {
        let p = test_product_id();
        let q = test_product_id();
        let mut order = placed(vec![new_item(p, 2, 1_000)]);

        execute(
            &mut order,
            &OrderCommand::AddItem(AddItem { item: new_item(q, 1, 250), occurred_at: test_time() }),
        )
        .unwrap();
        assert_eq!(order.total(), Money::from_paise(2_250));

        execute(
            &mut order,
            &OrderCommand::ChangeItemQuantity(ChangeItemQuantity {
                product_id: p,
                quantity: 5,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.total(), Money::from_paise(5_250));

        execute(
            &mut order,
            &OrderCommand::RemoveItem(RemoveItem { product_id: q, occurred_at: test_time() }),
        )
        .unwrap();
        assert_eq!(order.total(), Money::from_paise(5_000));
        assert_eq!(order.items().len(), 1);
    }

    #[test]
    fn last_item_cannot_be_removed() {
        let p = test_product_id();
        let order = placed(vec![new_item(p, 2, 1_000)]);
        let err = order
            .handle(&OrderCommand::RemoveItem(RemoveItem { product_id: p, occurred_at: test_time() }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn invoiced_orders_are_frozen() {
        let p = test_product_id();
        let mut order = placed(vec![new_item(p, 2, 1_000)]);
        execute(
            &mut order,
            &OrderCommand::LinkInvoice(LinkInvoice {
                invoice_id: AggregateId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = order
            .handle(&OrderCommand::ChangeItemQuantity(ChangeItemQuantity {
                product_id: p,
                quantity: 1,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::invariant("Invoiced orders cannot be edited."));
    }

    #[test]
    fn status_parse_lists_allowed_values() {
        assert_eq!(OrderStatus::parse("shipped").unwrap(), OrderStatus::Shipped);
        let err = OrderStatus::parse("lost").unwrap_err();
        assert!(err.message().starts_with("Invalid status. Use one of ["));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn total_is_sum_of_line_totals(lines in proptest::collection::vec((1u32..20, 0u64..100_000), 1..8)) {
                let items: Vec<NewOrderItem> = lines
                    .iter()
                    .map(|(qty, price)| new_item(test_product_id(), *qty, *price))
                    .collect();
                let order = placed(items);
                let sum: u64 = order.items().iter().map(|i| i.line_total.paise()).sum();
                prop_assert_eq!(order.total().paise(), sum);
                for item in order.items() {
                    prop_assert_eq!(item.line_total.paise(), item.unit_price.paise() * u64::from(item.quantity));
                }
            }
        }
    }
}
