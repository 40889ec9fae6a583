use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use shopdesk_auth::Principal;
use shopdesk_billing::invoice::AGGREGATE_TYPE as INVOICE;
use shopdesk_billing::{Invoice, InvoiceCommand, InvoiceId, InvoiceStatus, PaymentId, VoidInvoice};
use shopdesk_catalog::product::AGGREGATE_TYPE as PRODUCT;
use shopdesk_catalog::{ProductCommand, ProductId, ReleaseStock, ReserveStock};
use shopdesk_core::AggregateId;
use shopdesk_orders::order::AGGREGATE_TYPE as ORDER;
use shopdesk_orders::{
    AddItem, ChangeItemQuantity, ChangeStatus, LinkInvoice, NewOrderItem, Order, OrderCommand,
    OrderId, OrderPaymentMethod, OrderSource, OrderStatus, PlaceOrder, RecordPaymentReference,
    RemoveItem, ShippingAddress,
};

use super::{Backoffice, SharedBus, SharedStore};
use crate::command_dispatcher::{DispatchError, UnitOfWork, retry_on_conflict};
use crate::projections::{OrderFilter, OrderView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLineRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOnlineOrder {
    pub items: Vec<OrderLineRequest>,
    pub payment_method: OrderPaymentMethod,
    pub shipping: ShippingAddress,
    /// Gateway reference for prepaid orders.
    pub payment_reference: Option<String>,
}

/// One admin edit to the lines of a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEdit {
    Add { product_id: ProductId, quantity: u32 },
    SetQuantity { product_id: ProductId, quantity: u32 },
    Remove { product_id: ProductId },
}

impl LineEdit {
    fn product_id(&self) -> ProductId {
        match *self {
            LineEdit::Add { product_id, .. }
            | LineEdit::SetQuantity { product_id, .. }
            | LineEdit::Remove { product_id } => product_id,
        }
    }
}

type Uow<'d> = UnitOfWork<'d, SharedStore, SharedBus>;

impl Backoffice {
    /// Places a storefront order for the caller, reserving stock for every
    /// line in the same commit as the order itself.
    pub fn place_order(&self, customer: &Principal, request: &PlaceOnlineOrder) -> Result<OrderView, DispatchError> {
        if request.items.is_empty() {
            return Err(DispatchError::validation("At least one item is required."));
        }
        let lines = merge_lines(&request.items)?;

        let order_id = retry_on_conflict(|| {
            let now = Utc::now();
            let order_id = OrderId::new(AggregateId::new());
            let mut uow = self.dispatcher.begin();

            let mut items = Vec::with_capacity(lines.len());
            for line in &lines {
                let mut product = self.load_product(line.product_id)?;
                uow.execute(
                    line.product_id.0,
                    PRODUCT,
                    &mut product,
                    &reserve(order_id, line.quantity, now),
                )?;
                items.push(NewOrderItem {
                    product_id: line.product_id,
                    name: product.name().to_string(),
                    quantity: line.quantity,
                    unit_price: product.price(),
                });
            }

            let mut order = Order::empty(order_id);
            uow.execute(
                order_id.0,
                ORDER,
                &mut order,
                &OrderCommand::Place(PlaceOrder {
                    order_id,
                    source: OrderSource::Online,
                    customer_id: Some(customer.user_id),
                    placed_by: customer.user_id,
                    payment_method: request.payment_method,
                    shipping: request.shipping.clone(),
                    items,
                    occurred_at: now,
                }),
            )?;
            if let Some(reference) = request.payment_reference.as_deref().filter(|r| !r.trim().is_empty()) {
                uow.execute(
                    order_id.0,
                    ORDER,
                    &mut order,
                    &OrderCommand::RecordPaymentReference(RecordPaymentReference {
                        reference: reference.to_string(),
                        occurred_at: now,
                    }),
                )?;
            }

            uow.commit()?;
            tracing::info!(%order_id, total = %order.total(), lines = order.items().len(), "order placed");
            Ok(order_id)
        })?;

        self.order_view(order_id)
    }

    /// Applies one line edit and moves the stock difference with it.
    pub fn edit_order_line(&self, order_id: OrderId, edit: LineEdit) -> Result<OrderView, DispatchError> {
        let product_id = edit.product_id();

        retry_on_conflict(|| {
            let now = Utc::now();
            let mut order = self.load_order(order_id)?;
            let mut product = self.load_product(product_id)?;
            let before = order.item(product_id).map_or(0, |i| i.quantity);

            let command = match edit {
                LineEdit::Add { quantity, .. } => OrderCommand::AddItem(AddItem {
                    item: NewOrderItem {
                        product_id,
                        name: product.name().to_string(),
                        quantity,
                        unit_price: product.price(),
                    },
                    occurred_at: now,
                }),
                LineEdit::SetQuantity { quantity, .. } => {
                    OrderCommand::ChangeItemQuantity(ChangeItemQuantity { product_id, quantity, occurred_at: now })
                }
                LineEdit::Remove { .. } => OrderCommand::RemoveItem(RemoveItem { product_id, occurred_at: now }),
            };

            let mut uow = self.dispatcher.begin();
            uow.execute(order_id.0, ORDER, &mut order, &command)?;

            let after = order.item(product_id).map_or(0, |i| i.quantity);
            let stock_command = if after > before {
                Some(reserve(order_id, after - before, now))
            } else if after < before {
                Some(release(order_id, before - after, now))
            } else {
                None
            };
            if let Some(stock_command) = stock_command {
                uow.execute(product_id.0, PRODUCT, &mut product, &stock_command)?;
            }

            uow.commit()
        })?;

        tracing::info!(%order_id, %product_id, "order line edited");
        self.order_view(order_id)
    }

    /// Cancels a pending order, returning its stock and voiding an unpaid
    /// invoice in the same commit.
    ///
    /// Customers may only cancel their own online orders; admins may cancel
    /// any pending order.
    pub fn cancel_order(&self, actor: &Principal, order_id: OrderId) -> Result<OrderView, DispatchError> {
        retry_on_conflict(|| {
            let now = Utc::now();
            let mut order = self.load_order(order_id)?;

            if !actor.is_admin()
                && (order.customer_id() != Some(actor.user_id) || order.source() != OrderSource::Online)
            {
                return Err(DispatchError::forbidden("You can only cancel your own online orders."));
            }
            if order.status() != OrderStatus::Pending {
                return Err(DispatchError::validation("Only pending orders can be cancelled."));
            }

            let mut uow = self.dispatcher.begin();

            if let Some(invoice_id) = order.invoice_id().map(InvoiceId::new) {
                let mut invoice = self.load_invoice(invoice_id)?;
                if !invoice.paid_amount().is_zero() {
                    return Err(DispatchError::InvariantViolation(
                        "Orders with captured payments cannot be cancelled. Refund them first.".to_string(),
                    ));
                }
                if invoice.status() == InvoiceStatus::Open {
                    uow.execute(
                        invoice_id.0,
                        INVOICE,
                        &mut invoice,
                        &InvoiceCommand::Void(VoidInvoice { occurred_at: now }),
                    )?;
                }
            }

            uow.execute(
                order_id.0,
                ORDER,
                &mut order,
                &OrderCommand::ChangeStatus(ChangeStatus { to: OrderStatus::Cancelled, occurred_at: now }),
            )?;
            release_all(self, &mut uow, &order, now)?;

            uow.commit()
        })?;

        tracing::info!(%order_id, cancelled_by = %actor.user_id, "order cancelled");
        self.order_view(order_id)
    }

    /// Admin status change. Entering a billing trigger status derives the
    /// order's invoice in the same commit.
    pub fn change_order_status(&self, actor: &Principal, order_id: OrderId, status: &str) -> Result<OrderView, DispatchError> {
        let to = OrderStatus::parse(status)?;
        if to == OrderStatus::Cancelled {
            return self.cancel_order(actor, order_id);
        }

        retry_on_conflict(|| {
            let now = Utc::now();
            let mut order = self.load_order(order_id)?;
            let from = order.status();

            let mut uow = self.dispatcher.begin();
            uow.execute(
                order_id.0,
                ORDER,
                &mut order,
                &OrderCommand::ChangeStatus(ChangeStatus { to, occurred_at: now }),
            )?;

            if order.source() == OrderSource::Online && self.config.billing.triggers(from, to) {
                self.derive_invoice(&mut uow, &mut order, now)?;
            }

            uow.commit()
        })?;

        tracing::info!(%order_id, status = %to, "order status changed");
        self.order_view(order_id)
    }

    fn derive_invoice(&self, uow: &mut Uow<'_>, order: &mut Order, now: DateTime<Utc>) -> Result<(), DispatchError> {
        let existing = match order.invoice_id() {
            Some(id) => Some(self.load_invoice(InvoiceId::new(id))?),
            None => None,
        };
        let derivation = self.config.billing.derive(
            order,
            existing.as_ref(),
            InvoiceId::new(AggregateId::new()),
            PaymentId::new(AggregateId::new()),
            now,
        )?;
        let Some(derivation) = derivation else {
            return Ok(());
        };

        let invoice_id = derivation.invoice_id;
        let mut invoice = existing.unwrap_or_else(|| Invoice::empty(invoice_id));
        for command in &derivation.commands {
            uow.execute(invoice_id.0, INVOICE, &mut invoice, command)?;
        }
        if derivation.opened {
            let order_id = order.id_typed();
            uow.execute(
                order_id.0,
                ORDER,
                order,
                &OrderCommand::LinkInvoice(LinkInvoice { invoice_id: invoice_id.0, occurred_at: now }),
            )?;
        }

        tracing::info!(
            order_id = %order.id_typed(),
            %invoice_id,
            opened = derivation.opened,
            captured = %derivation.captured,
            "invoice derived"
        );
        Ok(())
    }

    /// Orders visible to a customer, newest first.
    ///
    /// A user sees orders placed for them, orders whose invoice names them
    /// and, when enabled, orders shipped to their phone number.
    pub fn orders_for_user(&self, user: &Principal, filter: &OrderFilter) -> Vec<OrderView> {
        let invoiced: Vec<OrderId> = self
            .projections
            .invoices
            .query(|i| i.customer_id == Some(user.user_id))
            .into_iter()
            .filter_map(|i| i.order_id)
            .collect();
        let phone = if self.config.include_shipping_phone_match {
            self.projections.accounts.get(&user.user_id).map(|a| a.phone)
        } else {
            None
        };

        self.projections.orders.query(filter, |o| {
            o.customer_id == Some(user.user_id)
                || invoiced.contains(&o.id)
                || phone.as_deref().is_some_and(|p| shipping_phone_matches(&o.shipping.phone, p))
        })
    }

    /// One order as the customer sees it; others' orders are not found.
    pub fn order_for_user(&self, user: &Principal, order_id: OrderId) -> Result<OrderView, DispatchError> {
        self.orders_for_user(user, &OrderFilter::default())
            .into_iter()
            .find(|o| o.id == order_id)
            .ok_or_else(|| DispatchError::not_found("Order not found"))
    }

    pub fn all_orders(&self, filter: &OrderFilter) -> Vec<OrderView> {
        self.projections.orders.query(filter, |_| true)
    }

    pub fn order(&self, order_id: OrderId) -> Result<OrderView, DispatchError> {
        self.order_view(order_id)
    }
}

/// Folds repeated products and rejects zero quantities.
fn merge_lines(lines: &[OrderLineRequest]) -> Result<Vec<OrderLineRequest>, DispatchError> {
    let mut merged: BTreeMap<ProductId, usize> = BTreeMap::new();
    let mut out: Vec<OrderLineRequest> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity < 1 {
            return Err(DispatchError::validation("Quantity must be >= 1."));
        }
        match merged.get(&line.product_id) {
            Some(&idx) => {
                out[idx].quantity = out[idx]
                    .quantity
                    .checked_add(line.quantity)
                    .ok_or_else(|| DispatchError::validation("Quantity is too large."))?;
            }
            None => {
                merged.insert(line.product_id, out.len());
                out.push(*line);
            }
        }
    }
    Ok(out)
}

fn shipping_phone_matches(shipping: &str, account_phone: &str) -> bool {
    let digits: String = shipping.chars().filter(char::is_ascii_digit).collect();
    !digits.is_empty() && (digits == account_phone || digits.ends_with(account_phone) || account_phone.ends_with(&digits))
}

pub(crate) fn reserve(order_id: OrderId, quantity: u32, now: DateTime<Utc>) -> ProductCommand {
    ProductCommand::ReserveStock(ReserveStock { order_id: order_id.0, quantity, occurred_at: now })
}

pub(crate) fn release(order_id: OrderId, quantity: u32, now: DateTime<Utc>) -> ProductCommand {
    ProductCommand::ReleaseStock(ReleaseStock { order_id: order_id.0, quantity, occurred_at: now })
}

fn release_all(bo: &Backoffice, uow: &mut Uow<'_>, order: &Order, now: DateTime<Utc>) -> Result<(), DispatchError> {
    let order_id = order.id_typed();
    for item in order.items() {
        let mut product = bo.load_product(item.product_id)?;
        uow.execute(item.product_id.0, PRODUCT, &mut product, &release(order_id, item.quantity, now))?;
    }
    Ok(())
}
