use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::Utc;

use shopdesk_auth::Principal;
use shopdesk_billing::invoice::AGGREGATE_TYPE as INVOICE;
use shopdesk_billing::{
    AddLines, CapturePayment, Invoice, InvoiceCommand, InvoiceId, InvoiceMode, InvoiceStatus, NewInvoiceLine,
    OpenInvoice, PaymentId, PaymentMethod,
};
use shopdesk_catalog::product::AGGREGATE_TYPE as PRODUCT;
use shopdesk_catalog::{Product, ProductId};
use shopdesk_core::{AggregateId, Money, UserId};
use shopdesk_orders::order::AGGREGATE_TYPE as ORDER;
use shopdesk_orders::{
    ChangeStatus, LinkInvoice, NewOrderItem, Order, OrderCommand, OrderId, OrderPaymentMethod, OrderSource,
    OrderStatus, PlaceOrder, ShippingAddress,
};

use super::orders::reserve;
use super::{Backoffice, PosAddress};
use crate::command_dispatcher::{DispatchError, retry_on_conflict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosLine {
    pub product_id: ProductId,
    /// Printed on the bill; defaults to the catalog name.
    pub name: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
}

/// A counter sale as entered by the cashier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PosSale {
    pub items: Vec<PosLine>,
    pub discount: Money,
    pub paid_amount: Money,
    /// Marks the bill as paid. With no amount the whole total is captured.
    pub paid: bool,
    pub payment_method: Option<String>,
    pub customer_name: String,
    pub customer_phone: String,
    /// Links the invoice to a known customer. Unparsable ids are ignored.
    pub customer_user_id: Option<String>,
    pub shipping_name: String,
    pub shipping_phone: String,
    pub address_line1: String,
    pub address_line2: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosReceipt {
    pub order_id: OrderId,
    pub invoice_id: InvoiceId,
    pub order_status: OrderStatus,
    pub invoice_status: InvoiceStatus,
    pub total: Money,
    pub paid_amount: Money,
    pub change_due: Money,
    pub mode: InvoiceMode,
    pub customer_id: Option<UserId>,
    pub cashier_id: UserId,
}

impl PosSale {
    fn shipping(&self, defaults: &PosAddress) -> ShippingAddress {
        let or = |value: &str, fallback: &str| {
            let value = value.trim();
            if value.is_empty() { fallback.to_string() } else { value.to_string() }
        };
        let first_of = |a: &str, b: &str, fallback: &str| or(if a.trim().is_empty() { b } else { a }, fallback);

        ShippingAddress {
            name: first_of(&self.shipping_name, &self.customer_name, "POS Customer"),
            phone: first_of(&self.shipping_phone, &self.customer_phone, "NA"),
            line1: or(&self.address_line1, &defaults.line1),
            line2: self.address_line2.trim().to_string(),
            city: or(&self.city, &defaults.city),
            state: or(&self.state, &defaults.state),
            pincode: or(&self.pincode, &defaults.pincode),
        }
    }

    fn customer(&self) -> Option<UserId> {
        self.customer_user_id
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| UserId::from_str(raw).ok())
    }
}

/// Folds repeated products into one line so the order and the invoice are
/// built from identical lines. A product rung up at two prices is rejected.
fn merge_pos_lines(items: &[PosLine]) -> Result<Vec<PosLine>, DispatchError> {
    let mut merged: Vec<PosLine> = Vec::with_capacity(items.len());
    for line in items {
        let Some(existing) = merged.iter_mut().find(|l| l.product_id == line.product_id) else {
            merged.push(line.clone());
            continue;
        };
        if existing.unit_price != line.unit_price {
            return Err(DispatchError::validation(format!(
                "Product {} is listed with different prices.",
                line.product_id
            )));
        }
        existing.quantity = existing
            .quantity
            .checked_add(line.quantity)
            .ok_or_else(|| DispatchError::validation("Quantity is too large."))?;
        if existing.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            existing.name = line.name.clone();
        }
    }
    Ok(merged)
}

/// Card, UPI and online payments mark the order as prepaid; the rest is COD.
fn order_method(method: PaymentMethod) -> OrderPaymentMethod {
    if method.is_prepaid() { OrderPaymentMethod::Online } else { OrderPaymentMethod::Cod }
}

impl Backoffice {
    /// Rings up a counter sale: POS order, stock reservations, manual invoice
    /// and the captured payment, committed as one batch.
    pub fn pos_checkout(&self, cashier: &Principal, sale: &PosSale) -> Result<PosReceipt, DispatchError> {
        if sale.items.is_empty() {
            return Err(DispatchError::validation("At least one item is required."));
        }
        if sale.items.iter().any(|l| l.quantity < 1) {
            return Err(DispatchError::validation("Quantity must be >= 1."));
        }
        let method = match sale.payment_method.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(raw) => PaymentMethod::parse(raw)?,
            None => PaymentMethod::Cash,
        };
        let lines = merge_pos_lines(&sale.items)?;
        let customer_id = sale.customer();
        let shipping = sale.shipping(&self.config.pos_address);

        let receipt = retry_on_conflict(|| {
            let now = Utc::now();
            let order_id = OrderId::new(AggregateId::new());
            let invoice_id = InvoiceId::new(AggregateId::new());
            let mut uow = self.dispatcher.begin();

            let mut products: BTreeMap<ProductId, Product> = BTreeMap::new();
            let mut order_items = Vec::with_capacity(lines.len());
            let mut invoice_lines = Vec::with_capacity(lines.len());
            for line in &lines {
                if !products.contains_key(&line.product_id) {
                    products.insert(line.product_id, self.load_product(line.product_id)?);
                }
                let Some(product) = products.get_mut(&line.product_id) else {
                    continue;
                };
                uow.execute(line.product_id.0, PRODUCT, product, &reserve(order_id, line.quantity, now))?;

                order_items.push(NewOrderItem {
                    product_id: line.product_id,
                    name: product.name().to_string(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                });
                let printed = line.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
                invoice_lines.push(NewInvoiceLine {
                    product_id: Some(line.product_id),
                    name: printed.unwrap_or(product.name()).to_string(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                });
            }

            let mut order = Order::empty(order_id);
            uow.execute(
                order_id.0,
                ORDER,
                &mut order,
                &OrderCommand::Place(PlaceOrder {
                    order_id,
                    source: OrderSource::Pos,
                    customer_id: None,
                    placed_by: cashier.user_id,
                    payment_method: order_method(method),
                    shipping: shipping.clone(),
                    items: order_items,
                    occurred_at: now,
                }),
            )?;

            let mut invoice = Invoice::empty(invoice_id);
            let customer_name = if sale.customer_name.trim().is_empty() { &shipping.name } else { &sale.customer_name };
            let customer_phone = if sale.customer_phone.trim().is_empty() { &shipping.phone } else { &sale.customer_phone };
            uow.execute(
                invoice_id.0,
                INVOICE,
                &mut invoice,
                &InvoiceCommand::Open(OpenInvoice {
                    invoice_id,
                    mode: InvoiceMode::Manual,
                    order_id: Some(order_id),
                    customer_id,
                    customer_name: customer_name.clone(),
                    customer_phone: customer_phone.clone(),
                    cashier_id: Some(cashier.user_id),
                    discount: sale.discount,
                    occurred_at: now,
                }),
            )?;
            uow.execute(
                invoice_id.0,
                INVOICE,
                &mut invoice,
                &InvoiceCommand::AddLines(AddLines { lines: invoice_lines, occurred_at: now }),
            )?;

            let tendered = if sale.paid && sale.paid_amount.is_zero() { invoice.total() } else { sale.paid_amount };
            let captured = tendered.min(invoice.balance_due());
            if !captured.is_zero() {
                uow.execute(
                    invoice_id.0,
                    INVOICE,
                    &mut invoice,
                    &InvoiceCommand::CapturePayment(CapturePayment {
                        payment_id: PaymentId::new(AggregateId::new()),
                        method,
                        amount: captured,
                        txn_id: None,
                        received_by: Some(cashier.user_id),
                        occurred_at: now,
                    }),
                )?;
            }

            if sale.paid || sale.paid_amount >= invoice.total() {
                uow.execute(
                    order_id.0,
                    ORDER,
                    &mut order,
                    &OrderCommand::ChangeStatus(ChangeStatus { to: OrderStatus::Paid, occurred_at: now }),
                )?;
            }
            uow.execute(
                order_id.0,
                ORDER,
                &mut order,
                &OrderCommand::LinkInvoice(LinkInvoice { invoice_id: invoice_id.0, occurred_at: now }),
            )?;

            uow.commit()?;
            Ok(PosReceipt {
                order_id,
                invoice_id,
                order_status: order.status(),
                invoice_status: invoice.status(),
                total: invoice.total(),
                paid_amount: invoice.paid_amount(),
                change_due: tendered.saturating_sub(captured),
                mode: InvoiceMode::Manual,
                customer_id,
                cashier_id: cashier.user_id,
            })
        })?;

        tracing::info!(
            order_id = %receipt.order_id,
            invoice_id = %receipt.invoice_id,
            cashier_id = %receipt.cashier_id,
            total = %receipt.total,
            paid = %receipt.paid_amount,
            "pos sale recorded"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoffice::testing::{backoffice, cashier, product, stock_of};

    fn line(product_id: ProductId, quantity: u32, rupees: u64) -> PosLine {
        PosLine { product_id, name: None, quantity, unit_price: Money::from_rupees(rupees) }
    }

    #[test]
    fn cash_sale_with_change() {
        let bo = backoffice();
        let soap = product(&bo, "Soap", 40, 10);
        let till = cashier();

        let receipt = bo
            .pos_checkout(
                &till,
                &PosSale {
                    items: vec![line(soap, 3, 35)],
                    discount: Money::from_rupees(5),
                    paid_amount: Money::from_rupees(200),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(receipt.total, Money::from_rupees(100));
        assert_eq!(receipt.paid_amount, Money::from_rupees(100));
        assert_eq!(receipt.change_due, Money::from_rupees(100));
        assert_eq!(receipt.order_status, OrderStatus::Paid);
        assert_eq!(receipt.invoice_status, InvoiceStatus::Paid);
        assert_eq!(stock_of(&bo, soap), 7);

        let order = bo.order(receipt.order_id).unwrap();
        assert!(order.is_pos());
        assert_eq!(order.placed_by, till.user_id);
        assert_eq!(order.shipping.name, "POS Customer");
        assert_eq!(order.shipping.phone, "NA");
        assert_eq!(order.shipping.line1, "POS COUNTER");
        assert_eq!(order.payment_method, OrderPaymentMethod::Cod);
        assert_eq!(order.invoice_id, Some(receipt.invoice_id.0));

        let invoice = bo.projections().invoices.get(&receipt.invoice_id).unwrap();
        assert_eq!(invoice.cashier_id, Some(till.user_id));
        assert_eq!(invoice.lines[0].name, "Soap");
        assert_eq!(invoice.payments[0].method, PaymentMethod::Cash);
    }

    #[test]
    fn paid_flag_without_amount_settles_the_total() {
        let bo = backoffice();
        let soap = product(&bo, "Soap", 40, 10);

        let receipt = bo
            .pos_checkout(
                &cashier(),
                &PosSale {
                    items: vec![PosLine { name: Some("Neem soap".into()), ..line(soap, 2, 40) }],
                    paid: true,
                    payment_method: Some("UPI".into()),
                    customer_name: "Ravi".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(receipt.paid_amount, Money::from_rupees(80));
        assert!(receipt.change_due.is_zero());
        let order = bo.order(receipt.order_id).unwrap();
        assert_eq!(order.payment_method, OrderPaymentMethod::Online);
        assert_eq!(order.shipping.name, "Ravi");
        let invoice = bo.projections().invoices.get(&receipt.invoice_id).unwrap();
        assert_eq!(invoice.lines[0].name, "Neem soap");
    }

    #[test]
    fn partial_payment_leaves_order_pending() {
        let bo = backoffice();
        let soap = product(&bo, "Soap", 40, 10);

        let receipt = bo
            .pos_checkout(
                &cashier(),
                &PosSale { items: vec![line(soap, 2, 40)], paid_amount: Money::from_rupees(50), ..Default::default() },
            )
            .unwrap();

        assert_eq!(receipt.order_status, OrderStatus::Pending);
        assert_eq!(receipt.invoice_status, InvoiceStatus::Open);
        assert_eq!(bo.projections().invoices.get(&receipt.invoice_id).unwrap().balance_due(), Money::from_rupees(30));
    }

    #[test]
    fn failed_sale_keeps_stock() {
        let bo = backoffice();
        let soap = product(&bo, "Soap", 40, 2);
        let comb = product(&bo, "Comb", 20, 1);

        let err = bo
            .pos_checkout(&cashier(), &PosSale { items: vec![line(soap, 2, 40), line(comb, 2, 20)], ..Default::default() })
            .unwrap_err();

        assert!(matches!(err, DispatchError::Validation(msg) if msg == "Insufficient stock for Comb."));
        assert_eq!(stock_of(&bo, soap), 2);
        assert!(bo.projections().invoices.query(|_| true).is_empty());
    }

    #[test]
    fn customer_link_and_method_validation() {
        let bo = backoffice();
        let soap = product(&bo, "Soap", 40, 10);
        let buyer = UserId::new();

        let receipt = bo
            .pos_checkout(
                &cashier(),
                &PosSale {
                    items: vec![line(soap, 1, 40)],
                    customer_user_id: Some(buyer.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(receipt.customer_id, Some(buyer));

        let receipt = bo
            .pos_checkout(
                &cashier(),
                &PosSale { items: vec![line(soap, 1, 40)], customer_user_id: Some("42".into()), ..Default::default() },
            )
            .unwrap();
        assert_eq!(receipt.customer_id, None);

        let err = bo
            .pos_checkout(
                &cashier(),
                &PosSale { items: vec![line(soap, 1, 40)], payment_method: Some("cheque".into()), ..Default::default() },
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(msg) if msg.starts_with("Unsupported method")));
    }

    #[test]
    fn repeated_products_reserve_against_one_stream() {
        let bo = backoffice();
        let soap = product(&bo, "Soap", 40, 5);

        bo.pos_checkout(&cashier(), &PosSale { items: vec![line(soap, 2, 40), line(soap, 1, 40)], ..Default::default() })
            .unwrap();
        assert_eq!(stock_of(&bo, soap), 2);
    }

    #[test]
    fn repeated_products_bill_as_one_line() {
        let bo = backoffice();
        let pen = product(&bo, "Pen", 10, 5);

        let receipt = bo
            .pos_checkout(
                &cashier(),
                &PosSale {
                    items: vec![line(pen, 1, 10), PosLine { name: Some("Blue pen".into()), ..line(pen, 2, 10) }],
                    paid: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let order = bo.order(receipt.order_id).unwrap();
        let invoice = bo.projections().invoices.get(&receipt.invoice_id).unwrap();
        assert_eq!(order.total, Money::from_rupees(30));
        assert_eq!(invoice.total, order.total);
        assert_eq!(invoice.lines.len(), 1);
        assert_eq!(invoice.lines[0].quantity, 3);
        assert_eq!(invoice.lines[0].name, "Blue pen");
        assert_eq!(bo.daily_sales(None).revenue, Money::from_rupees(30));
    }

    #[test]
    fn repeated_product_at_two_prices_is_rejected() {
        let bo = backoffice();
        let pen = product(&bo, "Pen", 10, 5);

        let err = bo
            .pos_checkout(
                &cashier(),
                &PosSale { items: vec![line(pen, 1, 10), line(pen, 1, 20)], paid: true, ..Default::default() },
            )
            .unwrap_err();

        assert!(matches!(err, DispatchError::Validation(msg) if msg.ends_with("is listed with different prices.")));
        assert_eq!(stock_of(&bo, pen), 5);
        assert!(bo.projections().orders.query(&Default::default(), |_| true).is_empty());
    }
}
