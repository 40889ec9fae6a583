//! Order-to-invoice derivation.
//!
//! When an online order moves into a trigger status its invoice is opened (or
//! reused), filled from the order lines and settled with a single online
//! payment. The policy only decides; the caller commits the resulting invoice
//! commands together with the order change.

use chrono::{DateTime, Utc};

use shopdesk_core::{DomainError, Money};
use shopdesk_events::execute;
use shopdesk_orders::{Order, OrderStatus};

use crate::invoice::{
    AddLines, CapturePayment, Invoice, InvoiceCommand, InvoiceId, InvoiceMode, InvoiceStatus,
    NewInvoiceLine, OpenInvoice,
};
use crate::payment::{PaymentId, PaymentMethod};

/// Payment references longer than this are cut when copied into `txn_id`.
pub const TXN_ID_FROM_REFERENCE_MAX: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPolicy {
    trigger_statuses: Vec<OrderStatus>,
    online_method: PaymentMethod,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            trigger_statuses: vec![OrderStatus::Paid],
            online_method: PaymentMethod::Online,
        }
    }
}

/// Invoice commands to commit alongside an order status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    pub invoice_id: InvoiceId,
    /// The invoice did not exist before and must be linked to the order.
    pub opened: bool,
    pub commands: Vec<InvoiceCommand>,
    /// Amount captured by this derivation (zero when already settled).
    pub captured: Money,
}

impl BillingPolicy {
    pub fn new(trigger_statuses: Vec<OrderStatus>, online_method: PaymentMethod) -> Self {
        Self {
            trigger_statuses,
            online_method,
        }
    }

    /// Parses a comma separated, case-insensitive status list (`"PAID,shipped"`).
    pub fn parse_triggers(list: &str) -> Result<Vec<OrderStatus>, DomainError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(OrderStatus::parse)
            .collect()
    }

    pub fn trigger_statuses(&self) -> &[OrderStatus] {
        &self.trigger_statuses
    }

    pub fn online_method(&self) -> PaymentMethod {
        self.online_method
    }

    /// A transition triggers billing when it enters a trigger status.
    pub fn triggers(&self, from: OrderStatus, to: OrderStatus) -> bool {
        from != to && self.trigger_statuses.contains(&to)
    }

    /// Decides what happens to the order's invoice.
    ///
    /// Returns `None` when there is nothing to do: the invoice is already
    /// settled with lines, or it was voided.
    pub fn derive(
        &self,
        order: &Order,
        existing: Option<&Invoice>,
        new_invoice_id: InvoiceId,
        payment_id: PaymentId,
        now: DateTime<Utc>,
    ) -> Result<Option<Derivation>, DomainError> {
        if existing.is_some_and(|inv| inv.status() == InvoiceStatus::Void) {
            return Ok(None);
        }

        let mut scratch = match existing {
            Some(inv) => inv.clone(),
            None => Invoice::empty(new_invoice_id),
        };
        let mut commands = Vec::new();

        if existing.is_none() {
            step(
                &mut scratch,
                &mut commands,
                InvoiceCommand::Open(OpenInvoice {
                    invoice_id: new_invoice_id,
                    mode: InvoiceMode::Online,
                    order_id: Some(order.id_typed()),
                    customer_id: order.customer_id(),
                    customer_name: order.shipping().name.clone(),
                    customer_phone: order.shipping().phone.clone(),
                    cashier_id: None,
                    discount: Money::ZERO,
                    occurred_at: now,
                }),
            )?;
        }

        if scratch.lines().is_empty() && !order.items().is_empty() {
            let lines = order
                .items()
                .iter()
                .map(|i| NewInvoiceLine {
                    product_id: Some(i.product_id),
                    name: i.name.clone(),
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                })
                .collect();
            step(
                &mut scratch,
                &mut commands,
                InvoiceCommand::AddLines(AddLines { lines, occurred_at: now }),
            )?;
        }

        let due = scratch.balance_due();
        if scratch.status() == InvoiceStatus::Open && !due.is_zero() {
            let txn_id = order
                .payment_reference()
                .map(|r| r.chars().take(TXN_ID_FROM_REFERENCE_MAX).collect::<String>());
            step(
                &mut scratch,
                &mut commands,
                InvoiceCommand::CapturePayment(CapturePayment {
                    payment_id,
                    method: self.online_method,
                    amount: due,
                    txn_id,
                    received_by: None,
                    occurred_at: now,
                }),
            )?;
        }

        if commands.is_empty() {
            return Ok(None);
        }

        let captured = if scratch.is_settled() { due } else { Money::ZERO };
        Ok(Some(Derivation {
            invoice_id: scratch.id_typed(),
            opened: existing.is_none(),
            commands,
            captured,
        }))
    }
}

fn step(
    scratch: &mut Invoice,
    commands: &mut Vec<InvoiceCommand>,
    command: InvoiceCommand,
) -> Result<(), DomainError> {
    execute(scratch, &command)?;
    commands.push(command);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopdesk_catalog::ProductId;
    use shopdesk_core::{AggregateId, UserId};
    use shopdesk_orders::{
        NewOrderItem, OrderCommand, OrderId, OrderPaymentMethod, OrderSource, PlaceOrder,
        RecordPaymentReference, ShippingAddress,
    };

    fn order_with_reference(reference: Option<&str>) -> Order {
        let id = OrderId::new(AggregateId::new());
        let mut order = Order::empty(id);
        execute(
            &mut order,
            &OrderCommand::Place(PlaceOrder {
                order_id: id,
                source: OrderSource::Online,
                customer_id: Some(UserId::new()),
                placed_by: UserId::new(),
                payment_method: OrderPaymentMethod::Online,
                shipping: ShippingAddress {
                    name: "Asha".into(),
                    phone: "9876543210".into(),
                    line1: "12 Market Rd".into(),
                    line2: String::new(),
                    city: "Agra".into(),
                    state: "UP".into(),
                    pincode: "282005".into(),
                },
                items: vec![NewOrderItem {
                    product_id: ProductId::new(AggregateId::new()),
                    name: "Parle-G".into(),
                    quantity: 3,
                    unit_price: Money::from_paise(1_000),
                }],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        if let Some(r) = reference {
            execute(
                &mut order,
                &OrderCommand::RecordPaymentReference(RecordPaymentReference {
                    reference: r.to_string(),
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        }
        order
    }

    fn ids() -> (InvoiceId, PaymentId) {
        (InvoiceId::new(AggregateId::new()), PaymentId::new(AggregateId::new()))
    }

    fn replay(invoice_id: InvoiceId, existing: Option<&Invoice>, d: &Derivation) -> Invoice {
        let mut inv = existing.cloned().unwrap_or_else(|| Invoice::empty(invoice_id));
        for cmd in &d.commands {
            execute(&mut inv, cmd).unwrap();
        }
        inv
    }

    #[test]
    fn only_entering_a_trigger_status_triggers() {
        let policy = BillingPolicy::default();
        assert!(policy.triggers(OrderStatus::Pending, OrderStatus::Paid));
        assert!(!policy.triggers(OrderStatus::Paid, OrderStatus::Paid));
        assert!(!policy.triggers(OrderStatus::Paid, OrderStatus::Shipped));
    }

    #[test]
    fn parse_triggers_is_case_insensitive() {
        let parsed = BillingPolicy::parse_triggers("paid, Shipped ,").unwrap();
        assert_eq!(parsed, vec![OrderStatus::Paid, OrderStatus::Shipped]);
        assert!(BillingPolicy::parse_triggers("PAID,LOST").is_err());
    }

    #[test]
    fn new_invoice_is_opened_filled_and_settled() {
        let order = order_with_reference(Some(&"R".repeat(200)));
        let (invoice_id, payment_id) = ids();
        let d = BillingPolicy::default()
            .derive(&order, None, invoice_id, payment_id, Utc::now())
            .unwrap()
            .unwrap();

        assert!(d.opened);
        assert_eq!(d.commands.len(), 3);
        assert_eq!(d.captured, Money::from_paise(3_000));

        let inv = replay(invoice_id, None, &d);
        assert_eq!(inv.mode(), InvoiceMode::Online);
        assert_eq!(inv.status(), InvoiceStatus::Paid);
        assert_eq!(inv.customer_name(), "Asha");
        assert_eq!(inv.payments()[0].method, PaymentMethod::Online);
        assert_eq!(inv.payments()[0].txn_id.len(), TXN_ID_FROM_REFERENCE_MAX);
    }

    #[test]
    fn settled_invoice_yields_nothing() {
        let order = order_with_reference(None);
        let (invoice_id, payment_id) = ids();
        let policy = BillingPolicy::default();
        let d = policy.derive(&order, None, invoice_id, payment_id, Utc::now()).unwrap().unwrap();
        let inv = replay(invoice_id, None, &d);

        let again = policy.derive(&order, Some(&inv), invoice_id, payment_id, Utc::now()).unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn existing_partial_invoice_gets_the_balance() {
        let order = order_with_reference(None);
        let (invoice_id, payment_id) = ids();
        let policy = BillingPolicy::default();
        let d = policy.derive(&order, None, invoice_id, payment_id, Utc::now()).unwrap().unwrap();
        // Open and fill only, then take a partial cash payment.
        let mut inv = Invoice::empty(invoice_id);
        for cmd in &d.commands[..2] {
            execute(&mut inv, cmd).unwrap();
        }
        execute(
            &mut inv,
            &InvoiceCommand::CapturePayment(CapturePayment {
                payment_id: PaymentId::new(AggregateId::new()),
                method: PaymentMethod::Cash,
                amount: Money::from_paise(1_000),
                txn_id: None,
                received_by: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let rest = policy
            .derive(&order, Some(&inv), invoice_id, PaymentId::new(AggregateId::new()), Utc::now())
            .unwrap()
            .unwrap();
        assert!(!rest.opened);
        assert_eq!(rest.commands.len(), 1);
        assert_eq!(rest.captured, Money::from_paise(2_000));
    }
}
