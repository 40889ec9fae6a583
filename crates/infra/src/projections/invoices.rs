use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use shopdesk_billing::invoice::AGGREGATE_TYPE as INVOICE;
use shopdesk_billing::{InvoiceEvent, InvoiceId, InvoiceLine, InvoiceMode, InvoiceStatus, Payment, PaymentStatus};
use shopdesk_core::{Money, UserId};
use shopdesk_events::EventEnvelope;
use shopdesk_orders::OrderId;

use super::cursor::StreamCursors;
use super::{decode, ProjectionError};
use crate::read_model::{InMemoryReadStore, ReadStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceView {
    pub id: InvoiceId,
    pub mode: InvoiceMode,
    pub status: InvoiceStatus,
    pub order_id: Option<OrderId>,
    pub customer_id: Option<UserId>,
    pub customer_name: String,
    pub customer_phone: String,
    pub cashier_id: Option<UserId>,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub paid_amount: Money,
    pub payments: Vec<Payment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceView {
    pub fn balance_due(&self) -> Money {
        self.total.saturating_sub(self.paid_amount)
    }
}

#[derive(Debug, Default)]
pub struct InvoicesProjection {
    invoices: InMemoryReadStore<InvoiceId, InvoiceView>,
    cursors: StreamCursors,
}

impl InvoicesProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &InvoiceId) -> Option<InvoiceView> {
        self.invoices.get(id)
    }

    /// Matching invoices, newest first.
    pub fn query(&self, mut keep: impl FnMut(&InvoiceView) -> bool) -> Vec<InvoiceView> {
        let mut found: Vec<InvoiceView> = self.invoices.list().into_iter().filter(|i| keep(i)).collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        found
    }

    pub fn for_order(&self, order_id: OrderId) -> Option<InvoiceView> {
        self.query(|i| i.order_id == Some(order_id)).into_iter().next()
    }

    pub fn clear(&self) {
        self.invoices.clear();
        self.cursors.clear();
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != INVOICE {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        match decode::<InvoiceEvent>(envelope)? {
            InvoiceEvent::Opened(e) => self.invoices.upsert(
                e.invoice_id,
                InvoiceView {
                    id: e.invoice_id,
                    mode: e.mode,
                    status: InvoiceStatus::Open,
                    order_id: e.order_id,
                    customer_id: e.customer_id,
                    customer_name: e.customer_name,
                    customer_phone: e.customer_phone,
                    cashier_id: e.cashier_id,
                    lines: Vec::new(),
                    subtotal: Money::ZERO,
                    discount: e.discount,
                    total: Money::ZERO,
                    paid_amount: Money::ZERO,
                    payments: Vec::new(),
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                },
            ),
            InvoiceEvent::LinesAdded(e) => {
                self.invoices.update(&e.invoice_id, &mut |i| {
                    i.lines.extend(e.lines.iter().cloned());
                    i.subtotal = e.subtotal;
                    i.total = e.total;
                    i.updated_at = e.occurred_at;
                });
            }
            InvoiceEvent::PaymentCaptured(e) => {
                self.invoices.update(&e.invoice_id, &mut |i| {
                    i.payments.push(e.payment.clone());
                    i.paid_amount = e.paid_amount;
                    i.status = e.status;
                    i.updated_at = e.occurred_at;
                });
            }
            InvoiceEvent::PaymentRefunded(e) => {
                self.invoices.update(&e.invoice_id, &mut |i| {
                    if let Some(p) = i.payments.iter_mut().find(|p| p.payment_id == e.payment_id) {
                        p.status = PaymentStatus::Refunded;
                    }
                    i.paid_amount = e.paid_amount;
                    i.status = e.status;
                    i.updated_at = e.occurred_at;
                });
            }
            InvoiceEvent::Voided(e) => {
                self.invoices.update(&e.invoice_id, &mut |i| {
                    i.status = InvoiceStatus::Void;
                    i.updated_at = e.occurred_at;
                });
            }
        }

        self.cursors.advance(envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }
}
