use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use shopdesk_core::{AggregateId, Money, UserId};
use shopdesk_events::EventEnvelope;
use shopdesk_orders::order::AGGREGATE_TYPE as ORDER;
use shopdesk_orders::{
    OrderEvent, OrderId, OrderItem, OrderPaymentMethod, OrderSource, OrderStatus, ShippingAddress,
};

use super::cursor::StreamCursors;
use super::{decode, ProjectionError};
use crate::read_model::{InMemoryReadStore, ReadStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderView {
    pub id: OrderId,
    pub source: OrderSource,
    pub status: OrderStatus,
    pub customer_id: Option<UserId>,
    pub placed_by: UserId,
    pub payment_method: OrderPaymentMethod,
    pub shipping: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub total: Money,
    pub invoice_id: Option<AggregateId>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    pub fn is_pos(&self) -> bool {
        self.source == OrderSource::Pos
    }

    pub fn units(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }
}

/// List filters shared by the customer and admin order lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub source: Option<OrderSource>,
    pub since: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn matches(&self, order: &OrderView) -> bool {
        self.status.is_none_or(|s| order.status == s)
            && self.source.is_none_or(|s| order.source == s)
            && self.since.is_none_or(|t| order.created_at >= t)
    }
}

#[derive(Debug, Default)]
pub struct OrdersProjection {
    orders: InMemoryReadStore<OrderId, OrderView>,
    cursors: StreamCursors,
}

impl OrdersProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &OrderId) -> Option<OrderView> {
        self.orders.get(id)
    }

    /// Matching orders, newest first.
    pub fn query(&self, filter: &OrderFilter, mut keep: impl FnMut(&OrderView) -> bool) -> Vec<OrderView> {
        let mut found: Vec<OrderView> = self
            .orders
            .list()
            .into_iter()
            .filter(|o| filter.matches(o) && keep(o))
            .collect();
        sort_newest_first(&mut found);
        found
    }

    pub fn clear(&self) {
        self.orders.clear();
        self.cursors.clear();
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ORDER {
            return Ok(());
        }
        if !self.cursors.admit(envelope)? {
            return Ok(());
        }

        match decode::<OrderEvent>(envelope)? {
            OrderEvent::Placed(e) => self.orders.upsert(
                e.order_id,
                OrderView {
                    id: e.order_id,
                    source: e.source,
                    status: OrderStatus::Pending,
                    customer_id: e.customer_id,
                    placed_by: e.placed_by,
                    payment_method: e.payment_method,
                    shipping: e.shipping,
                    items: e.items,
                    total: e.total,
                    invoice_id: None,
                    payment_reference: None,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                },
            ),
            OrderEvent::StatusChanged(e) => {
                self.orders.update(&e.order_id, &mut |o| {
                    o.status = e.to;
                    o.updated_at = e.occurred_at;
                });
            }
            OrderEvent::ItemAdded(e) => {
                self.orders.update(&e.order_id, &mut |o| {
                    o.items.push(e.item.clone());
                    o.total = e.total;
                    o.updated_at = e.occurred_at;
                });
            }
            OrderEvent::ItemQuantityChanged(e) => {
                self.orders.update(&e.order_id, &mut |o| {
                    if let Some(item) = o.items.iter_mut().find(|i| i.product_id == e.product_id) {
                        item.quantity = e.quantity;
                        item.line_total = e.line_total;
                    }
                    o.total = e.total;
                    o.updated_at = e.occurred_at;
                });
            }
            OrderEvent::ItemRemoved(e) => {
                self.orders.update(&e.order_id, &mut |o| {
                    o.items.retain(|i| i.product_id != e.product_id);
                    o.total = e.total;
                    o.updated_at = e.occurred_at;
                });
            }
            OrderEvent::InvoiceLinked(e) => {
                self.orders.update(&e.order_id, &mut |o| {
                    o.invoice_id = Some(e.invoice_id);
                    o.updated_at = e.occurred_at;
                });
            }
            OrderEvent::PaymentReferenceRecorded(e) => {
                self.orders.update(&e.order_id, &mut |o| {
                    o.payment_reference = Some(e.reference.clone());
                    o.updated_at = e.occurred_at;
                });
            }
        }

        self.cursors.advance(envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }
}

pub(crate) fn sort_newest_first(orders: &mut [OrderView]) {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}
