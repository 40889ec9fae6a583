use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shopdesk_core::{AggregateId, Money};
use shopdesk_orders::OrderStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// String-only payload, as push providers require.
    pub data: BTreeMap<String, String>,
}

/// Sent to admin devices when a customer places an order.
///
/// `who` falls back from the customer's name to their phone, then `Customer`.
pub fn order_placed_message(
    order_id: AggregateId,
    customer_name: Option<&str>,
    customer_phone: Option<&str>,
    total: Money,
) -> PushMessage {
    let who = [customer_name, customer_phone]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("Customer");

    PushMessage {
        title: format!("New order #{}", order_id.short()),
        body: format!("{who} placed an order • ₹{total}"),
        data: BTreeMap::from([
            ("order_id".to_string(), order_id.to_string()),
            ("event".to_string(), "order_created".to_string()),
        ]),
    }
}

/// Sent to the customer's devices when their order changes status.
pub fn status_changed_message(order_id: AggregateId, old: OrderStatus, new: OrderStatus) -> PushMessage {
    PushMessage {
        title: format!("Order #{} {}", order_id.short(), new.label()),
        body: format!("Current status: {}", new.label()),
        data: BTreeMap::from([
            ("order_id".to_string(), order_id.to_string()),
            ("old_status".to_string(), old.as_str().to_string()),
            ("new_status".to_string(), new.as_str().to_string()),
            ("event".to_string(), "order_status_changed".to_string()),
        ]),
    }
}

pub fn test_message() -> PushMessage {
    PushMessage {
        title: "Test push".to_string(),
        body: "It works 🎉".to_string(),
        data: BTreeMap::from([("order_id".to_string(), "0".to_string())]),
    }
}
