//! Orders domain module (event-sourced).
//!
//! Online and POS orders, their status lifecycle and line edits. Stock is not
//! touched here; the infrastructure workflows pair every line change with the
//! matching product reservation in one commit.

pub mod order;
pub mod shipping;

pub use order::{
    AddItem, ChangeItemQuantity, ChangeStatus, InvoiceLinked, ItemAdded, ItemQuantityChanged,
    ItemRemoved, LinkInvoice, NewOrderItem, Order, OrderCommand, OrderEvent, OrderId, OrderItem,
    OrderPaymentMethod, OrderPlaced, OrderSource, OrderStatus, PaymentReferenceRecorded,
    PlaceOrder, RecordPaymentReference, RemoveItem, StatusChanged, merge_items,
};
pub use shipping::ShippingAddress;
