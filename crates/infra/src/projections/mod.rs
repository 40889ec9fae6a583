//! Projection implementations (read model builders).
//!
//! Projections consume committed envelopes and build query-optimized read
//! models. All projections are:
//! - **Rebuildable**: reconstructed from `EventStore::load_all` at startup
//! - **Idempotent**: per-stream cursors skip redelivered envelopes
//! - **Gap-detecting**: an envelope that skips a sequence number is an error

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use shopdesk_core::AggregateId;
use shopdesk_events::EventEnvelope;

use crate::command_dispatcher::CommitObserver;
use crate::event_store::{EventStore, EventStoreError};

pub mod accounts;
pub mod catalog;
pub mod cursor;
pub mod devices;
pub mod invoices;
pub mod orders;

pub use accounts::{AccountView, AccountsProjection};
pub use catalog::{CatalogProjection, CategoryView, ProductView};
pub use cursor::StreamCursors;
pub use devices::{DeviceView, DevicesProjection};
pub use invoices::{InvoiceView, InvoicesProjection};
pub use orders::{OrderFilter, OrderView, OrdersProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize {event_type}: {message}")]
    Deserialize { event_type: String, message: String },

    #[error("non-monotonic sequence number for {aggregate_id} (last={last}, found={found})")]
    NonMonotonicSequence {
        aggregate_id: AggregateId,
        last: u64,
        found: u64,
    },

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

pub(crate) fn decode<E: DeserializeOwned>(envelope: &EventEnvelope<JsonValue>) -> Result<E, ProjectionError> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| ProjectionError::Deserialize {
        event_type: envelope.event_type().to_string(),
        message: e.to_string(),
    })
}

/// Every read model of the shop, fed from one place.
#[derive(Debug, Default)]
pub struct ShopProjections {
    pub catalog: CatalogProjection,
    pub orders: OrdersProjection,
    pub invoices: InvoicesProjection,
    pub accounts: AccountsProjection,
    pub devices: DevicesProjection,
}

impl ShopProjections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.catalog.apply_envelope(envelope)?;
        self.orders.apply_envelope(envelope)?;
        self.invoices.apply_envelope(envelope)?;
        self.accounts.apply_envelope(envelope)?;
        self.devices.apply_envelope(envelope)?;
        Ok(())
    }

    pub fn clear(&self) {
        self.catalog.clear();
        self.orders.clear();
        self.invoices.clear();
        self.accounts.clear();
        self.devices.clear();
    }

    /// Drop all read models and replay the whole log. Returns the number of
    /// events replayed.
    pub fn rebuild(&self, store: &dyn EventStore) -> Result<usize, ProjectionError> {
        self.clear();
        let events = store.load_all()?;
        for stored in &events {
            self.apply(&stored.to_envelope())?;
        }
        tracing::info!(events = events.len(), "read models rebuilt");
        Ok(events.len())
    }
}

impl CommitObserver for ShopProjections {
    fn on_commit(&self, committed: &[EventEnvelope<JsonValue>]) {
        for envelope in committed {
            if let Err(err) = self.apply(envelope) {
                tracing::error!(
                    error = %err,
                    event_type = envelope.event_type(),
                    aggregate_id = %envelope.aggregate_id(),
                    "projection failed to apply committed event"
                );
            }
        }
    }
}
