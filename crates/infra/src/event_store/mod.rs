//! Append-only event store boundary.
//!
//! Streams are keyed by aggregate id. Both backends share the same batch
//! semantics so workflows can be tested against the in-memory store.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
