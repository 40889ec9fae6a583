//! Disposable read model storage.
//!
//! Everything here can be rebuilt from the event log; projections own the
//! stores and nothing else writes to them.

pub mod store;

pub use store::{InMemoryReadStore, ReadStore};
