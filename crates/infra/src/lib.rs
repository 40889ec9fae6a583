//! Infrastructure layer: event storage, command dispatch, read models and the
//! back-office workflows built on them.

pub mod backoffice;
pub mod command_dispatcher;
pub mod event_store;
pub mod notifier;
pub mod projections;
pub mod read_model;
