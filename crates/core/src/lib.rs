//! Shared domain primitives for the shop back-office.
//!
//! Identifiers, money, the aggregate contract and the domain error type live
//! here so every domain crate speaks the same vocabulary.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, UserId};
pub use money::Money;
pub use value_object::ValueObject;
