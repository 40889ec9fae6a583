//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects carry no identity and are compared by their attributes
/// (`Money`, a shipping address snapshot). Treat them as immutable: build a new
/// value instead of mutating one in place.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
