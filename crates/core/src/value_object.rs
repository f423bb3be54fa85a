//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**; two value objects holding the same
//! attributes are the same value (a stay range, a role level).

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by value. To "modify" one, build a
/// new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
