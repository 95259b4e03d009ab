//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are compared by their attribute values.
/// Ledger quantities, [`Money`](crate::Money), billing periods and composite
/// keys are all value objects: two instances with the same fields are the same
/// value, and "changing" one means constructing a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Cartons(i64);
///
/// impl ValueObject for Cartons {}
///
/// assert_eq!(Cartons(12), Cartons(12));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
