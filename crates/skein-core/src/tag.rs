//! Runtime element-type descriptors.

use std::any::TypeId;
use std::fmt;

use crate::fail::{fail_fast, Violation};

/// Identifies the element type stored in a type-erased buffer.
///
/// Recorded when the buffer is first allocated and compared on every
/// typed access. A mismatch is a [`Violation::TypeMismatch`], never a
/// silent reinterpretation.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// The tag of `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Whether this tag describes `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Human-readable type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fail fast unless this tag describes `T`.
    #[track_caller]
    pub fn ensure<T: 'static>(&self) {
        if !self.is::<T>() {
            fail_fast(Violation::TypeMismatch {
                expected: self.name,
                found: std::any::type_name::<T>(),
            });
        }
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_compare_by_type() {
        assert_eq!(TypeTag::of::<u64>(), TypeTag::of::<u64>());
        assert_ne!(TypeTag::of::<u64>(), TypeTag::of::<i64>());
        assert!(TypeTag::of::<f32>().is::<f32>());
    }

    #[test]
    #[should_panic(expected = "element type mismatch")]
    fn ensure_rejects_other_type() {
        TypeTag::of::<u32>().ensure::<f64>();
    }
}
