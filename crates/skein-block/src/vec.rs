//! Type-erased retained column buffers.

use std::any::Any;
use std::fmt;

use skein_buffers::{PoolIndex, Retained};
use skein_core::{fail_fast, TypeTag, Violation};

/// Element types a block column can hold.
///
/// `Copy` keeps elements free of drop glue, so columns can be pinned and
/// read through raw pointers by any number of readers.
pub trait Element: Copy + Default + fmt::Debug + Send + Sync + 'static {}

impl<T: Copy + Default + fmt::Debug + Send + Sync + 'static> Element for T {}

/// A retained buffer whose element type is known only at runtime.
///
/// The [`TypeTag`] is fixed when the buffer is allocated; every typed
/// access checks it.
pub struct RetainedVec {
    tag: TypeTag,
    ptr: *mut u8,
    len: usize,
    pool_index: PoolIndex,
    handle: Box<dyn Any + Send + Sync>,
}

// SAFETY: `ptr` points into the buffer retained by `handle`, which is
// Send + Sync; access discipline is the owning block's.
unsafe impl Send for RetainedVec {}
// SAFETY: see above.
unsafe impl Sync for RetainedVec {}

impl RetainedVec {
    /// Take ownership of a retained handle.
    pub fn new<T: Element>(handle: Retained<T>) -> Self {
        Self {
            tag: TypeTag::of::<T>(),
            ptr: handle.as_ptr().cast(),
            len: handle.len(),
            pool_index: handle.memory().pool_index(),
            handle: Box::new(handle),
        }
    }

    /// Element type.
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Length in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pool the underlying memory belongs to.
    pub fn pool_index(&self) -> PoolIndex {
        self.pool_index
    }

    /// Typed base pointer. Fails fast on an element type mismatch.
    #[track_caller]
    pub fn as_ptr<T: Element>(&self) -> *mut T {
        self.tag.ensure::<T>();
        self.ptr.cast()
    }

    /// The typed handle. Fails fast on an element type mismatch.
    #[track_caller]
    pub fn handle<T: Element>(&self) -> &Retained<T> {
        match self.handle.downcast_ref::<Retained<T>>() {
            Some(handle) => handle,
            None => fail_fast(Violation::TypeMismatch {
                expected: self.tag.name(),
                found: std::any::type_name::<T>(),
            }),
        }
    }
}

impl fmt::Debug for RetainedVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedVec")
            .field("tag", &self.tag)
            .field("len", &self.len)
            .field("pool", &self.pool_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_buffers::RetainableMemory;

    #[test]
    fn typed_access_matches_handle() {
        let memory = RetainableMemory::<i64>::create(32, true).unwrap();
        let vec = RetainedVec::new(memory.retain(0, 8));
        assert_eq!(vec.len(), 8);
        assert_eq!(vec.tag(), TypeTag::of::<i64>());
        assert_eq!(vec.as_ptr::<i64>(), memory.as_ptr());
        assert_eq!(vec.handle::<i64>().len(), 8);
        assert_eq!(memory.ref_count(), 1);
        drop(vec);
        assert!(memory.is_disposed());
    }

    #[test]
    #[should_panic(expected = "element type mismatch")]
    fn wrong_type_fails_fast() {
        let memory = RetainableMemory::<u32>::create(16, true).unwrap();
        let vec = RetainedVec::new(memory.retain_all());
        let _ = vec.as_ptr::<f32>();
    }
}
