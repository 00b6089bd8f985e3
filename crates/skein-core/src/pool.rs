//! The object-pool contract.

/// Recycles objects of type `T`.
///
/// Implementations must be safe to share between threads and must not
/// block: a pool that has nothing to hand out creates a fresh object, and
/// a pool that cannot take an object back hands it back to the caller.
pub trait ObjectPool<T>: Send + Sync {
    /// Take an object from the pool, creating one if none is pooled.
    fn rent(&self) -> T;

    /// Offer an object back to the pool.
    ///
    /// Returns `Err(item)` when the pool rejects it; the caller then owns
    /// the object again and must release it some other way.
    fn try_return(&self, item: T) -> Result<(), T>;

    /// Drop every pooled object. Renting afterwards is a usage violation;
    /// returning afterwards is always rejected.
    fn dispose(&self);
}
