// File: src/pool.rs
//
// Per-thread free-list pools backing the recycled Value variants
// (Number, String, List, Map, SeqElem) per spec.md §3.2 / §5.
//
// A `Pooled<T>` is an `Rc`-backed cell: cloning it is the spec's `Ref`, and
// `Machine::release`/`Context::teardown` call `release_if_unreferenced` at
// the same points spec.md §5 calls for `Unref` (container replacement, call
// teardown), returning the allocation to its pool's free list once nobody
// still holds a clone. This is Design Notes §9 option (a), applied with
// explicit release calls rather than a `Drop` impl.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Counts of live (in-use) instances per variant, for the `NumInstancesInUse`
/// testable property of spec.md §8. One counter per pool, reset to 0 only
/// when every handle referencing a cell has been dropped.
#[derive(Debug, Default)]
pub struct PoolStats {
    in_use: Cell<usize>,
    recycled: Cell<usize>,
}

impl PoolStats {
    pub fn in_use(&self) -> usize {
        self.in_use.get()
    }

    pub fn recycled_count(&self) -> usize {
        self.recycled.get()
    }
}

struct Inner<T> {
    value: RefCell<T>,
}

/// A pool-backed reference-counted cell. Cloning increments the refcount
/// (the spec's `Ref`); dropping the last clone recycles the storage (the
/// spec's `Unref` reaching zero).
pub struct Pooled<T: 'static> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Pooled<T> {
    fn clone(&self) -> Self {
        Pooled { inner: Rc::clone(&self.inner) }
    }
}

impl<T> Pooled<T> {
    pub fn borrow(&self) -> std::cell::Ref<'_, T> {
        self.inner.value.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, T> {
        self.inner.value.borrow_mut()
    }

    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A pool of recyclable cells of one backing type `T`. Each pooled `Value`
/// variant (Number, String, List, Map, SeqElem) owns one `Pool<T>` via a
/// `thread_local!`, matching spec.md §5's "per-thread pool free-lists".
pub struct Pool<T: 'static> {
    free: RefCell<Vec<Rc<Inner<T>>>>,
    stats: PoolStats,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Pool { free: RefCell::new(Vec::new()), stats: PoolStats::default() }
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Create a fresh pooled cell holding `value`, reusing a free-listed
    /// allocation if one is available. Returned with refcount 1.
    pub fn create(&self, value: T) -> Pooled<T> {
        self.stats.in_use.set(self.stats.in_use.get() + 1);
        let mut free = self.free.borrow_mut();
        if let Some(rc) = free.pop() {
            // Only reuse cells nobody else still references.
            debug_assert_eq!(Rc::strong_count(&rc), 1);
            *rc.value.borrow_mut() = value;
            self.stats.recycled.set(self.stats.recycled.get() + 1);
            Pooled { inner: rc }
        } else {
            Pooled { inner: Rc::new(Inner { value: RefCell::new(value) }) }
        }
    }

    /// Release a cell explicitly back to the free list. Call sites that
    /// still hold other clones should never reach zero; this is only ever
    /// invoked from `Context` teardown and container replacement, mirroring
    /// spec.md §5 ("Context teardown unrefs temporaries and local
    /// variables... assignment refs the new value and unrefs the
    /// displaced one").
    pub fn release_if_unreferenced(&self, cell: &Pooled<T>) {
        if Rc::strong_count(&cell.inner) == 1 {
            self.stats.in_use.set(self.stats.in_use.get().saturating_sub(1));
            self.free.borrow_mut().push(Rc::clone(&cell.inner));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reuses_freed_allocation() {
        let pool: Pool<f64> = Pool::new();
        let a = pool.create(1.0);
        assert_eq!(pool.stats().in_use(), 1);
        pool.release_if_unreferenced(&a);
        drop(a);
        let b = pool.create(2.0);
        // Either a fresh allocation or the recycled one is fine; what matters
        // is the in_use count reflects exactly the live cell.
        assert_eq!(pool.stats().in_use(), 1);
        assert_eq!(*b.borrow(), 2.0);
    }

    #[test]
    fn clone_increments_refcount() {
        let pool: Pool<f64> = Pool::new();
        let a = pool.create(1.0);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        drop(b);
        assert_eq!(a.ref_count(), 1);
    }
}
