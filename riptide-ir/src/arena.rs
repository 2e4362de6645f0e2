//! Typed bump regions with savepoints, plus the per-thread scratch pool.
//!
//! Nothing allocated here is ever freed individually; a whole tail of
//! allocations is reclaimed at once by restoring a savepoint. A function's
//! nodes, lattice values and work arrays all live in regions owned by that
//! function's compilation and die with it.

/// A growable region of `T`s addressed by dense `u32` indices.
///
/// Indices are stable for the lifetime of the region: the only way an index
/// is invalidated is [`Arena::restore`] with a savepoint taken before it.
#[derive(Debug, Clone, Default)]
pub struct Arena<T> {
    items: Vec<T>,
}

/// Opaque cursor produced by [`Arena::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

impl<T> Arena<T> {
    /// An empty region.
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    /// Allocates `item` and returns its index.
    pub fn alloc(&mut self, item: T) -> u32 {
        let idx = self.items.len();
        assert!(idx < u32::MAX as usize, "arena index space exhausted");
        self.items.push(item);
        idx as u32
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing has been allocated (or everything was restored).
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Marks the current allocation point.
    pub fn save(&self) -> Savepoint {
        Savepoint(self.items.len())
    }

    /// Frees everything allocated since `sp` was taken.
    pub fn restore(&mut self, sp: Savepoint) {
        debug_assert!(sp.0 <= self.items.len(), "savepoint from another region");
        self.items.truncate(sp.0);
    }

    /// Immutable access by index.
    pub fn get(&self, idx: u32) -> &T {
        &self.items[idx as usize]
    }

    /// Mutable access by index.
    pub fn get_mut(&mut self, idx: u32) -> &mut T {
        &mut self.items[idx as usize]
    }

    /// Iterates items in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// Recycles node-id scratch buffers between passes and between function
/// compilations on one thread.
///
/// The pool is deliberately not `Sync`: it is owned by whichever pipeline
/// context is running on the thread, matching the rule that a function never
/// migrates threads mid-compile.
#[derive(Debug, Default)]
pub struct ScratchPool {
    free: Vec<Vec<crate::node::NodeId>>,
}

impl ScratchPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a cleared buffer, reusing a recycled one when available.
    pub fn get(&mut self) -> Vec<crate::node::NodeId> {
        self.free.pop().unwrap_or_default()
    }

    /// Returns a buffer to the pool for the next taker.
    pub fn recycle(&mut self, mut buf: Vec<crate::node::NodeId>) {
        buf.clear();
        self.free.push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_roundtrip() {
        let mut a = Arena::new();
        let x = a.alloc(10u64);
        let sp = a.save();
        let y = a.alloc(20u64);
        assert_eq!((*a.get(x), *a.get(y)), (10, 20));

        a.restore(sp);
        assert_eq!(a.len(), 1);
        let z = a.alloc(30u64);
        assert_eq!(z, y, "indices are reused after restore");
    }

    #[test]
    fn scratch_buffers_come_back_empty() {
        use crate::node::NodeId;
        let mut pool = ScratchPool::new();
        let mut buf = pool.get();
        buf.extend([NodeId(1), NodeId(2), NodeId(3)]);
        let cap = buf.capacity();
        pool.recycle(buf);

        let again = pool.get();
        assert!(again.is_empty());
        assert_eq!(again.capacity(), cap, "storage is reused");
    }
}
