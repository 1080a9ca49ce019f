//! See [`Pool`].

use std::sync::{Mutex, MutexGuard};

/// Handle to an item reserved from a [`Pool`].
///
/// Handles are plain indices: they stay valid until the item is released
/// with [`Pool::put`], and linked structures (such as the receive reorder
/// runs) link to each other through them rather than through pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle(u32);

#[derive(Debug)]
struct Slot<T> {
    item: T,
    /// Next slot in the intrusive free list, when this slot is free.
    next_free: Option<u32>,
    free: bool,
}

/// Tried to iterate a pool which still has items reserved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pool {name} busy - {reserved} items still reserved")]
pub struct PoolBusy {
    /// Name of the pool.
    pub name: &'static str,
    /// Items currently reserved.
    pub reserved: usize,
}

/// A named, bounded cache of items, handing out [`PoolHandle`]s from a
/// fixed backing store so that steady-state operation causes no heap
/// traffic.
///
/// A pool is created with an initial capacity and an optional growth
/// policy: when a [`get`](Pool::get) finds no free item and growth is still
/// allowed, the pool allocates `grow` additional items, up to `max_grows`
/// times. Once exhausted, `get` returns `None` and the caller decides what
/// degrades (for the receive path: the payload in progress errors out).
///
/// The pool itself is single-threaded; wrap it in [`SyncPool`] when the
/// creating and releasing sides run on different threads.
pub struct Pool<T> {
    name: &'static str,
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    free_len: usize,
    grow: usize,
    max_grows: usize,
    grows: usize,
    factory: Box<dyn FnMut() -> T + Send>,
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("capacity", &self.slots.len())
            .field("free", &self.free_len)
            .finish_non_exhaustive()
    }
}

impl<T> Pool<T> {
    /// Creates a pool of `initial` items built by `factory`, growing by
    /// `grow` items at most `max_grows` times when exhausted.
    ///
    /// Pass `grow = 0` (or `max_grows = 0`) for a fixed-capacity pool.
    pub fn new(
        name: &'static str,
        initial: usize,
        grow: usize,
        max_grows: usize,
        factory: impl FnMut() -> T + Send + 'static,
    ) -> Self {
        let mut pool = Self {
            name,
            slots: Vec::new(),
            free_head: None,
            free_len: 0,
            grow,
            max_grows,
            grows: 0,
            factory: Box::new(factory),
        };
        pool.extend(initial);
        pool
    }

    /// Creates a fixed-capacity pool over caller-provided items. Growth is
    /// disabled.
    #[must_use]
    pub fn with_items(name: &'static str, items: Vec<T>) -> Self {
        let mut pool = Self {
            name,
            slots: Vec::with_capacity(items.len()),
            free_head: None,
            free_len: 0,
            grow: 0,
            max_grows: 0,
            grows: 0,
            factory: Box::new(|| unreachable!("growth is disabled")),
        };
        for item in items {
            pool.push_free(item);
        }
        pool
    }

    fn push_free(&mut self, item: T) {
        #[allow(clippy::cast_possible_truncation)] // pools are far below u32::MAX items
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            item,
            next_free: self.free_head,
            free: true,
        });
        self.free_head = Some(index);
        self.free_len += 1;
    }

    fn extend(&mut self, count: usize) {
        for _ in 0..count {
            let item = (self.factory)();
            self.push_free(item);
        }
    }

    /// Name this pool was created with.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Total number of items, free or reserved.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of items currently free.
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free_len
    }

    /// Reserves an item, growing the backing store if the growth policy
    /// still allows it. Returns `None` when the pool is exhausted.
    pub fn get(&mut self) -> Option<PoolHandle> {
        if self.free_head.is_none() && self.grow > 0 && self.grows < self.max_grows {
            self.extend(self.grow);
            self.grows += 1;
        }
        let index = self.free_head?;
        let slot = &mut self.slots[index as usize];
        self.free_head = slot.next_free;
        slot.next_free = None;
        slot.free = false;
        self.free_len -= 1;
        Some(PoolHandle(index))
    }

    /// Releases a previously reserved item back to the pool.
    ///
    /// The item itself is not reset; the next `get` observes whatever
    /// state the releaser left behind.
    pub fn put(&mut self, handle: PoolHandle) {
        let slot = &mut self.slots[handle.0 as usize];
        debug_assert!(!slot.free, "double free in pool {}", self.name);
        if slot.free {
            return;
        }
        slot.free = true;
        slot.next_free = self.free_head;
        self.free_head = Some(handle.0);
        self.free_len += 1;
    }

    /// Releases every reserved item back to the pool.
    pub fn put_all(&mut self) {
        self.free_head = None;
        self.free_len = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let index = index as u32;
            slot.free = true;
            slot.next_free = self.free_head;
            self.free_head = Some(index);
            self.free_len += 1;
        }
    }

    /// Accesses a reserved item.
    #[must_use]
    pub fn item(&self, handle: PoolHandle) -> &T {
        let slot = &self.slots[handle.0 as usize];
        debug_assert!(!slot.free, "access of free item in pool {}", self.name);
        &slot.item
    }

    /// Mutably accesses a reserved item.
    #[must_use]
    pub fn item_mut(&mut self, handle: PoolHandle) -> &mut T {
        let slot = &mut self.slots[handle.0 as usize];
        debug_assert!(!slot.free, "access of free item in pool {}", self.name);
        &mut slot.item
    }

    /// Visits every item in the pool. Only valid while no item is
    /// reserved.
    ///
    /// # Errors
    ///
    /// Errors if any item is still reserved.
    pub fn for_each(&self, mut f: impl FnMut(&T)) -> Result<(), PoolBusy> {
        let reserved = self.capacity() - self.free_count();
        if reserved > 0 {
            return Err(PoolBusy {
                name: self.name,
                reserved,
            });
        }
        for slot in &self.slots {
            f(&slot.item);
        }
        Ok(())
    }
}

/// A [`Pool`] behind a lock, for the cases where items are reserved on one
/// thread and released on another (delivery descriptors, error strings).
#[derive(Debug)]
pub struct SyncPool<T> {
    inner: Mutex<Pool<T>>,
}

impl<T> SyncPool<T> {
    /// Wraps a pool in a lock.
    #[must_use]
    pub fn new(pool: Pool<T>) -> Self {
        Self {
            inner: Mutex::new(pool),
        }
    }

    /// Locks the pool for a sequence of operations.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder of the lock panicked.
    pub fn lock(&self) -> MutexGuard<'_, Pool<T>> {
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap()
    }
}
