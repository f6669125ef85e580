//! Fixed-capacity pool of [`SampleBatch`] slots.
//!
//! The pool is a static array of `N` batches plus an intrusive free list
//! (head index and a "next free" index per slot). Allocation and release are
//! O(1) and never touch the heap. The free list sits behind its own
//! short-held lock; each slot has a separate lock so filling or reading a
//! batch never blocks allocation.
//!
//! Ownership of a slot is carried by a [`SlotHandle`], which is neither
//! `Clone` nor `Copy`: a handle is always in exactly one place (the producer's
//! hand, the queue, or the consumer's hand) and is consumed by [`free`].
//!
//! [`free`]: SamplePool::free

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::sample::SampleBatch;

/// Exclusive ownership of one pool slot.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a dropped handle leaks its slot until the pool is reset"]
pub struct SlotHandle {
    index: u16,
}

impl SlotHandle {
    /// Forge a handle for a raw slot index.
    #[cfg(test)]
    pub(crate) const fn from_index(index: u16) -> Self {
        Self { index }
    }

    /// Slot index.
    pub const fn index(&self) -> usize {
        self.index as usize
    }
}

struct FreeList<const N: usize> {
    head: Option<u16>,
    next: [Option<u16>; N],
    allocated: [bool; N],
    in_use: usize,
}

impl<const N: usize> FreeList<N> {
    const INDEX_FITS: () = assert!(N <= u16::MAX as usize, "pool index must fit in u16");

    #[allow(clippy::cast_possible_truncation)] // Safety: N <= u16::MAX (INDEX_FITS)
    fn new() -> Self {
        let () = Self::INDEX_FITS;
        let mut next = [None; N];
        for (i, link) in next.iter_mut().enumerate() {
            let following = i.saturating_add(1);
            *link = (following < N).then_some(following as u16);
        }
        Self {
            head: (N > 0).then_some(0),
            next,
            allocated: [false; N],
            in_use: 0,
        }
    }

    fn allocate(&mut self) -> Option<u16> {
        let index = self.head?;
        let slot = usize::from(index);
        self.head = self.next.get_mut(slot).and_then(Option::take);
        if let Some(flag) = self.allocated.get_mut(slot) {
            *flag = true;
        }
        self.in_use = self.in_use.saturating_add(1);
        Some(index)
    }

    fn free(&mut self, index: u16) -> bool {
        let slot = usize::from(index);
        match self.allocated.get_mut(slot) {
            Some(flag) if *flag => *flag = false,
            _ => return false,
        }
        if let Some(link) = self.next.get_mut(slot) {
            *link = self.head;
        }
        self.head = Some(index);
        self.in_use = self.in_use.saturating_sub(1);
        true
    }

    fn is_allocated(&self, index: u16) -> bool {
        self.allocated.get(usize::from(index)).copied().unwrap_or(false)
    }
}

/// Pool of `N` sample batches.
pub struct SamplePool<M: RawMutex, const N: usize> {
    free_list: Mutex<M, RefCell<FreeList<N>>>,
    slots: [Mutex<M, RefCell<SampleBatch>>; N],
}

impl<M: RawMutex, const N: usize> Default for SamplePool<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> SamplePool<M, N> {
    /// Pool with every slot free.
    pub fn new() -> Self {
        Self {
            free_list: Mutex::new(RefCell::new(FreeList::new())),
            slots: core::array::from_fn(|_| Mutex::new(RefCell::new(SampleBatch::new()))),
        }
    }

    /// Take a free slot, cleared. `None` when the pool is exhausted.
    pub fn allocate(&self) -> Option<SlotHandle> {
        let index = self.free_list.lock(|list| list.borrow_mut().allocate())?;
        self.with_slot(index, |batch| batch.clear());
        Some(SlotHandle { index })
    }

    /// Return a slot to the pool.
    ///
    /// Returns `false` without touching the pool if the slot was already free
    /// or the handle does not belong to this pool.
    pub fn free(&self, handle: SlotHandle) -> bool {
        self.free_list.lock(|list| list.borrow_mut().free(handle.index))
    }

    /// Read the batch behind `handle`.
    pub fn with_batch<R>(&self, handle: &SlotHandle, f: impl FnOnce(&SampleBatch) -> R) -> Option<R> {
        if !self.is_allocated(handle) {
            return None;
        }
        self.slots
            .get(handle.index())
            .map(|slot| slot.lock(|batch| f(&batch.borrow())))
    }

    /// Fill or modify the batch behind `handle`.
    pub fn with_batch_mut<R>(
        &self,
        handle: &SlotHandle,
        f: impl FnOnce(&mut SampleBatch) -> R,
    ) -> Option<R> {
        if !self.is_allocated(handle) {
            return None;
        }
        self.with_slot(handle.index, f)
    }

    /// Whether `handle` currently owns an allocated slot.
    pub fn is_allocated(&self, handle: &SlotHandle) -> bool {
        self.free_list.lock(|list| list.borrow().is_allocated(handle.index))
    }

    /// Slots currently handed out.
    pub fn in_use(&self) -> usize {
        self.free_list.lock(|list| list.borrow().in_use)
    }

    /// Slots still free.
    pub fn available(&self) -> usize {
        N.saturating_sub(self.in_use())
    }

    /// Total slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Return every slot to the free list.
    ///
    /// Teardown only: the owning controller calls this after draining the
    /// queues. Handles still held elsewhere become stale; freeing them later
    /// is a no-op.
    pub fn reset(&self) {
        self.free_list.lock(|list| *list.borrow_mut() = FreeList::new());
    }

    fn with_slot<R>(&self, index: u16, f: impl FnOnce(&mut SampleBatch) -> R) -> Option<R> {
        self.slots
            .get(usize::from(index))
            .map(|slot| slot.lock(|batch| f(&mut batch.borrow_mut())))
    }
}
